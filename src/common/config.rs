use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "artdrop.toml";
const ENV_PREFIX: &str = "ARTDROP_";

/// Service configuration
/// Layered: defaults < TOML file < ARTDROP_* env vars
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
    pub session: SessionConfig,
    pub storage: StorageConfig,
    pub inference: InferenceConfig,
}

/// Session lifetime tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Window after a successful generation before the session self-expires
    pub expiry_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Filesystem,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub staging_dir: PathBuf,
    pub results_dir: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub base_url: String,
    pub account_id: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            max_upload_bytes: 10 * 1024 * 1024, // 10 MB
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 60,
            sweep_interval_secs: 5,
        }
    }
}

impl SessionConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        // zero would make tokio::time::interval panic
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = directories::ProjectDirs::from("", "", "artdrop")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| std::env::temp_dir().join("artdrop"));

        Self {
            backend: StorageBackend::Memory,
            staging_dir: data_dir.join("staging"),
            results_dir: data_dir.join("results"),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudflare.com/client/v4".to_string(),
            account_id: String::new(),
            api_token: String::new(),
            timeout_secs: 120,
        }
    }
}

impl InferenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load config from defaults, an optional TOML file, then the environment.
    /// Without an explicit path the platform config dir is checked.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(Path::to_path_buf).or_else(default_config_path);
        Self::figment(file.as_deref())
            .extract()
            .context("invalid configuration")
    }

    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Render as TOML with secrets masked
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut shown = self.clone();
        if !shown.inference.api_token.is_empty() {
            shown.inference.api_token = "<redacted>".to_string();
        }
        toml::to_string_pretty(&shown).context("serialize config")
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "artdrop")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}
