use anyhow::Result;
use artdrop::common::AppConfig;
use artdrop::server;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "artdrop")]
#[command(about = "Prompt-to-image session service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        #[arg(long, help = "Path to artdrop.toml")]
        config: Option<PathBuf>,

        #[arg(long, help = "Override the listen address")]
        bind: Option<SocketAddr>,
    },
    /// Print the effective configuration
    Config {
        #[arg(long, help = "Path to artdrop.toml")]
        config: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("artdrop=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            init_tracing();
            let mut config = AppConfig::load(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            server::run(config).await
        }
        Commands::Config { config } => {
            let config = AppConfig::load(config.as_deref())?;
            print!("{}", config.to_redacted_toml()?);
            Ok(())
        }
    }
}
