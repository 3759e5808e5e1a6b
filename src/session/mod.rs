mod controller;
mod expiry;
mod state;

pub use controller::{GenerateRequest, GeneratedResult, SessionController, StageRequest, StagedKeys};
pub use expiry::spawn_sweeper;
pub use state::{Session, SessionSnapshot, SessionState};

use serde::Serialize;
use std::fmt;

use crate::utils::security::{validate_session_key, ValidationError};

/// Caller-supplied session identity.
/// Never derived from transport metadata, so the same caller keeps the same key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        validate_session_key(&key)?;
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
