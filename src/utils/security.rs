use sha2::{Digest, Sha256};
use std::path::{Component, Path};
use thiserror::Error;

pub const MAX_SESSION_KEY_LEN: usize = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Key is empty")]
    Empty,

    #[error("Key is longer than {MAX_SESSION_KEY_LEN} characters")]
    TooLong,

    #[error("Key contains invalid character {0:?}")]
    InvalidCharacter(char),

    #[error("Key contains null byte")]
    NullByte,

    #[error("Key contains parent directory (..)")]
    ContainsParentDir,

    #[error("Key is absolute")]
    AbsolutePath,

    #[error("Key contains invalid component")]
    InvalidComponent,
}

//===============
// Key Handling
//===============

/// Hash a blob key into a fixed-width file name
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Session keys are caller supplied, so keep them to a URL-safe alphabet
pub fn validate_session_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::Empty);
    }
    if key.len() > MAX_SESSION_KEY_LEN {
        return Err(ValidationError::TooLong);
    }
    if let Some(bad) = key
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidCharacter(bad));
    }
    Ok(())
}

// Blob keys are slash separated (generated/<session>/<id>)
// no: parent dir travel, absolute keys, null bytes
pub fn validate_blob_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::Empty);
    }

    // rust uses C-style APIs so \0 can end str early
    if key.contains('\0') {
        return Err(ValidationError::NullByte);
    }

    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => continue,
            Component::ParentDir => return Err(ValidationError::ContainsParentDir),
            Component::RootDir => return Err(ValidationError::AbsolutePath),
            Component::CurDir | Component::Prefix(_) => {
                return Err(ValidationError::InvalidComponent)
            }
        }
    }

    Ok(())
}
