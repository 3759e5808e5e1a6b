pub mod config;
pub mod errors;

pub use config::{AppConfig, InferenceConfig, SessionConfig, StorageBackend, StorageConfig};
pub use errors::AppError;
