//! Error types for model_sync

use thiserror::Error;

use crate::model::ItemId;

/// Result type for model_sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for model_sync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Unsupported deletion: {0}")]
    UnsupportedDeletion(String),

    #[error("Protected item {id}: {reason}")]
    ProtectedItem { id: ItemId, reason: String },

    #[error("Script generation error: {0}")]
    Generation(String),

    #[error("Execution error: {0}")]
    Execution(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert TOML deserialization errors to configuration errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Config(error.to_string())
    }
}
