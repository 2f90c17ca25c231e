//! Error types for Dripline.

use thiserror::Error;

/// Dripline error type.
#[derive(Error, Debug)]
pub enum DriplineError {
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A delivery provider rejected or failed a send.
    #[error("channel error: {0}")]
    Channel(String),

    /// Persistence layer failure.
    #[error("database error: {0}")]
    Database(String),

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DriplineError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Result type for Dripline.
pub type Result<T> = std::result::Result<T, DriplineError>;
