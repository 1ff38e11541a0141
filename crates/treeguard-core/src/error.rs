//! Error types for the boundary-margin guard.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    #[error("query is missing required feature '{0}'")]
    MalformedQuery(String),

    #[error("access blocked: extraction attack detected")]
    BlockedAccess,

    #[error("unsupported reaction '{0}' (expected none, block or random-leaf)")]
    UnsupportedReaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, GuardError>;
