use std::path::PathBuf;

use thiserror::Error;

/// Core error type shared across devseed crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Strategy or rule configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The dependency resolver made no progress in a full pass.
    #[error("can't resolve dependencies for {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
    /// Database error raised while introspecting or querying a backend.
    #[error("database error: {0}")]
    Db(String),
    /// An entity label is not of the form `namespace.name`.
    #[error("invalid entity name '{0}': expected 'namespace.name'")]
    InvalidEntityName(String),
    /// A snapshot file exists but could not be decoded.
    #[error("invalid snapshot file {}: {source}", path.display())]
    InvalidSnapshot {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias for results returned by devseed crates.
pub type Result<T> = std::result::Result<T, Error>;
