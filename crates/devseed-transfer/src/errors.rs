use thiserror::Error;

/// Errors emitted by export and import runs.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Core(#[from] devseed_core::Error),
    #[error("failed to export {entity} ({strategy}): {source}")]
    Export {
        entity: String,
        strategy: String,
        #[source]
        source: Box<TransferError>,
    },
    #[error("failed to import {entity} ({strategy}): {source}")]
    Import {
        entity: String,
        strategy: String,
        #[source]
        source: Box<TransferError>,
    },
    /// A value that must be inlined into SQL failed validation.
    #[error("{key} is not alphanumeric: {value:?}")]
    UnsafeValue { key: &'static str, value: String },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("anonymisation failed: {0}")]
    Anonymise(String),
    #[error("strategy failed: {0}")]
    StrategyFailed(String),
    #[error("export worker exited before responding (exit code {})", code.map_or_else(|| "unknown".to_string(), |code| code.to_string()))]
    WorkerExited { code: Option<i32> },
    #[error("worker protocol error: {0}")]
    Frame(String),
    #[error("aborted")]
    Aborted,
    #[error("reset already applied ({0})")]
    ResetAlreadyApplied(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TransferError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Core(devseed_core::Error::Configuration(message.into()))
    }

    pub(crate) fn export(entity: &devseed_core::EntityName, strategy: &str, source: Self) -> Self {
        Self::Export {
            entity: entity.label(),
            strategy: strategy.to_string(),
            source: Box::new(source),
        }
    }

    pub(crate) fn import(entity: &devseed_core::EntityName, strategy: &str, source: Self) -> Self {
        Self::Import {
            entity: entity.label(),
            strategy: strategy.to_string(),
            source: Box::new(source),
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
