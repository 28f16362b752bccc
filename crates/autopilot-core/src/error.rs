use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutopilotError {
    #[error("config not found: {0}")]
    ConfigNotFound(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("market error: {0}")]
    Market(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("artifact provider error: {0}")]
    Artifact(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("settlement error: {0}")]
    Settlement(String),

    #[error("state store error: {0}")]
    Store(String),

    #[error("corrupt value at key '{key}': {reason}")]
    CorruptValue { key: String, reason: String },

    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AutopilotError>;
