use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShardScaleError>;

#[derive(Error, Debug)]
pub enum ShardScaleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Shard not found: {0}")]
    ShardNotFound(String),

    #[error("Shard busy: {0}")]
    ShardBusy(String),

    #[error("Throttled by provider: {0}")]
    Throttled(String),

    #[error("Unable to complete {operation} after {retries} retries")]
    OperationExhausted { operation: String, retries: u32 },

    #[error("Inconsistent shard topology: {0}")]
    Inconsistent(String),

    #[error("Stream {0} is already at the minimum of one shard")]
    AlreadyAtMinimum(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Metric source error: {0}")]
    MetricSource(String),

    #[error("Admin API error: {0}")]
    AdminApi(String),

    #[error("Fatal monitor error: {0}")]
    Fatal(String),
}
