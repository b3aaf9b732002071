use thiserror::Error;

/// Crate-wide error type. One variant per failure domain named in the core
/// runtime's error handling design: configuration, external I/O, network,
/// serialization, memory pressure/exhaustion, and internal logic violations.
#[derive(Error, Debug)]
pub enum ThrillError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("external memory error: {0}")]
    ExternalMemory(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("buffer pool error: {0}")]
    BufferPool(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("reduce error: {0}")]
    Reduce(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("user function error: {0}")]
    UserFunction(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ThrillError>;
