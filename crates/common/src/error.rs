use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlipwayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limit store unavailable")]
    StoreUnavailable,

    #[error("rate limit store operation failed: {0}")]
    StoreTransient(String),

    #[error("stored field '{field}' for key '{key}' is unparsable")]
    StoreCorruption { key: String, field: &'static str },

    #[error("rate limiter misconfigured: {0}")]
    PolicyMisconfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SlipwayError {
    /// Whether the operation that produced this error may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, SlipwayError::StoreTransient(_))
    }
}

pub type SlipwayResult<T> = Result<T, SlipwayError>;
