use thiserror::Error;

/// Result alias for replay and stream operations.
pub type TapeResult<T> = Result<T, TapeError>;

/// Error type surfaced by replay and stream operations.
#[derive(Debug, Error)]
pub enum TapeError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for TapeError {
    fn from(value: reqwest::Error) -> Self {
        Self::Fetch(value.to_string())
    }
}

impl From<serde_json::Error> for TapeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
