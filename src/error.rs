use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache operation failed: {0}")]
    Cache(String),
}

pub type RelayResult<T> = Result<T, RelayError>;
