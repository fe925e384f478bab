use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    #[error("Bucket store unavailable: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, RateLimitError>;
