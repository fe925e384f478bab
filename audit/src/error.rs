use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Audit log entry at line {line} is unreadable: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Audit recorder unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;
