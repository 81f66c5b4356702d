use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyndicError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Policy violation: {0}")]
    PolicyViolation(String),
    #[error("Budget exceeded for project {project}: {reason}")]
    BudgetExceeded { project: String, reason: String },
    #[error("Trace chain integrity failure at index {index}: {detail}")]
    ChainIntegrity { index: u64, detail: String },
    #[error("Allocation cooldown active for project {project}: retry in {retry_after_secs}s")]
    CooldownActive {
        project: String,
        retry_after_secs: u64,
    },
    #[error("Gate already decided: {0}")]
    AlreadyDecided(String),
    #[error("Retry budget exhausted: {0}")]
    RetryExhausted(String),
    #[error("Config error: {0}")]
    ConfigError(String),
}
