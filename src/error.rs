// src/error.rs
// Standardized error types for the coordination engine

use thiserror::Error;

/// Main error type for the engine library.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("lock acquisition timed out after {attempts} attempts")]
    LockTimeout { attempts: u32 },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("database pool error: {0}")]
    Pool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias for `Result` using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// A short, stable label for the error kind, used by the tool dispatcher
    /// to classify responses per the error-handling contract.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "Validation",
            EngineError::Permission(_) => "Permission",
            EngineError::NotFound(_) => "NotFound",
            EngineError::AlreadyExists(_) | EngineError::Conflict(_) => "Conflict",
            EngineError::LockTimeout { .. } => "Storage",
            EngineError::Db(_) | EngineError::Pool(_) | EngineError::Io(_) => "Storage",
            EngineError::Config(_) => "Storage",
            EngineError::Other(_) => "Storage",
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        EngineError::Permission(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }
}

impl From<deadpool_sqlite::InteractError> for EngineError {
    fn from(e: deadpool_sqlite::InteractError) -> Self {
        EngineError::Pool(e.to_string())
    }
}

impl From<deadpool_sqlite::PoolError> for EngineError {
    fn from(e: deadpool_sqlite::PoolError) -> Self {
        EngineError::Pool(e.to_string())
    }
}
