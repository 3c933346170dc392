//! Error types

use thiserror::Error;

/// Rejected server fields. Messages are shown to the operator as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Server name is required")]
    EmptyName,

    #[error("Server name must be at most {max} characters")]
    NameTooLong { max: usize },

    #[error("Invalid IP address format: {0}")]
    InvalidHost(String),

    #[error("Port must be between 1 and 65535")]
    InvalidPort,

    #[error("Check interval must be positive")]
    InvalidInterval,
}

/// A save that could not be made durable. The in-memory state is still valid.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Verification failed: expected currentServerId {expected:?}, found {found:?}")]
    Verification {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("All {attempts} storage backends failed")]
    Exhausted { attempts: usize },
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Server {0} not found")]
    NotFound(u64),

    #[error("Cannot delete the last remaining server")]
    LastServer,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Config not persisted: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
