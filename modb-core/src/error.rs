//! Error types for MODB

use crate::DbStatus;
use thiserror::Error;

/// Result type alias for MODB operations
pub type Result<T> = std::result::Result<T, ModbError>;

/// MODB error types
#[derive(Error, Debug)]
pub enum ModbError {
    /// Malformed caller input
    #[error("Validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// Record key does not exist
    #[error("Key {0} does not exist")]
    KeyNotFound(String),

    /// Database does not exist in the collection
    #[error("Database {0} does not exist")]
    DatabaseNotFound(String),

    /// Access key is not registered
    #[error("Tenant does not exist")]
    TenantNotFound,

    /// Duplicate database or tenant
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Database is outside READY
    #[error("Database {name} is not ready. Current status {status}")]
    NotReady { name: String, status: DbStatus },

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid on-disk format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classes exposed to the request layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    NotReady,
    Fatal,
}

impl ModbError {
    /// Build a validation error for `field`
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ModbError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModbError::Validation { .. } => ErrorKind::Validation,
            ModbError::KeyNotFound(_)
            | ModbError::DatabaseNotFound(_)
            | ModbError::TenantNotFound => ErrorKind::NotFound,
            ModbError::AlreadyExists(_) => ErrorKind::Conflict,
            ModbError::NotReady { .. } => ErrorKind::NotReady,
            ModbError::Io(_)
            | ModbError::Corruption(_)
            | ModbError::ChecksumMismatch { .. }
            | ModbError::InvalidFormat(_)
            | ModbError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Check if the caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModbError::NotReady { .. })
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ModbError::Corruption(_) | ModbError::ChecksumMismatch { .. }
        )
    }
}
