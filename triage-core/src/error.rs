//! Error types for TRIAGE operations

use crate::{EntityType, ProblemId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine-readable code attached to a field-level validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Required,
    TooShort,
    TooLong,
    Invalid,
    NotFound,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::Required => "REQUIRED",
            ValidationCode::TooShort => "TOO_SHORT",
            ValidationCode::TooLong => "TOO_LONG",
            ValidationCode::Invalid => "INVALID",
            ValidationCode::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-level validation error reported at the mutation boundary.
///
/// Raised before any transaction opens, so a validation failure never leaves
/// partial effects behind.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{field}: {message} ({code})")]
pub struct ValidationError {
    pub field: String,
    pub code: ValidationCode,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, code: ValidationCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Insert failed for {entity_type}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Problem {id} vanished before commit")]
    ProblemVanished { id: ProblemId },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Could not parse environment variable {var}={value}")]
    Parse { var: String, value: String },
}

/// Master error type for all TRIAGE errors.
#[derive(Debug, Clone, Error)]
pub enum TriageError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl TriageError {
    /// The validation error, if this is one.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            TriageError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

/// Result type alias for TRIAGE operations.
pub type TriageResult<T> = Result<T, TriageError>;

// =============================================================================
// TESTS
// =============================================================================
