//! Core error types.

use thiserror::Error;

/// Core store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Field map encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// Record not found.
    #[error("record not found")]
    NotFound,

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// The stored entity changed between read and write.
    #[error("entity {0} was changed by a concurrent write")]
    WriteConflict(String),

    /// Model metadata failed validation.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// No metadata registered for this kind.
    #[error("unknown model kind: {0}")]
    UnknownModel(String),

    /// Lookup named fields that are not a declared unique set.
    #[error("no unique set ({}) declared on {kind}", fields.join(", "))]
    UnknownUniqueSet {
        /// Model kind.
        kind: String,
        /// Requested fields.
        fields: Vec<String>,
    },

    /// A constraint rejected the write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(#[from] ConstraintError),
}

/// Constraint violations raised by the save hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintError {
    /// Another entity already holds this value combination.
    #[error("unique constraint violated on {kind}({}) for values {values} ({hash})", fields.join(", "))]
    UniqueViolation {
        /// Model kind.
        kind: String,
        /// Fields of the violated set.
        fields: Vec<String>,
        /// Rendered `field=value` pairs.
        values: String,
        /// Fingerprint of the value combination.
        hash: String,
    },

    /// The registered fixer never produced a free combination.
    #[error("gave up fixing {kind}({}) after {attempts} attempts", fields.join(", "))]
    FixAttemptsExhausted {
        /// Model kind.
        kind: String,
        /// Fields of the contested set.
        fields: Vec<String>,
        /// Number of attempts made.
        attempts: usize,
    },
}

impl Error {
    /// Whether this error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Error::ConstraintViolation(ConstraintError::UniqueViolation { .. })
        )
    }
}
