//! Domain failure taxonomy shared by every layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, EntityKind};

/// Discriminant of a [`DomainError`]. Adapters map each kind to exactly one
/// protocol-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    ValidationFailed,
    ConflictingWrite,
    SchemaMismatch,
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::ConflictingWrite => "CONFLICTING_WRITE",
            Self::SchemaMismatch => "SCHEMA_MISMATCH",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure produced by the domain layer or the transaction machinery.
///
/// `Internal` carries detail for logs only; adapters must never render it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("conflicting write on {kind} {id}")]
    ConflictingWrite { kind: EntityKind, id: EntityId },
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Shorthand for a missing entity addressed by id.
    #[must_use]
    pub fn not_found(kind: EntityKind, id: EntityId) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing entity addressed by some other key.
    pub fn not_found_by(kind: EntityKind, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: key.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::ConflictingWrite { .. } => ErrorKind::ConflictingWrite,
            Self::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show a caller. Internal detail is replaced by a
    /// generic text.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}
