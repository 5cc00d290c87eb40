//! RPC status codes and the failure mapping.

use std::fmt;

use serde::{Deserialize, Serialize};
use twinport_core::ErrorKind;

use crate::service::OperationError;

/// Call status, numerically compatible with gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcStatus {
    Ok,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    FailedPrecondition,
    Aborted,
    Unimplemented,
    Internal,
    Unavailable,
}

impl RpcStatus {
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
        }
    }

    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
        }
    }

    /// Status for a domain failure kind. One status per kind.
    #[must_use]
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::ValidationFailed => Self::InvalidArgument,
            ErrorKind::ConflictingWrite => Self::Aborted,
            ErrorKind::SchemaMismatch => Self::FailedPrecondition,
            ErrorKind::Internal => Self::Internal,
        }
    }

    /// Status and caller-safe message for a pipeline failure.
    #[must_use]
    pub fn for_error(error: &OperationError) -> (Self, String) {
        match error {
            OperationError::Domain(e) => (Self::for_kind(e.kind()), e.public_message()),
            OperationError::Timeout { .. } => (Self::DeadlineExceeded, error.to_string()),
            OperationError::Overloaded => (Self::Unavailable, error.to_string()),
            OperationError::Internal(_) => (Self::Internal, "internal error".to_string()),
        }
    }
}

impl fmt::Display for RpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
