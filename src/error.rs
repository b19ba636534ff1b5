//! Error types for uaspace.
//!
//! Two channels exist. Per-item outcomes inside a batch are [`StatusCode`]s
//! written into the caller's result lists. Conditions that make a whole call
//! meaningless are returned as [`UaError`] through the usual `Result` path.

use thiserror::Error;

use crate::node_id::NodeId;
use crate::status::StatusCode;

/// Validation errors for caller-supplied arguments and configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Parallel batch lists differ in length.
    #[error("Batch list '{list}' has {actual} entries, expected {expected}")]
    LengthMismatch {
        list: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A required input was not supplied.
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        reason: String,
    },

    /// A node definition cannot be loaded.
    #[error("Invalid node definition for {node_id}: {reason}")]
    InvalidNodeDefinition {
        node_id: NodeId,
        reason: String,
    },
}

/// Top-level error type for uaspace.
#[derive(Debug, Error)]
pub enum UaError {
    /// Caller-supplied arguments are invalid.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The whole call failed with a protocol status.
    #[error("Service failed with {status}: {message}")]
    Service {
        status: StatusCode,
        message: String,
    },

    /// Reading a configuration or node-set file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration or node-set document is malformed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lock was poisoned or an internal invariant broke.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl UaError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a service-level error carrying a protocol status code.
    #[must_use]
    pub fn service(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Service {
            status,
            message: message.into(),
        }
    }

    /// Poisoned-lock error for the named lock.
    #[must_use]
    pub fn poisoned(context: &'static str) -> Self {
        Self::internal(format!("poisoned lock: {context}"))
    }

    /// True for argument and configuration errors.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// True for errors carrying a service status.
    #[must_use]
    pub const fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }

    /// True for poisoned locks and broken invariants.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// The protocol status code that best describes this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_INVALID_ARGUMENT,
            Self::Service { status, .. } => *status,
            Self::Io(_) | Self::Serialization(_) | Self::Internal { .. } => {
                StatusCode::BAD_INTERNAL_ERROR
            }
        }
    }
}

/// Result type alias for uaspace operations.
pub type UaResult<T> = Result<T, UaError>;

/// Fails with a `LengthMismatch` unless `actual == expected`.
pub(crate) fn check_len(list: &'static str, expected: usize, actual: usize) -> UaResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ValidationError::LengthMismatch {
            list,
            expected,
            actual,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_message() {
        let err = check_len("errors", 3, 2).unwrap_err();
        assert!(err.is_validation());
        let msg = err.to_string();
        assert!(msg.contains("errors"));
        assert!(msg.contains('3'));
        assert_eq!(err.status_code(), StatusCode::BAD_INVALID_ARGUMENT);
    }

    #[test]
    fn test_service_error_carries_status() {
        let err = UaError::service(StatusCode::BAD_VIEW_ID_UNKNOWN, "no such view");
        assert!(err.is_service());
        assert_eq!(err.status_code(), StatusCode::BAD_VIEW_ID_UNKNOWN);
        assert!(err.to_string().contains("BadViewIdUnknown"));
    }

    #[test]
    fn test_internal_error() {
        let err = UaError::poisoned("store");
        assert!(err.is_internal());
        assert!(err.to_string().contains("poisoned lock: store"));
        assert_eq!(err.status_code(), StatusCode::BAD_INTERNAL_ERROR);
    }
}
