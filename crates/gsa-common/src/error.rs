//! Error types shared by the operator crates
//!
//! Errors carry the name of the resource they concern so failures can be
//! traced back to a specific record from the logs alone.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for record store operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// The record was modified concurrently (HTTP 409)
    #[error("conflict updating {kind} {name}")]
    Conflict {
        /// Kind of the record being written
        kind: String,
        /// Name of the record being written
        name: String,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.secretName")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "finalizer", "secret")
        context: String,
    },
}

impl Error {
    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error for a named record
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether the error is a concurrent-modification conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether retrying the same operation may succeed
    ///
    /// Validation errors need a spec change, everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation { .. } | Self::Serialization { .. })
    }
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        match source {
            kube::Error::Api(ref ae) if ae.code == 409 => Self::Conflict {
                kind: UNKNOWN_CONTEXT.to_string(),
                name: ae.message.clone(),
            },
            source => Self::Kube { source },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code,
        })
    }

    #[test]
    fn conflict_is_mapped_from_409() {
        let err: Error = api_error(409).into();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[test]
    fn other_api_errors_stay_kube_errors() {
        let err: Error = api_error(500).into();
        assert!(!err.is_conflict());
        assert!(matches!(err, Error::Kube { .. }));
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = Error::validation_for_field("my-sa", "spec.secretName", "must not be empty");
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "validation error for my-sa: must not be empty"
        );
    }
}
