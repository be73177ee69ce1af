//! Error types for IAM operations

use thiserror::Error;

/// Result alias for IAM operations
pub type Result<T> = std::result::Result<T, IamError>;

/// IAM backend error types
#[derive(Debug, Error)]
pub enum IamError {
    /// The addressed identity, key, or resource does not exist
    #[error("not found: {resource}")]
    NotFound {
        /// Resource that was looked up
        resource: String,
    },

    /// The API answered with a non-success status
    #[error("IAM API error {status} for {resource}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Resource the request addressed
        resource: String,
        /// Message from the Google error envelope
        message: String,
    },

    /// Request never completed (connect, timeout, TLS)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// A role-binding resource string could not be resolved
    #[error("invalid resource '{pattern}': {reason}")]
    InvalidResource {
        /// The resource string as written in the role binding
        pattern: String,
        /// Why it could not be resolved
        reason: String,
    },

    /// Failed to obtain an access token or project
    #[error("authentication error: {message}")]
    Auth {
        /// Description of what failed
        message: String,
    },

    /// Response body could not be decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IamError {
    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an invalid resource error
    pub fn invalid_resource(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResource {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
            message: msg.into(),
        }
    }

    /// Whether the error is a not-found answer rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
