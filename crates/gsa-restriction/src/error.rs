//! Error types for restriction lookups

use thiserror::Error;

/// Result alias for restriction operations
pub type Result<T> = std::result::Result<T, RestrictionError>;

/// Restriction lookup errors
#[derive(Debug, Error)]
pub enum RestrictionError {
    /// No restriction record covers the namespace
    #[error("no GcpNamespaceRestriction for namespace {namespace}")]
    NotFound {
        /// Namespace that was looked up
        namespace: String,
    },

    /// Listing restriction records failed
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),
}

impl RestrictionError {
    /// Create a not-found error for `namespace`
    pub fn not_found(namespace: impl Into<String>) -> Self {
        Self::NotFound {
            namespace: namespace.into(),
        }
    }
}
