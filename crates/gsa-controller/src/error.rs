//! Reconciliation errors

use gsa_iam::IamError;
use gsa_restriction::RestrictionError;
use thiserror::Error;

/// Error returned from a reconcile attempt
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Record or secret store failure
    #[error(transparent)]
    Store(#[from] gsa_common::Error),

    /// GCP IAM failure
    #[error(transparent)]
    Iam(#[from] IamError),

    /// Restriction lookup failure
    #[error(transparent)]
    Restriction(#[from] RestrictionError),

    /// A namespaced record arrived without a namespace
    #[error("GcpServiceAccount {name} has no namespace")]
    MissingNamespace {
        /// Name of the GcpServiceAccount
        name: String,
    },

    /// Key material returned by GCP is not valid base64
    #[error("key {key} has undecodable private key data: {source}")]
    KeyDecode {
        /// Key resource name
        key: String,
        /// Decoder error
        source: base64::DecodeError,
    },
}

impl ReconcileError {
    /// Whether the record store rejected a write made against stale state
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// Whether another attempt with the same inputs may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::MissingNamespace { .. } => false,
            _ => true,
        }
    }
}
