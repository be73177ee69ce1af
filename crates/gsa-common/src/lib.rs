//! Common types for the GCP service account operator: CRDs, errors, and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Finalizer guarding cloud-side cleanup of a GcpServiceAccount
pub const SERVICE_ACCOUNT_FINALIZER: &str = "iam.finalizers.gsa.dev";

/// Secret field written when `spec.secretKey` is unset
pub const DEFAULT_SECRET_KEY: &str = "credentials.json";

/// Field manager used for server-side apply and merge patches
pub const FIELD_MANAGER: &str = "gsa-controller";
