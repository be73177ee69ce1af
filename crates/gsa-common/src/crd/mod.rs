//! Custom Resource Definitions for the GCP service account operator

mod namespace_restriction;
mod service_account;
mod types;

pub use namespace_restriction::{
    GcpNamespaceRestriction, GcpNamespaceRestrictionSpec, GcpRestrictionRule,
};
pub use service_account::{
    GcpServiceAccount, GcpServiceAccountSpec, GcpServiceAccountStatus, ServiceAccountPhase,
};
pub use types::GcpRoleBinding;
