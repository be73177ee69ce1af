//! GCP IAM integration for the service account operator
//!
//! - [`IamClient`]: the backend operations the controller depends on
//! - [`GcpIamClient`]: REST implementation of [`IamClient`]
//! - [`PolicyBindingEngine`]: converges role grants with minimal policy writes
//! - [`service_account_id`]: derives account ids from user identifiers

#![deny(missing_docs)]

pub mod auth;
pub mod bindings;
pub mod client;
pub mod error;
pub mod naming;
pub mod policy;
pub mod resource;
pub mod rest;

pub use bindings::{BindingChanges, PolicyBindingEngine};
pub use client::{CloudCredentialKey, CloudIdentity, IamClient, ServiceAccountKeyRef};
pub use error::{IamError, Result};
pub use naming::service_account_id;
pub use policy::{member_for, Policy};
pub use resource::{IamResource, ResourceKind};
pub use rest::GcpIamClient;

#[cfg(test)]
pub use client::MockIamClient;
