//! GcpServiceAccount controller
//!
//! Drives each GcpServiceAccount through its lifecycle: finalizer, cloud
//! identity, namespace restriction check, role bindings, and the credentials
//! secret. Cleanup of cloud state runs while the finalizer is held.

#![deny(missing_docs)]

pub mod client;
pub mod context;
pub mod controller;
pub mod error;
pub mod secret;

pub use client::{KubeClient, KubeClientImpl};
pub use context::{Context, ContextBuilder};
pub use controller::{error_policy, reconcile, LifecycleState};
pub use error::ReconcileError;

#[cfg(test)]
pub use client::MockKubeClient;
