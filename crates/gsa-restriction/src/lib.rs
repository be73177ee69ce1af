//! Namespace access restrictions
//!
//! A [`GcpNamespaceRestriction`](gsa_common::crd::GcpNamespaceRestriction)
//! lists the resource/role combinations a namespace may request.
//! [`AccessRestrictionEvaluator`] checks requested role bindings against it.

#![deny(missing_docs)]

pub mod error;
pub mod evaluator;
pub mod resolver;

pub use error::{RestrictionError, Result};
pub use evaluator::{evaluate, AccessRestrictionEvaluator};
pub use resolver::{KubeRestrictionResolver, RestrictionResolver};

#[cfg(test)]
pub use resolver::MockRestrictionResolver;
