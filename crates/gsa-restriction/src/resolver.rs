//! Lookup of the restriction record governing a namespace

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use gsa_common::crd::{GcpNamespaceRestriction, GcpNamespaceRestrictionSpec};

use crate::error::{RestrictionError, Result};

/// Resolves the restriction for a namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RestrictionResolver: Send + Sync {
    /// The restriction governing `namespace`
    ///
    /// Returns [`RestrictionError::NotFound`] when no record names the namespace.
    async fn resolve(&self, namespace: &str) -> Result<GcpNamespaceRestrictionSpec>;
}

/// [`RestrictionResolver`] reading `GcpNamespaceRestriction` records from the API server
pub struct KubeRestrictionResolver {
    client: Client,
}

impl KubeRestrictionResolver {
    /// Create a resolver using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RestrictionResolver for KubeRestrictionResolver {
    async fn resolve(&self, namespace: &str) -> Result<GcpNamespaceRestrictionSpec> {
        let api: Api<GcpNamespaceRestriction> = Api::all(self.client.clone());
        let restrictions = api.list(&ListParams::default()).await?;

        let found = restrictions
            .items
            .into_iter()
            .find(|r| r.spec.namespace == namespace);

        match found {
            Some(restriction) => {
                debug!(
                    namespace = %namespace,
                    rules = restriction.spec.restrictions.len(),
                    "resolved namespace restriction"
                );
                Ok(restriction.spec)
            }
            None => Err(RestrictionError::not_found(namespace)),
        }
    }
}
