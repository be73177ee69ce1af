//! Record and secret store access
//!
//! The reconciler only reaches the API server through [`KubeClient`] so tests
//! can run against a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use gsa_common::crd::{GcpServiceAccount, GcpServiceAccountStatus};
use gsa_common::{Error, FIELD_MANAGER};

/// Kubernetes operations used by the GcpServiceAccount controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Add `finalizer` to a GcpServiceAccount
    ///
    /// Fails with [`Error::Conflict`] when the record changed since it was read.
    async fn add_finalizer(&self, name: &str, namespace: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove `finalizer` from a GcpServiceAccount
    ///
    /// Fails with [`Error::Conflict`] when the record changed since it was read.
    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Replace the status of a GcpServiceAccount
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &GcpServiceAccountStatus,
    ) -> Result<(), Error>;

    /// Get a Secret, `None` if it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Create or update a Secret with server-side apply
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;
}

/// [`KubeClient`] backed by the API server
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Merge-patch the finalizer list, guarded by the resourceVersion it was computed from
    async fn patch_finalizers(
        &self,
        api: &Api<GcpServiceAccount>,
        account: &GcpServiceAccount,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let name = account.name_any();
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": account.resource_version(),
                "finalizers": finalizers
            }
        });

        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| match Error::from(e) {
                Error::Conflict { .. } => Error::conflict("GcpServiceAccount", &name),
                other => other,
            })?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn add_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<GcpServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = api.get(name).await?;

        let mut finalizers = account.finalizers().to_vec();
        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        self.patch_finalizers(&api, &account, finalizers).await?;
        debug!(service_account = %name, namespace = %namespace, "added finalizer");
        Ok(())
    }

    async fn remove_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let api: Api<GcpServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let account = match api.get(name).await {
            Ok(account) => account,
            // Already gone, nothing to release
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let finalizers: Vec<String> = account
            .finalizers()
            .iter()
            .filter(|f| *f != finalizer)
            .cloned()
            .collect();
        if finalizers.len() == account.finalizers().len() {
            return Ok(());
        }

        self.patch_finalizers(&api, &account, finalizers).await?;
        debug!(service_account = %name, namespace = %namespace, "removed finalizer");
        Ok(())
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &GcpServiceAccountStatus,
    ) -> Result<(), Error> {
        let api: Api<GcpServiceAccount> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&status_patch))
            .await?;

        Ok(())
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::internal_with_context("secret", "secret has no namespace"))?;
        let name = secret.name_any();

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(secret),
        )
        .await?;

        debug!(secret = %name, namespace = %namespace, "applied credentials secret");
        Ok(())
    }
}
