//! Shared controller context

use std::sync::Arc;

use kube::Client;

use gsa_iam::IamClient;
use gsa_restriction::{AccessRestrictionEvaluator, KubeRestrictionResolver};

use crate::client::{KubeClient, KubeClientImpl};

/// Dependencies shared by every reconcile call
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, iam, "my-project")
///     .disable_restrictions(false)
///     .build();
/// ```
pub struct Context {
    /// Record and secret store (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// GCP IAM backend
    pub iam: Arc<dyn IamClient>,
    /// Namespace restriction check, `None` when enforcement is disabled
    pub restrictions: Option<Arc<AccessRestrictionEvaluator>>,
    /// Project new service accounts are created in
    pub project: String,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(
        client: Client,
        iam: Arc<dyn IamClient>,
        project: impl Into<String>,
    ) -> ContextBuilder {
        ContextBuilder::new(client, iam, project.into())
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        iam: Arc<dyn IamClient>,
        restrictions: Option<Arc<AccessRestrictionEvaluator>>,
    ) -> Self {
        Self {
            kube,
            iam,
            restrictions,
            project: "test-project".to_string(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    iam: Arc<dyn IamClient>,
    project: String,
    restrictions_enabled: bool,
}

impl ContextBuilder {
    fn new(client: Client, iam: Arc<dyn IamClient>, project: String) -> Self {
        Self {
            client,
            iam,
            project,
            restrictions_enabled: true,
        }
    }

    /// Skip the namespace restriction check and apply all bindings unconditionally
    pub fn disable_restrictions(mut self, disabled: bool) -> Self {
        self.restrictions_enabled = !disabled;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let restrictions = self.restrictions_enabled.then(|| {
            let resolver = Arc::new(KubeRestrictionResolver::new(self.client.clone()));
            Arc::new(AccessRestrictionEvaluator::new(resolver))
        });

        Context {
            kube: Arc::new(KubeClientImpl::new(self.client)),
            iam: self.iam,
            restrictions,
            project: self.project,
        }
    }
}
