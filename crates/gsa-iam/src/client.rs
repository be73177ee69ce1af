//! IAM backend abstraction
//!
//! The controller and the binding engine only talk to GCP through
//! [`IamClient`], so tests substitute a mock or an in-memory fake.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;
use crate::policy::Policy;
use crate::resource::IamResource;

/// A service account as returned on creation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudIdentity {
    /// Account email, e.g. `kubeuploader-1700000000@my-project.iam.gserviceaccount.com`
    pub email: String,
    /// Resource path, `projects/{project}/serviceAccounts/{email}`
    pub path: String,
}

/// A freshly created key, including its private material
#[derive(Clone, PartialEq, Eq)]
pub struct CloudCredentialKey {
    /// Key resource name, `projects/{p}/serviceAccounts/{email}/keys/{id}`
    pub name: String,
    /// Base64-encoded key file
    pub private_key_data: String,
}

impl std::fmt::Debug for CloudCredentialKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudCredentialKey")
            .field("name", &self.name)
            .field("private_key_data", &"<redacted>")
            .finish()
    }
}

/// An existing key, without private material
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccountKeyRef {
    /// Key resource name
    pub name: String,
}

/// Operations against the GCP IAM backend
///
/// Not-found answers are reported as `Ok(false)` / an empty list where the
/// signature allows it, and as [`crate::IamError::NotFound`] otherwise.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamClient: Send + Sync {
    /// Whether the service account at `path` exists
    async fn get_service_account(&self, path: &str) -> Result<bool>;

    /// Create a service account in `project`
    async fn create_service_account(
        &self,
        project: &str,
        account_id: &str,
        display_name: &str,
    ) -> Result<CloudIdentity>;

    /// Delete the service account at `path`
    ///
    /// Returns `IamError::NotFound` if it is already gone.
    async fn delete_service_account(&self, path: &str) -> Result<()>;

    /// List user-managed keys of the service account at `path`
    async fn list_user_managed_keys(&self, path: &str) -> Result<Vec<ServiceAccountKeyRef>>;

    /// Create a key for the service account at `path`
    async fn create_key(&self, path: &str) -> Result<CloudCredentialKey>;

    /// Delete the key with resource name `name`
    async fn delete_key(&self, name: &str) -> Result<()>;

    /// Fetch the current IAM policy of a resource
    async fn get_policy(&self, resource: &IamResource) -> Result<Policy>;

    /// Replace the IAM policy of a resource
    async fn set_policy(&self, resource: &IamResource, policy: &Policy) -> Result<Policy>;
}
