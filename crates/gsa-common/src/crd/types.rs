//! Shared CRD building blocks

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A set of roles granted on a single GCP resource
///
/// Roles are a list on the wire but compared as a set: order and duplicates
/// carry no meaning.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpRoleBinding {
    /// Resource name, e.g. `projects/my-project` or `buckets/my-bucket`
    pub resource: String,

    /// Roles to grant, e.g. `roles/storage.objectViewer`
    #[serde(default)]
    pub roles: Vec<String>,
}

impl GcpRoleBinding {
    /// Create a binding from a resource and roles
    pub fn new<I, S>(resource: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource: resource.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// Roles as a set
    pub fn role_set(&self) -> BTreeSet<&str> {
        self.roles.iter().map(String::as_str).collect()
    }
}

impl PartialEq for GcpRoleBinding {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource && self.role_set() == other.role_set()
    }
}

impl Eq for GcpRoleBinding {}
