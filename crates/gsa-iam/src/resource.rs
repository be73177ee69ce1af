//! Resolution of role-binding resource strings to IAM-enabled resources
//!
//! A binding names its resource either relatively (`projects/my-project`,
//! `buckets/my-bucket`) or as a full resource name
//! (`//storage.googleapis.com/projects/_/buckets/my-bucket`). Both resolve to
//! the same [`IamResource`], whose canonical name is used to group bindings.

use std::fmt;

use crate::error::{IamError, Result};

/// Kind of IAM-enabled resource
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    /// Cloud Resource Manager project
    Project,
    /// Cloud Storage bucket
    Bucket,
    /// Pub/Sub topic
    Topic,
    /// Pub/Sub subscription
    Subscription,
    /// IAM service account (as a resource others are granted roles on)
    ServiceAccount,
    /// Secret Manager secret
    Secret,
}

impl ResourceKind {
    /// Host of the API owning this kind
    pub fn service(&self) -> &'static str {
        match self {
            Self::Project => "cloudresourcemanager.googleapis.com",
            Self::Bucket => "storage.googleapis.com",
            Self::Topic | Self::Subscription => "pubsub.googleapis.com",
            Self::ServiceAccount => "iam.googleapis.com",
            Self::Secret => "secretmanager.googleapis.com",
        }
    }
}

/// A resolved IAM-enabled resource
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IamResource {
    kind: ResourceKind,
    /// Canonical relative name, e.g. `projects/_/buckets/my-bucket`
    name: String,
}

impl IamResource {
    /// Resolve a resource string from a role binding
    pub fn parse(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(IamError::invalid_resource(pattern, "resource is empty"));
        }

        let (service, relative) = match trimmed.strip_prefix("//") {
            Some(full) => {
                let (host, rest) = full.split_once('/').ok_or_else(|| {
                    IamError::invalid_resource(pattern, "full resource name has no path")
                })?;
                (Some(host), rest)
            }
            None => (None, trimmed),
        };

        let segments: Vec<&str> = relative.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(IamError::invalid_resource(pattern, "empty path segment"));
        }

        let (kind, name) = match segments.as_slice() {
            ["projects", project] => (ResourceKind::Project, format!("projects/{}", project)),
            ["buckets", bucket] | ["projects", "_", "buckets", bucket] => {
                (ResourceKind::Bucket, format!("projects/_/buckets/{}", bucket))
            }
            ["projects", project, "topics", topic] => (
                ResourceKind::Topic,
                format!("projects/{}/topics/{}", project, topic),
            ),
            ["projects", project, "subscriptions", subscription] => (
                ResourceKind::Subscription,
                format!("projects/{}/subscriptions/{}", project, subscription),
            ),
            ["projects", project, "serviceAccounts", account] => (
                ResourceKind::ServiceAccount,
                format!("projects/{}/serviceAccounts/{}", project, account),
            ),
            ["projects", project, "secrets", secret] => (
                ResourceKind::Secret,
                format!("projects/{}/secrets/{}", project, secret),
            ),
            _ => {
                return Err(IamError::invalid_resource(
                    pattern,
                    "unsupported resource type",
                ))
            }
        };

        if let Some(host) = service {
            if host != kind.service() {
                return Err(IamError::invalid_resource(
                    pattern,
                    format!("{:?} resources are served by {}, not {}", kind, kind.service(), host),
                ));
            }
        }

        Ok(Self { kind, name })
    }

    /// Kind of the resource
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Canonical relative name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last path segment (bucket name, project id, ...)
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl fmt::Display for IamResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
