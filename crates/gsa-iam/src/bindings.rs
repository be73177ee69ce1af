//! Role binding convergence
//!
//! Given the bindings last applied for an account and the bindings now
//! desired, computes per-resource role deltas and applies them to the remote
//! policies. Remote policies are always fetched fresh before a write.
//!
//! Removal and addition on the same resource are two independent
//! fetch-modify-write cycles. The addition reads the policy after the removal
//! was written, so nothing of ours is lost; a concurrent foreign edit between
//! the two is caught by the etag carried on each write.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use gsa_common::crd::GcpRoleBinding;

use crate::client::IamClient;
use crate::error::Result;
use crate::policy::member_for;
use crate::resource::IamResource;

/// Summary of the writes a reconciliation performed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingChanges {
    /// Policies written back
    pub policies_written: usize,
    /// Policies fetched but left untouched because nothing changed
    pub policies_unchanged: usize,
    /// Roles granted across all resources
    pub roles_added: usize,
    /// Roles revoked across all resources
    pub roles_removed: usize,
}

/// Roles to grant and revoke on one resource
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct RoleDelta {
    to_add: BTreeSet<String>,
    to_remove: BTreeSet<String>,
}

/// Converges the role grants of one account against remote IAM policies
pub struct PolicyBindingEngine {
    iam: Arc<dyn IamClient>,
}

impl PolicyBindingEngine {
    /// Create an engine writing through `iam`
    pub fn new(iam: Arc<dyn IamClient>) -> Self {
        Self { iam }
    }

    /// Move `email` from the `applied` grants to the `desired` grants
    ///
    /// Every resource string of both inputs is resolved before the first
    /// write; an unresolvable one aborts without touching any policy. Fetch
    /// and write failures abort immediately, leaving resources already
    /// processed in this call committed.
    pub async fn reconcile(
        &self,
        applied: &[GcpRoleBinding],
        desired: &[GcpRoleBinding],
        email: &str,
    ) -> Result<BindingChanges> {
        let plan = plan(applied, desired)?;
        let member = member_for(email);
        let mut changes = BindingChanges::default();

        for (resource, delta) in &plan {
            if !delta.to_remove.is_empty() {
                let mut policy = self.iam.get_policy(resource).await?;
                if policy.remove_member(delta.to_remove.iter().map(String::as_str), &member) {
                    self.iam.set_policy(resource, &policy).await?;
                    changes.policies_written += 1;
                    changes.roles_removed += delta.to_remove.len();
                    info!(resource = %resource, roles = ?delta.to_remove, "revoked roles");
                } else {
                    changes.policies_unchanged += 1;
                    debug!(resource = %resource, "role binding not changed, skipping write");
                }
            }

            if !delta.to_add.is_empty() {
                let mut policy = self.iam.get_policy(resource).await?;
                if policy.add_member(delta.to_add.iter().map(String::as_str), &member) {
                    self.iam.set_policy(resource, &policy).await?;
                    changes.policies_written += 1;
                    changes.roles_added += delta.to_add.len();
                    info!(resource = %resource, roles = ?delta.to_add, "granted roles");
                } else {
                    changes.policies_unchanged += 1;
                    debug!(resource = %resource, "role binding not changed, skipping write");
                }
            }
        }

        Ok(changes)
    }

    /// Revoke every grant in `applied` from `email`
    pub async fn revoke_all(&self, applied: &[GcpRoleBinding], email: &str) -> Result<BindingChanges> {
        self.reconcile(applied, &[], email).await
    }
}

/// Roles per resolved resource, merging bindings that name the same resource
fn group(bindings: &[GcpRoleBinding]) -> Result<BTreeMap<IamResource, BTreeSet<String>>> {
    let mut grouped: BTreeMap<IamResource, BTreeSet<String>> = BTreeMap::new();
    for binding in bindings {
        let resource = IamResource::parse(&binding.resource)?;
        grouped
            .entry(resource)
            .or_default()
            .extend(binding.roles.iter().cloned());
    }
    Ok(grouped)
}

fn plan(
    applied: &[GcpRoleBinding],
    desired: &[GcpRoleBinding],
) -> Result<BTreeMap<IamResource, RoleDelta>> {
    let previous = group(applied)?;
    let wanted = group(desired)?;
    let empty = BTreeSet::new();

    let resources: BTreeSet<&IamResource> = previous.keys().chain(wanted.keys()).collect();
    let mut plan = BTreeMap::new();
    for resource in resources {
        let before = previous.get(resource).unwrap_or(&empty);
        let after = wanted.get(resource).unwrap_or(&empty);
        let delta = RoleDelta {
            to_add: after.difference(before).cloned().collect(),
            to_remove: before.difference(after).cloned().collect(),
        };
        if delta != RoleDelta::default() {
            plan.insert(resource.clone(), delta);
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::client::{CloudCredentialKey, CloudIdentity, ServiceAccountKeyRef};
    use crate::error::IamError;
    use crate::policy::Policy;

    const EMAIL: &str = "kubeuploader-1700000000@p.iam.gserviceaccount.com";

    /// In-memory IAM backend that tracks policy reads and writes
    #[derive(Default)]
    struct FakeIam {
        policies: Mutex<BTreeMap<IamResource, Policy>>,
        gets: AtomicUsize,
        sets: AtomicUsize,
        fail_get: bool,
    }

    impl FakeIam {
        fn with_member(resource: &str, role: &str, member: &str) -> Self {
            let fake = Self::default();
            let mut policy = Policy::default();
            policy.add_member([role], member);
            fake.policies
                .lock()
                .unwrap()
                .insert(IamResource::parse(resource).unwrap(), policy);
            fake
        }

        fn has(&self, resource: &str, role: &str, member: &str) -> bool {
            self.policies
                .lock()
                .unwrap()
                .get(&IamResource::parse(resource).unwrap())
                .is_some_and(|p| p.has_member(role, member))
        }

        fn sets(&self) -> usize {
            self.sets.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IamClient for FakeIam {
        async fn get_service_account(&self, _path: &str) -> Result<bool> {
            unimplemented!()
        }
        async fn create_service_account(
            &self,
            _project: &str,
            _account_id: &str,
            _display_name: &str,
        ) -> Result<CloudIdentity> {
            unimplemented!()
        }
        async fn delete_service_account(&self, _path: &str) -> Result<()> {
            unimplemented!()
        }
        async fn list_user_managed_keys(&self, _path: &str) -> Result<Vec<ServiceAccountKeyRef>> {
            unimplemented!()
        }
        async fn create_key(&self, _path: &str) -> Result<CloudCredentialKey> {
            unimplemented!()
        }
        async fn delete_key(&self, _name: &str) -> Result<()> {
            unimplemented!()
        }

        async fn get_policy(&self, resource: &IamResource) -> Result<Policy> {
            if self.fail_get {
                return Err(IamError::Api {
                    status: 503,
                    resource: resource.to_string(),
                    message: "backend unavailable".to_string(),
                });
            }
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .policies
                .lock()
                .unwrap()
                .get(resource)
                .cloned()
                .unwrap_or_default())
        }

        async fn set_policy(&self, resource: &IamResource, policy: &Policy) -> Result<Policy> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.policies
                .lock()
                .unwrap()
                .insert(resource.clone(), policy.clone());
            Ok(policy.clone())
        }
    }

    fn engine(fake: &Arc<FakeIam>) -> PolicyBindingEngine {
        PolicyBindingEngine::new(fake.clone())
    }

    fn member() -> String {
        member_for(EMAIL)
    }

    #[tokio::test]
    async fn grants_every_desired_role() {
        let fake = Arc::new(FakeIam::default());
        let desired = vec![
            GcpRoleBinding::new("buckets/exports", ["roles/storage.objectAdmin"]),
            GcpRoleBinding::new("projects/p", ["roles/pubsub.publisher", "roles/logging.logWriter"]),
        ];

        let changes = engine(&fake).reconcile(&[], &desired, EMAIL).await.unwrap();

        assert_eq!(changes.policies_written, 2);
        assert_eq!(changes.roles_added, 3);
        assert!(fake.has("buckets/exports", "roles/storage.objectAdmin", &member()));
        assert!(fake.has("projects/p", "roles/pubsub.publisher", &member()));
        assert!(fake.has("projects/p", "roles/logging.logWriter", &member()));
    }

    #[tokio::test]
    async fn converged_state_performs_no_writes() {
        let fake = Arc::new(FakeIam::default());
        let desired = vec![GcpRoleBinding::new("buckets/exports", ["roles/storage.objectAdmin"])];

        engine(&fake).reconcile(&[], &desired, EMAIL).await.unwrap();
        let writes_after_first = fake.sets();

        let changes = engine(&fake)
            .reconcile(&desired, &desired, EMAIL)
            .await
            .unwrap();

        assert_eq!(changes, BindingChanges::default());
        assert_eq!(fake.sets(), writes_after_first);
    }

    #[tokio::test]
    async fn revokes_roles_no_longer_desired() {
        let fake = Arc::new(FakeIam::with_member(
            "buckets/exports",
            "roles/storage.objectAdmin",
            "user:alice@example.com",
        ));
        let applied = vec![GcpRoleBinding::new(
            "buckets/exports",
            ["roles/storage.objectAdmin", "roles/storage.objectViewer"],
        )];
        engine(&fake).reconcile(&[], &applied, EMAIL).await.unwrap();

        let desired = vec![GcpRoleBinding::new("buckets/exports", ["roles/storage.objectViewer"])];
        let changes = engine(&fake)
            .reconcile(&applied, &desired, EMAIL)
            .await
            .unwrap();

        assert_eq!(changes.roles_removed, 1);
        assert_eq!(changes.roles_added, 0);
        assert!(!fake.has("buckets/exports", "roles/storage.objectAdmin", &member()));
        assert!(fake.has("buckets/exports", "roles/storage.objectViewer", &member()));
        assert!(fake.has(
            "buckets/exports",
            "roles/storage.objectAdmin",
            "user:alice@example.com"
        ));
    }

    #[tokio::test]
    async fn roles_are_scoped_to_their_resource() {
        let fake = Arc::new(FakeIam::default());
        let applied = vec![GcpRoleBinding::new("buckets/a", ["roles/storage.objectViewer"])];
        engine(&fake).reconcile(&[], &applied, EMAIL).await.unwrap();

        let desired = vec![GcpRoleBinding::new("buckets/b", ["roles/storage.objectViewer"])];
        engine(&fake)
            .reconcile(&applied, &desired, EMAIL)
            .await
            .unwrap();

        assert!(!fake.has("buckets/a", "roles/storage.objectViewer", &member()));
        assert!(fake.has("buckets/b", "roles/storage.objectViewer", &member()));
    }

    #[tokio::test]
    async fn removal_and_addition_on_one_resource_both_land() {
        let fake = Arc::new(FakeIam::default());
        let applied = vec![GcpRoleBinding::new("projects/p", ["roles/viewer"])];
        engine(&fake).reconcile(&[], &applied, EMAIL).await.unwrap();

        let desired = vec![GcpRoleBinding::new("projects/p", ["roles/editor"])];
        let changes = engine(&fake)
            .reconcile(&applied, &desired, EMAIL)
            .await
            .unwrap();

        assert_eq!(changes.policies_written, 2);
        assert!(!fake.has("projects/p", "roles/viewer", &member()));
        assert!(fake.has("projects/p", "roles/editor", &member()));
    }

    #[tokio::test]
    async fn respelling_a_resource_is_not_a_change() {
        let fake = Arc::new(FakeIam::default());
        let applied = vec![GcpRoleBinding::new(
            "projects/_/buckets/exports",
            ["roles/storage.objectViewer"],
        )];
        engine(&fake).reconcile(&[], &applied, EMAIL).await.unwrap();
        let writes = fake.sets();

        let desired = vec![GcpRoleBinding::new("buckets/exports", ["roles/storage.objectViewer"])];
        engine(&fake)
            .reconcile(&applied, &desired, EMAIL)
            .await
            .unwrap();

        assert_eq!(fake.sets(), writes);
        assert!(fake.has("buckets/exports", "roles/storage.objectViewer", &member()));
    }

    #[tokio::test]
    async fn drifted_policy_skips_no_op_write() {
        // Applied says the role is granted, but someone already removed it remotely
        let fake = Arc::new(FakeIam::default());
        let applied = vec![GcpRoleBinding::new("projects/p", ["roles/viewer"])];

        let changes = engine(&fake).revoke_all(&applied, EMAIL).await.unwrap();

        assert_eq!(changes.policies_unchanged, 1);
        assert_eq!(fake.sets(), 0);
    }

    #[tokio::test]
    async fn unresolvable_resource_aborts_before_any_write() {
        let fake = Arc::new(FakeIam::default());
        let desired = vec![
            GcpRoleBinding::new("buckets/exports", ["roles/storage.objectViewer"]),
            GcpRoleBinding::new("zones/z/instances/vm", ["roles/compute.viewer"]),
        ];

        let err = engine(&fake).reconcile(&[], &desired, EMAIL).await.unwrap_err();

        assert!(matches!(err, IamError::InvalidResource { .. }));
        assert_eq!(fake.sets(), 0);
        assert_eq!(fake.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_failure_propagates() {
        let fake = Arc::new(FakeIam {
            fail_get: true,
            ..Default::default()
        });
        let desired = vec![GcpRoleBinding::new("projects/p", ["roles/viewer"])];

        let err = engine(&fake).reconcile(&[], &desired, EMAIL).await.unwrap_err();
        assert!(matches!(err, IamError::Api { status: 503, .. }));
    }

    #[test]
    fn plan_merges_duplicate_resource_entries() {
        let desired = vec![
            GcpRoleBinding::new("projects/p", ["roles/viewer"]),
            GcpRoleBinding::new("projects/p", ["roles/editor"]),
        ];
        let plan = plan(&[], &desired).unwrap();
        let delta = &plan[&IamResource::parse("projects/p").unwrap()];
        assert_eq!(delta.to_add.len(), 2);
        assert!(delta.to_remove.is_empty());
    }
}
