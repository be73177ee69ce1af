//! GcpServiceAccount reconciliation
//!
//! Each reconcile reads the record as delivered by the watcher, works out its
//! [`LifecycleState`], and converges the cloud side toward its `spec`:
//!
//! 1. finalizer present
//! 2. namespace restriction allows the requested bindings
//! 3. service account exists
//! 4. role bindings match `spec.gcpRoleBindings`
//! 5. a live key exists and is written to the secret
//!
//! Deletion revokes the applied bindings and deletes the service account
//! before the finalizer is released.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use gsa_common::crd::{GcpServiceAccount, GcpServiceAccountStatus, ServiceAccountPhase};
use gsa_common::SERVICE_ACCOUNT_FINALIZER;
use gsa_iam::naming::service_account_id_now;
use gsa_iam::PolicyBindingEngine;
use gsa_restriction::RestrictionError;

use crate::context::Context;
use crate::error::ReconcileError;
use crate::secret::{credentials_secret, has_populated_field};

/// Delay before re-reading a record after a write conflict
const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Delay before retrying a failed reconcile
const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Where a GcpServiceAccount is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not being deleted
    Active,
    /// Deletion requested, cloud cleanup still owed
    Finalizing,
    /// Deletion requested and cleanup done
    Terminal,
}

impl LifecycleState {
    /// Lifecycle state of `account`
    pub fn of(account: &GcpServiceAccount) -> Self {
        match (account.is_deleting(), account.has_finalizer()) {
            (false, _) => Self::Active,
            (true, true) => Self::Finalizing,
            (true, false) => Self::Terminal,
        }
    }
}

/// Reconcile a GcpServiceAccount
#[instrument(
    skip(account, ctx),
    fields(service_account = %account.name_any(), namespace = ?account.namespace())
)]
pub async fn reconcile(
    account: Arc<GcpServiceAccount>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let name = account.name_any();
    let namespace = account
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace { name: name.clone() })?;

    match LifecycleState::of(&account) {
        LifecycleState::Terminal => {
            debug!("deletion complete, nothing to do");
            return Ok(Action::await_change());
        }
        LifecycleState::Finalizing => return finalize(&account, &name, &namespace, &ctx).await,
        LifecycleState::Active => {}
    }

    info!("reconciling service account");

    if let Err(e) = account.spec.validate(&name) {
        warn!(error = %e, "service account validation failed");
        let mut status = account.status_or_default();
        status.phase = ServiceAccountPhase::Failed;
        status.message = Some(e.to_string());
        update_status(&account, &name, &namespace, &ctx, &status).await?;
        // Needs a spec change, not a retry
        return Ok(Action::await_change());
    }

    if !account.has_finalizer() {
        info!("adding finalizer");
        match ctx
            .kube
            .add_finalizer(&name, &namespace, SERVICE_ACCOUNT_FINALIZER)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!("conflict adding finalizer, requeueing");
                return Ok(Action::requeue(CONFLICT_REQUEUE));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let mut status = account.status_or_default();

    if let Some(denial) = check_restrictions(&account, &name, &namespace, &ctx).await? {
        warn!(reason = %denial, "role bindings denied by namespace restriction");
        status.phase = ServiceAccountPhase::Denied;
        status.message = Some(denial);
        update_status(&account, &name, &namespace, &ctx, &status).await?;
        // Re-evaluated when the account or its namespace restriction changes
        return Ok(Action::await_change());
    }

    ensure_identity(&account, &name, &namespace, &ctx, &mut status).await?;

    let engine = PolicyBindingEngine::new(ctx.iam.clone());
    let changes = engine
        .reconcile(
            &status.applied_gcp_role_bindings,
            &account.spec.gcp_role_bindings,
            &status.service_account_mail,
        )
        .await?;
    debug!(
        written = changes.policies_written,
        added = changes.roles_added,
        removed = changes.roles_removed,
        "role bindings converged"
    );
    if status.applied_gcp_role_bindings != account.spec.gcp_role_bindings {
        // Persisted before key handling
        status.applied_gcp_role_bindings = account.spec.gcp_role_bindings.clone();
        ctx.kube.patch_status(&name, &namespace, &status).await?;
    }

    ensure_credentials(&account, &name, &namespace, &ctx, &mut status).await?;

    status.phase = ServiceAccountPhase::Ready;
    status.message = None;
    update_status(&account, &name, &namespace, &ctx, &status).await?;

    info!(email = %status.service_account_mail, "service account ready");
    Ok(Action::await_change())
}

/// Error policy for the GcpServiceAccount controller
///
/// Store conflicts are retried right away against fresh state; everything else
/// waits a fixed delay.
pub fn error_policy(
    account: Arc<GcpServiceAccount>,
    error: &ReconcileError,
    _ctx: Arc<Context>,
) -> Action {
    if error.is_conflict() {
        debug!(service_account = %account.name_any(), "write conflict, requeueing");
        return Action::requeue(CONFLICT_REQUEUE);
    }

    error!(
        ?error,
        service_account = %account.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Returns the denial reason when the namespace may not request the account's bindings
async fn check_restrictions(
    account: &GcpServiceAccount,
    name: &str,
    namespace: &str,
    ctx: &Context,
) -> Result<Option<String>, ReconcileError> {
    let Some(restrictions) = &ctx.restrictions else {
        return Ok(None);
    };

    match restrictions
        .authorize(namespace, &account.spec.gcp_role_bindings)
        .await
    {
        Ok(true) => Ok(None),
        Ok(false) => Ok(Some(format!(
            "namespace {} is not allowed the role bindings requested by {}",
            namespace, name
        ))),
        // No declared policy means nothing can be authorized
        Err(e @ RestrictionError::NotFound { .. }) => Ok(Some(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Make sure the recorded service account exists, creating a new one if not
async fn ensure_identity(
    account: &GcpServiceAccount,
    name: &str,
    namespace: &str,
    ctx: &Context,
    status: &mut GcpServiceAccountStatus,
) -> Result<(), ReconcileError> {
    if !status.service_account_path.is_empty()
        && ctx
            .iam
            .get_service_account(&status.service_account_path)
            .await?
    {
        return Ok(());
    }

    if !status.service_account_mail.is_empty() {
        warn!(
            email = %status.service_account_mail,
            "service account no longer exists, creating a new one"
        );
    }

    let spec = &account.spec;
    let account_id = service_account_id_now(&spec.service_account_identifier);
    let display_name = if spec.service_account_description.is_empty() {
        &spec.service_account_identifier
    } else {
        &spec.service_account_description
    };

    let identity = ctx
        .iam
        .create_service_account(&ctx.project, &account_id, display_name)
        .await?;
    info!(email = %identity.email, "created service account");

    status.service_account_path = identity.path;
    status.service_account_mail = identity.email;
    // Grants and keys belonged to the previous identity
    status.applied_gcp_role_bindings.clear();
    status.credential_key.clear();
    status.phase = ServiceAccountPhase::Pending;
    ctx.kube.patch_status(name, namespace, status).await?;
    Ok(())
}

/// Make sure a live key exists and is written to the secret
///
/// A new key is minted when the recorded key is gone, the secret is missing,
/// or the secret's field is empty. All existing user-managed keys are deleted
/// first so at most one is live.
async fn ensure_credentials(
    account: &GcpServiceAccount,
    name: &str,
    namespace: &str,
    ctx: &Context,
    status: &mut GcpServiceAccountStatus,
) -> Result<(), ReconcileError> {
    let field = account.spec.secret_key();
    let path = status.service_account_path.clone();

    let keys = ctx.iam.list_user_managed_keys(&path).await?;
    let key_exists =
        !status.credential_key.is_empty() && keys.iter().any(|k| k.name == status.credential_key);

    let secret = ctx.kube.get_secret(&account.spec.secret_name, namespace).await?;
    let secret_populated = secret
        .as_ref()
        .is_some_and(|s| has_populated_field(s, field));

    if key_exists && secret_populated {
        debug!("credentials secret up to date");
        return Ok(());
    }

    info!(
        secret = %account.spec.secret_name,
        key_exists,
        secret_exists = secret.is_some(),
        "rotating service account key"
    );

    for key in &keys {
        match ctx.iam.delete_key(&key.name).await {
            Ok(()) => debug!(key = %key.name, "deleted key"),
            Err(e) if e.is_not_found() => debug!(key = %key.name, "key already deleted"),
            Err(e) => return Err(e.into()),
        }
    }

    let key = ctx.iam.create_key(&path).await?;
    let key_file = base64::engine::general_purpose::STANDARD
        .decode(key.private_key_data.as_bytes())
        .map_err(|source| ReconcileError::KeyDecode {
            key: key.name.clone(),
            source,
        })?;

    status.credential_key = key.name.clone();
    ctx.kube.patch_status(name, namespace, status).await?;

    let secret = credentials_secret(account, field, key_file);
    ctx.kube.apply_secret(&secret).await?;
    info!(key = %key.name, secret = %account.spec.secret_name, "wrote credentials secret");
    Ok(())
}

/// Release cloud state, then the finalizer
async fn finalize(
    account: &GcpServiceAccount,
    name: &str,
    namespace: &str,
    ctx: &Context,
) -> Result<Action, ReconcileError> {
    info!("cleaning up service account");
    let status = account.status_or_default();

    if !status.service_account_mail.is_empty() && !status.applied_gcp_role_bindings.is_empty() {
        let engine = PolicyBindingEngine::new(ctx.iam.clone());
        let changes = engine
            .revoke_all(
                &status.applied_gcp_role_bindings,
                &status.service_account_mail,
            )
            .await?;
        debug!(removed = changes.roles_removed, "revoked role bindings");
    }

    if !status.service_account_path.is_empty() {
        match ctx
            .iam
            .delete_service_account(&status.service_account_path)
            .await
        {
            Ok(()) => info!(email = %status.service_account_mail, "deleted service account"),
            Err(e) if e.is_not_found() => debug!("service account already deleted"),
            Err(e) => return Err(e.into()),
        }
    }

    match ctx
        .kube
        .remove_finalizer(name, namespace, SERVICE_ACCOUNT_FINALIZER)
        .await
    {
        Ok(()) => Ok(Action::await_change()),
        Err(e) if e.is_conflict() => {
            debug!("conflict removing finalizer, requeueing");
            Ok(Action::requeue(CONFLICT_REQUEUE))
        }
        Err(e) => Err(e.into()),
    }
}

/// Persist `status` unless it matches what the record already shows
async fn update_status(
    account: &GcpServiceAccount,
    name: &str,
    namespace: &str,
    ctx: &Context,
    status: &GcpServiceAccountStatus,
) -> Result<(), ReconcileError> {
    if account.status.as_ref() == Some(status) {
        debug!("status unchanged, skipping update");
        return Ok(());
    }
    ctx.kube.patch_status(name, namespace, status).await?;
    Ok(())
}
