//! Controller runner - wires the GcpServiceAccount controller to its watches

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use gsa_common::crd::{GcpNamespaceRestriction, GcpServiceAccount};
use gsa_common::FIELD_MANAGER;
use gsa_controller::secret::MANAGED_BY_LABEL;
use gsa_controller::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Run the GcpServiceAccount controller until shutdown is signalled
///
/// Besides the accounts themselves, the controller follows:
/// - the credentials secrets it owns, so a deleted or emptied secret is rewritten
/// - namespace restrictions, so a changed restriction re-evaluates every
///   account in its namespace
pub async fn run_service_account_controller(client: Client, ctx: Arc<Context>) {
    let accounts: Api<GcpServiceAccount> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client.clone());
    let restrictions: Api<GcpNamespaceRestriction> = Api::all(client);

    let managed_secrets = format!("{}={}", MANAGED_BY_LABEL, FIELD_MANAGER);

    let controller = Controller::new(
        accounts,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    );
    let store = controller.store();

    tracing::info!("- GcpServiceAccount controller");

    controller
        .owns(
            secrets,
            WatcherConfig::default()
                .timeout(WATCH_TIMEOUT_SECS)
                .labels(&managed_secrets),
        )
        .watches(
            restrictions,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            move |restriction| {
                let namespace = restriction.spec.namespace.clone();
                let affected: Vec<ObjectRef<GcpServiceAccount>> = store
                    .state()
                    .iter()
                    .filter(|account| account.namespace().as_deref() == Some(namespace.as_str()))
                    .map(|account| ObjectRef::from_obj(account.as_ref()))
                    .collect();

                tracing::debug!(
                    restriction = %restriction.name_any(),
                    namespace = %namespace,
                    affected_count = affected.len(),
                    "namespace restriction changed, re-evaluating service accounts"
                );
                affected
            },
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("GcpServiceAccount"))
        .await;
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
