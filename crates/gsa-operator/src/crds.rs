//! CRD installation utilities
//!
//! The operator installs its own CRDs on startup using server-side apply so
//! the schema always matches the running version.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use gsa_common::crd::{GcpNamespaceRestriction, GcpServiceAccount};
use gsa_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: &'static str,
    crd: CustomResourceDefinition,
}

fn all_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: "gcpserviceaccounts.gcp.gsa.dev",
            crd: GcpServiceAccount::crd(),
        },
        CrdDef {
            name: "gcpnamespacerestrictions.gcp.gsa.dev",
            crd: GcpNamespaceRestriction::crd(),
        },
    ]
}

/// Install or update every CRD the operator serves
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in all_crds() {
        tracing::info!(crd = def.name, "installing CRD");
        crds.patch(def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install CRD {}: {}", def.name, e))?;
    }

    tracing::info!("all CRDs installed/updated");
    Ok(())
}

/// All CRDs as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let docs = all_crds()
        .into_iter()
        .map(|def| {
            serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("failed to serialize CRD {}: {}", def.name, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(docs.join("---\n"))
}
