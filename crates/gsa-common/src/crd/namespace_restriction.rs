//! GcpNamespaceRestriction CRD
//!
//! Cluster-scoped allow-list of resource/role combinations a namespace may
//! request for its GcpServiceAccounts.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// GcpNamespaceRestriction constrains the role bindings of one namespace.
///
/// Example:
/// ```yaml
/// apiVersion: gcp.gsa.dev/v1beta1
/// kind: GcpNamespaceRestriction
/// metadata:
///   name: team-a
/// spec:
///   namespace: team-a
///   regex: true
///   restrictions:
///     - resource: "buckets/team-a-.*"
///       roles: ["roles/storage\\..*"]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gcp.gsa.dev",
    version = "v1beta1",
    kind = "GcpNamespaceRestriction",
    shortname = "gnr",
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Regex","type":"boolean","jsonPath":".spec.regex"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GcpNamespaceRestrictionSpec {
    /// Namespace this restriction applies to
    pub namespace: String,

    /// Match resources and roles as full-string regular expressions instead of literally
    #[serde(default)]
    pub regex: bool,

    /// Allowed resource/role combinations, checked in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<GcpRestrictionRule>,
}

/// One allow-list entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GcpRestrictionRule {
    /// Resource pattern
    pub resource: String,

    /// Role patterns allowed on matching resources
    #[serde(default)]
    pub roles: Vec<String>,
}
