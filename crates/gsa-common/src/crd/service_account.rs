//! GcpServiceAccount CRD
//!
//! Declares a GCP service account, the roles it should hold, and the Secret
//! its key is written to.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::GcpRoleBinding;
use crate::{Error, DEFAULT_SECRET_KEY, SERVICE_ACCOUNT_FINALIZER};

/// GcpServiceAccount declares a cloud identity owned by a namespace.
///
/// Example:
/// ```yaml
/// apiVersion: gcp.gsa.dev/v1beta1
/// kind: GcpServiceAccount
/// metadata:
///   name: uploader
///   namespace: team-a
/// spec:
///   serviceAccountIdentifier: uploader
///   serviceAccountDescription: Uploads nightly exports
///   secretName: uploader-gcp
///   gcpRoleBindings:
///     - resource: buckets/team-a-exports
///       roles: [roles/storage.objectAdmin]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gcp.gsa.dev",
    version = "v1beta1",
    kind = "GcpServiceAccount",
    namespaced,
    status = "GcpServiceAccountStatus",
    shortname = "gsa",
    printcolumn = r#"{"name":"Identifier","type":"string","jsonPath":".spec.serviceAccountIdentifier"}"#,
    printcolumn = r#"{"name":"Email","type":"string","jsonPath":".status.serviceAccountMail"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GcpServiceAccountSpec {
    /// Human-chosen identifier; the account id is derived from it
    pub service_account_identifier: String,

    /// Display name of the created account
    #[serde(default)]
    pub service_account_description: String,

    /// Roles to grant the account, per resource
    #[serde(default)]
    pub gcp_role_bindings: Vec<GcpRoleBinding>,

    /// Secret (in the same namespace) receiving the account key
    pub secret_name: String,

    /// Secret field holding the key file. Defaults to `credentials.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
}

impl GcpServiceAccountSpec {
    /// Validate the spec, returning the first problem found
    pub fn validate(&self, name: &str) -> Result<(), Error> {
        if self.service_account_identifier.trim().is_empty() {
            return Err(Error::validation_for_field(
                name,
                "spec.serviceAccountIdentifier",
                "serviceAccountIdentifier must not be empty",
            ));
        }
        if self.secret_name.trim().is_empty() {
            return Err(Error::validation_for_field(
                name,
                "spec.secretName",
                "secretName must not be empty",
            ));
        }
        if let Some(i) = self
            .gcp_role_bindings
            .iter()
            .position(|b| b.resource.trim().is_empty())
        {
            return Err(Error::validation_for_field(
                name,
                format!("spec.gcpRoleBindings[{}].resource", i),
                "resource must not be empty",
            ));
        }
        Ok(())
    }

    /// Secret field the key is written to
    pub fn secret_key(&self) -> &str {
        match self.secret_key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => DEFAULT_SECRET_KEY,
        }
    }
}

/// Lifecycle phase reported to users
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ServiceAccountPhase {
    /// Not yet fully reconciled
    #[default]
    Pending,
    /// Account, bindings, and secret match `spec`
    Ready,
    /// The namespace restriction does not allow the requested bindings
    Denied,
    /// `spec` is invalid
    Failed,
}

impl std::fmt::Display for ServiceAccountPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Denied => write!(f, "Denied"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Observed state of a GcpServiceAccount
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcpServiceAccountStatus {
    /// Full resource path, `projects/{project}/serviceAccounts/{email}`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_path: String,

    /// Account email; fixed once assigned
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_mail: String,

    /// Resource name of the key currently written to the secret
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub credential_key: String,

    /// Bindings last written successfully to the remote policies
    #[serde(default)]
    pub applied_gcp_role_bindings: Vec<GcpRoleBinding>,

    /// Current lifecycle phase
    #[serde(default)]
    pub phase: ServiceAccountPhase,

    /// Human-readable reason for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GcpServiceAccount {
    /// Whether our finalizer is present
    pub fn has_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|f| f == SERVICE_ACCOUNT_FINALIZER)
    }

    /// Whether deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Observed status, or the empty status when none has been written yet
    pub fn status_or_default(&self) -> GcpServiceAccountStatus {
        self.status.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    fn sample_spec() -> GcpServiceAccountSpec {
        GcpServiceAccountSpec {
            service_account_identifier: "uploader".to_string(),
            service_account_description: "uploads things".to_string(),
            gcp_role_bindings: vec![GcpRoleBinding::new(
                "buckets/exports",
                ["roles/storage.objectAdmin"],
            )],
            secret_name: "uploader-gcp".to_string(),
            secret_key: None,
        }
    }

    #[test]
    fn valid_spec_passes() {
        assert!(sample_spec().validate("uploader").is_ok());
    }

    #[test]
    fn empty_identifier_is_rejected() {
        let mut spec = sample_spec();
        spec.service_account_identifier = " ".to_string();
        let err = spec.validate("uploader").unwrap_err();
        assert!(err.to_string().contains("serviceAccountIdentifier"));
    }

    #[test]
    fn empty_secret_name_is_rejected() {
        let mut spec = sample_spec();
        spec.secret_name = String::new();
        assert!(spec.validate("uploader").is_err());
    }

    #[test]
    fn binding_without_resource_is_rejected() {
        let mut spec = sample_spec();
        spec.gcp_role_bindings
            .push(GcpRoleBinding::new("", ["roles/viewer"]));
        match spec.validate("uploader") {
            Err(Error::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("spec.gcpRoleBindings[1].resource"))
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn secret_key_defaults_when_unset_or_empty() {
        let mut spec = sample_spec();
        assert_eq!(spec.secret_key(), DEFAULT_SECRET_KEY);
        spec.secret_key = Some(String::new());
        assert_eq!(spec.secret_key(), DEFAULT_SECRET_KEY);
        spec.secret_key = Some("key.json".to_string());
        assert_eq!(spec.secret_key(), "key.json");
    }

    #[test]
    fn finalizer_and_deletion_detection() {
        let mut sa = GcpServiceAccount::new("uploader", sample_spec());
        assert!(!sa.has_finalizer());
        assert!(!sa.is_deleting());

        sa.metadata = ObjectMeta {
            name: Some("uploader".to_string()),
            finalizers: Some(vec![SERVICE_ACCOUNT_FINALIZER.to_string()]),
            ..Default::default()
        };
        assert!(sa.has_finalizer());
    }

    #[test]
    fn spec_uses_camel_case_wire_names() {
        let json = serde_json::to_value(sample_spec()).unwrap();
        assert_eq!(json["serviceAccountIdentifier"], "uploader");
        assert_eq!(json["gcpRoleBindings"][0]["resource"], "buckets/exports");
        assert!(json.get("secretKey").is_none());
    }

    #[test]
    fn crd_renders_to_yaml() {
        use kube::CustomResourceExt;
        let yaml = serde_yaml::to_string(&GcpServiceAccount::crd()).unwrap();
        assert!(yaml.contains("gcpserviceaccounts.gcp.gsa.dev"));
    }
}
