//! Credentials secret construction

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};

use gsa_common::crd::GcpServiceAccount;

/// Label set on every secret holding a service account key
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Build the secret carrying a key file for `account`
///
/// The secret lives next to the account, holds `key_file` under `field`, and
/// is controller-owned by the account so it is garbage collected with it.
pub fn credentials_secret(account: &GcpServiceAccount, field: &str, key_file: Vec<u8>) -> Secret {
    let mut data = BTreeMap::new();
    data.insert(field.to_string(), ByteString(key_file));

    Secret {
        metadata: ObjectMeta {
            name: Some(account.spec.secret_name.clone()),
            namespace: account.namespace(),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                gsa_common::FIELD_MANAGER.to_string(),
            )])),
            owner_references: account.controller_owner_ref(&()).map(|owner| vec![owner]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Whether `secret` holds a non-empty value under `field`
pub fn has_populated_field(secret: &Secret, field: &str) -> bool {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(field))
        .is_some_and(|value| !value.0.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsa_common::crd::GcpServiceAccountSpec;

    fn account() -> GcpServiceAccount {
        let mut account = GcpServiceAccount::new(
            "uploader",
            GcpServiceAccountSpec {
                service_account_identifier: "uploader".to_string(),
                secret_name: "uploader-gcp".to_string(),
                ..Default::default()
            },
        );
        account.metadata.namespace = Some("team-a".to_string());
        account.metadata.uid = Some("3f1c0b7e-0000-4000-8000-000000000001".to_string());
        account
    }

    #[test]
    fn secret_is_owned_by_the_account() {
        let secret = credentials_secret(&account(), "credentials.json", b"{}".to_vec());

        assert_eq!(secret.metadata.name.as_deref(), Some("uploader-gcp"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("team-a"));

        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "GcpServiceAccount");
        assert_eq!(owners[0].name, "uploader");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn key_file_lands_under_the_configured_field() {
        let secret = credentials_secret(&account(), "key.json", b"{\"type\":\"x\"}".to_vec());
        assert!(has_populated_field(&secret, "key.json"));
        assert!(!has_populated_field(&secret, "credentials.json"));
    }

    #[test]
    fn empty_value_is_not_populated() {
        let secret = credentials_secret(&account(), "credentials.json", Vec::new());
        assert!(!has_populated_field(&secret, "credentials.json"));
        assert!(!has_populated_field(&Secret::default(), "credentials.json"));
    }
}
