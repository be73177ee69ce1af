//! Service account id generation

use std::sync::OnceLock;

use regex::Regex;

/// Maximum length of a GCP service account id
pub const SERVICE_ACCOUNT_ID_MAX_LEN: usize = 30;

/// Prefix of every generated account id
pub const SERVICE_ACCOUNT_ID_PREFIX: &str = "kube";

fn disallowed() -> &'static Regex {
    static DISALLOWED: OnceLock<Regex> = OnceLock::new();
    DISALLOWED.get_or_init(|| Regex::new("[^a-zA-Z0-9-]+").expect("static pattern is valid"))
}

/// Derive a service account id from a user identifier and a Unix timestamp
///
/// Runs of characters outside `[a-zA-Z0-9-]` become a single `-`. The result
/// is `kube{identifier}-{timestamp}`, with the identifier (never the
/// timestamp) truncated to stay within 30 characters.
pub fn service_account_id(identifier: &str, unix_seconds: i64) -> String {
    let sanitized = disallowed().replace_all(identifier, "-");
    let suffix = format!("-{}", unix_seconds);

    let budget = SERVICE_ACCOUNT_ID_MAX_LEN
        .saturating_sub(SERVICE_ACCOUNT_ID_PREFIX.len())
        .saturating_sub(suffix.len());
    // Sanitized text is ASCII, so byte slicing is char slicing
    let body = &sanitized[..sanitized.len().min(budget)];

    format!("{}{}{}", SERVICE_ACCOUNT_ID_PREFIX, body, suffix)
}

/// [`service_account_id`] using the current time
pub fn service_account_id_now(identifier: &str) -> String {
    service_account_id(identifier, chrono::Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_700_000_000;

    fn assert_well_formed(id: &str) {
        assert!(id.len() <= SERVICE_ACCOUNT_ID_MAX_LEN, "{id} too long");
        assert!(
            id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'),
            "{id} has invalid characters"
        );
    }

    #[test]
    fn short_identifier_is_kept() {
        assert_eq!(service_account_id("uploader", TS), "kubeuploader-1700000000");
    }

    #[test]
    fn disallowed_runs_collapse_to_one_dash() {
        let id = service_account_id("my_app.v2!!x", TS);
        assert_eq!(id, "kubemy-app-v2-x-1700000000");
        assert_well_formed(&id);
    }

    #[test]
    fn long_identifier_is_truncated_not_the_timestamp() {
        let id = service_account_id("a-very-long-identifier-for-a-service", TS);
        assert_eq!(id.len(), SERVICE_ACCOUNT_ID_MAX_LEN);
        assert!(id.starts_with("kubea-very-long"));
        assert!(id.ends_with("-1700000000"));
        assert_well_formed(&id);
    }

    #[test]
    fn non_ascii_input_is_sanitized() {
        let id = service_account_id("dienst-für-übersicht", TS);
        assert_well_formed(&id);
        assert!(id.ends_with("-1700000000"));
    }

    #[test]
    fn ids_differ_across_seconds() {
        let a = service_account_id("a-very-long-identifier-for-a-service", TS);
        let b = service_account_id("a-very-long-identifier-for-a-service", TS + 1);
        assert_ne!(a, b);
        assert_well_formed(&a);
        assert_well_formed(&b);
    }

    #[test]
    fn empty_identifier_still_yields_an_id() {
        let id = service_account_id("", TS);
        assert_eq!(id, "kube-1700000000");
    }
}
