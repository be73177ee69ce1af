//! Authorization of requested role bindings against a namespace restriction

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use gsa_common::crd::{GcpNamespaceRestrictionSpec, GcpRestrictionRule, GcpRoleBinding};

use crate::error::Result;
use crate::resolver::RestrictionResolver;

/// Decides whether a namespace may request a set of role bindings
pub struct AccessRestrictionEvaluator {
    resolver: Arc<dyn RestrictionResolver>,
}

impl AccessRestrictionEvaluator {
    /// Create an evaluator resolving restrictions through `resolver`
    pub fn new(resolver: Arc<dyn RestrictionResolver>) -> Self {
        Self { resolver }
    }

    /// Whether `namespace` may request `requested`
    ///
    /// A namespace without a restriction record cannot be authorized: the
    /// resolver's not-found error is returned rather than an implicit allow.
    pub async fn authorize(&self, namespace: &str, requested: &[GcpRoleBinding]) -> Result<bool> {
        let restriction = self.resolver.resolve(namespace).await?;
        let allowed = evaluate(&restriction, requested);
        info!(namespace = %namespace, allowed, "evaluated namespace restriction");
        Ok(allowed)
    }
}

/// Evaluate `requested` against `restriction`
///
/// Only the first binding with a non-empty resource is checked. It is allowed
/// when the first rule whose resource matches also matches every requested
/// role. Regex mode uses full-string matching; a pattern that fails to
/// compile matches nothing.
pub fn evaluate(restriction: &GcpNamespaceRestrictionSpec, requested: &[GcpRoleBinding]) -> bool {
    let Some(binding) = requested.iter().find(|b| !b.resource.is_empty()) else {
        return false;
    };

    let mut matcher = Matcher::new(restriction.regex);
    let Some(rule) = find_rule(&mut matcher, &restriction.restrictions, &binding.resource) else {
        debug!(resource = %binding.resource, "no restriction rule matches resource");
        return false;
    };

    binding.roles.iter().all(|role| {
        let allowed = rule.roles.iter().any(|pattern| matcher.matches(pattern, role));
        if !allowed {
            debug!(resource = %binding.resource, role = %role, "role not allowed");
        }
        allowed
    })
}

fn find_rule<'a>(
    matcher: &mut Matcher,
    rules: &'a [GcpRestrictionRule],
    resource: &str,
) -> Option<&'a GcpRestrictionRule> {
    rules
        .iter()
        .find(|rule| !rule.resource.is_empty() && matcher.matches(&rule.resource, resource))
}

/// Literal or regex matcher, compiling each pattern at most once
struct Matcher {
    regex: bool,
    compiled: HashMap<String, Option<Regex>>,
}

impl Matcher {
    fn new(regex: bool) -> Self {
        Self {
            regex,
            compiled: HashMap::new(),
        }
    }

    fn matches(&mut self, pattern: &str, subject: &str) -> bool {
        if !self.regex {
            return pattern == subject;
        }

        let compiled = self
            .compiled
            .entry(pattern.to_string())
            .or_insert_with(|| match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(re) => Some(re),
                Err(e) => {
                    debug!(pattern = %pattern, error = %e, "invalid restriction pattern");
                    None
                }
            });
        compiled.as_ref().is_some_and(|re| re.is_match(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RestrictionError;
    use crate::resolver::MockRestrictionResolver;

    fn restriction(regex: bool, rules: Vec<(&str, Vec<&str>)>) -> GcpNamespaceRestrictionSpec {
        GcpNamespaceRestrictionSpec {
            namespace: "test".to_string(),
            regex,
            restrictions: rules
                .into_iter()
                .map(|(resource, roles)| GcpRestrictionRule {
                    resource: resource.to_string(),
                    roles: roles.iter().map(|r| r.to_string()).collect(),
                })
                .collect(),
        }
    }

    fn request(resource: &str, roles: &[&str]) -> Vec<GcpRoleBinding> {
        vec![GcpRoleBinding::new(resource, roles.iter().copied())]
    }

    #[test]
    fn regex_rule_allows_matching_bucket_role() {
        let spec = restriction(true, vec![("buckets.*", vec!["roles/storage.*"])]);
        assert!(evaluate(
            &spec,
            &request("buckets/my-bucket-name", &["roles/storage.objectAdmin"])
        ));
    }

    #[test]
    fn anchored_pattern_matches_the_same_subject() {
        let spec = restriction(true, vec![("^buckets.*$", vec!["^roles/storage.*$"])]);
        assert!(evaluate(
            &spec,
            &request("buckets/my-bucket-name", &["roles/storage.objectAdmin"])
        ));
    }

    #[test]
    fn regex_mode_requires_a_full_match() {
        let spec = restriction(true, vec![("buckets", vec!["roles/storage.*"])]);
        assert!(!evaluate(
            &spec,
            &request("buckets/my-bucket-name", &["roles/storage.objectAdmin"])
        ));
    }

    #[test]
    fn literal_rule_allows_exact_roles_only() {
        let spec = restriction(
            false,
            vec![("buckets/my-bucket-name", vec!["roles/storage.objectAdmin", "roles/xyz"])],
        );
        assert!(evaluate(
            &spec,
            &request("buckets/my-bucket-name", &["roles/storage.objectAdmin"])
        ));
        assert!(!evaluate(
            &spec,
            &request("buckets/my-bucket-name", &["roles/storage.viewer"])
        ));
    }

    #[test]
    fn literal_mode_does_not_interpret_patterns() {
        let spec = restriction(false, vec![("buckets.*", vec!["roles/storage.*"])]);
        assert!(!evaluate(
            &spec,
            &request("buckets/my-bucket-name", &["roles/storage.objectAdmin"])
        ));
    }

    #[test]
    fn every_requested_role_must_be_allowed() {
        let spec = restriction(true, vec![("buckets/.*", vec!["roles/storage\\.object.*"])]);
        assert!(!evaluate(
            &spec,
            &request(
                "buckets/b",
                &["roles/storage.objectViewer", "roles/storage.admin"]
            )
        ));
    }

    #[test]
    fn invalid_regex_never_matches() {
        let spec = restriction(true, vec![("buckets/(", vec!["roles/.*"]), ("buckets/.*", vec!["roles/("])]);
        assert!(!evaluate(&spec, &request("buckets/b", &["roles/viewer"])));
    }

    #[test]
    fn first_matching_rule_wins() {
        let spec = restriction(
            true,
            vec![
                ("buckets/.*", vec!["roles/storage.objectViewer"]),
                ("buckets/b", vec!["roles/storage.admin"]),
            ],
        );
        assert!(!evaluate(&spec, &request("buckets/b", &["roles/storage.admin"])));
    }

    #[test]
    fn rules_with_empty_resource_are_skipped() {
        let spec = restriction(false, vec![("", vec!["roles/viewer"]), ("projects/p", vec!["roles/viewer"])]);
        assert!(evaluate(&spec, &request("projects/p", &["roles/viewer"])));
    }

    #[test]
    fn unmatched_resource_is_denied() {
        let spec = restriction(false, vec![("projects/p", vec!["roles/viewer"])]);
        assert!(!evaluate(&spec, &request("projects/other", &["roles/viewer"])));
    }

    #[test]
    fn request_without_resource_is_denied() {
        let spec = restriction(false, vec![("projects/p", vec!["roles/viewer"])]);
        assert!(!evaluate(&spec, &request("", &["roles/viewer"])));
        assert!(!evaluate(&spec, &[]));
    }

    #[test]
    fn only_the_first_non_empty_binding_is_checked() {
        let spec = restriction(false, vec![("projects/p", vec!["roles/viewer"])]);
        let requested = vec![
            GcpRoleBinding::new("", ["roles/owner"]),
            GcpRoleBinding::new("projects/p", ["roles/viewer"]),
            GcpRoleBinding::new("projects/other", ["roles/owner"]),
        ];
        assert!(evaluate(&spec, &requested));
    }

    #[tokio::test]
    async fn authorize_uses_the_namespace_restriction() {
        let mut resolver = MockRestrictionResolver::new();
        resolver
            .expect_resolve()
            .withf(|ns| ns == "test")
            .returning(|_| Ok(restriction(true, vec![("buckets.*", vec!["roles/storage.*"])])));

        let evaluator = AccessRestrictionEvaluator::new(Arc::new(resolver));
        let allowed = evaluator
            .authorize(
                "test",
                &request("buckets/my-bucket-name", &["roles/storage.objectAdmin"]),
            )
            .await
            .unwrap();
        assert!(allowed);
    }

    #[tokio::test]
    async fn authorize_without_restriction_is_an_error() {
        let mut resolver = MockRestrictionResolver::new();
        resolver
            .expect_resolve()
            .returning(|ns| Err(RestrictionError::not_found(ns)));

        let evaluator = AccessRestrictionEvaluator::new(Arc::new(resolver));
        let err = evaluator
            .authorize("unrestricted", &request("projects/p", &["roles/viewer"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RestrictionError::NotFound { namespace } if namespace == "unrestricted"));
    }
}
