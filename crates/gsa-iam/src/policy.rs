//! Remote IAM policy model
//!
//! Unconditional bindings are held as `role -> members` so membership edits
//! are set operations. Conditional bindings and unknown fields are carried
//! through untouched so a write never drops grants we do not manage.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Policy version required when conditional bindings are present
pub const CONDITIONAL_POLICY_VERSION: i32 = 3;

/// IAM member string for a service account email
pub fn member_for(email: &str) -> String {
    format!("serviceAccount:{}", email)
}

/// An IAM policy as fetched from a resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Policy {
    /// Policy format version
    pub version: Option<i32>,
    /// Concurrency token; writes based on a stale read are rejected
    pub etag: Option<String>,
    /// Unconditional bindings, role to members
    pub bindings: BTreeMap<String, BTreeSet<String>>,
    conditional: Vec<WireBinding>,
    extra: Map<String, Value>,
}

impl Policy {
    /// Whether `member` holds `role` unconditionally
    pub fn has_member(&self, role: &str, member: &str) -> bool {
        self.bindings
            .get(role)
            .is_some_and(|members| members.contains(member))
    }

    /// Grant `roles` to `member`, creating role entries as needed
    ///
    /// Returns true if the policy changed.
    pub fn add_member<'a>(&mut self, roles: impl IntoIterator<Item = &'a str>, member: &str) -> bool {
        let mut changed = false;
        for role in roles {
            changed |= self
                .bindings
                .entry(role.to_string())
                .or_default()
                .insert(member.to_string());
        }
        changed
    }

    /// Revoke `roles` from `member`, dropping roles left without members
    ///
    /// Returns true if the policy changed.
    pub fn remove_member<'a>(
        &mut self,
        roles: impl IntoIterator<Item = &'a str>,
        member: &str,
    ) -> bool {
        let mut changed = false;
        for role in roles {
            if let Some(members) = self.bindings.get_mut(role) {
                changed |= members.remove(member);
                if members.is_empty() {
                    self.bindings.remove(role);
                }
            }
        }
        changed
    }

    pub(crate) fn from_wire(wire: WirePolicy) -> Self {
        let mut bindings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut conditional = Vec::new();
        for binding in wire.bindings {
            if binding.condition.is_some() {
                conditional.push(binding);
            } else {
                bindings
                    .entry(binding.role)
                    .or_default()
                    .extend(binding.members);
            }
        }
        Self {
            version: wire.version,
            etag: wire.etag,
            bindings,
            conditional,
            extra: wire.extra,
        }
    }

    pub(crate) fn to_wire(&self) -> WirePolicy {
        let mut bindings: Vec<WireBinding> = self
            .bindings
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(role, members)| WireBinding {
                role: role.clone(),
                members: members.iter().cloned().collect(),
                condition: None,
            })
            .collect();
        bindings.extend(self.conditional.iter().cloned());

        let version = if self.conditional.is_empty() {
            self.version
        } else {
            Some(CONDITIONAL_POLICY_VERSION)
        };

        WirePolicy {
            version,
            etag: self.etag.clone(),
            bindings,
            extra: self.extra.clone(),
        }
    }
}

/// Policy as serialized by the Google APIs
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WirePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub bindings: Vec<WireBinding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireBinding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}
