//! Capability set - the flattened module to actions mapping.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;

use super::rbac::Action;

/// Wire form of one module's grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionGrant {
    #[schema(example = "booking")]
    pub module: String,
    pub action: Vec<Action>,
}

/// Module name mapped to an ordered set of granted actions.
///
/// Both levels are ordered, so two sets built from the same grants in any
/// order serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PermissionGrant>", into = "Vec<PermissionGrant>")]
pub struct CapabilitySet(BTreeMap<String, BTreeSet<Action>>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one grant. A wildcard replaces the module's set with the full vocabulary.
    pub fn grant(&mut self, module: &str, action: Action) {
        let actions = self.0.entry(module.to_string()).or_default();
        if action == Action::All {
            actions.extend(Action::VOCABULARY);
        } else {
            actions.insert(action);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn actions(&self, module: &str) -> Option<&BTreeSet<Action>> {
        self.0.get(module)
    }

    /// True when `module` grants `action` directly or through `*`.
    pub fn allows(&self, module: &str, action: Action) -> bool {
        self.0
            .get(module)
            .map(|actions| actions.contains(&action) || actions.contains(&Action::All))
            .unwrap_or(false)
    }

    /// Checks a `module.action` string such as `booking.read`.
    ///
    /// Unparseable strings are never allowed.
    pub fn allows_key(&self, key: &str) -> bool {
        match parse_permission_key(key) {
            Some((module, action)) => self.allows(module, action),
            None => false,
        }
    }

    pub fn to_grants(&self) -> Vec<PermissionGrant> {
        self.0
            .iter()
            .map(|(module, actions)| PermissionGrant {
                module: module.clone(),
                action: actions.iter().copied().collect(),
            })
            .collect()
    }
}

/// Split `module.action` on the last dot so module names may contain dots.
pub fn parse_permission_key(key: &str) -> Option<(&str, Action)> {
    let (module, action) = key.rsplit_once('.')?;
    if module.is_empty() {
        return None;
    }
    Some((module, action.parse().ok()?))
}

impl From<Vec<PermissionGrant>> for CapabilitySet {
    fn from(grants: Vec<PermissionGrant>) -> Self {
        let mut set = CapabilitySet::new();
        for grant in grants {
            for action in grant.action {
                set.grant(&grant.module, action);
            }
        }
        set
    }
}

impl From<CapabilitySet> for Vec<PermissionGrant> {
    fn from(set: CapabilitySet) -> Self {
        set.to_grants()
    }
}
