//! RBAC graph: roles own policies, policies own permissions.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Permission verb. `All` (`*`) grants every verb on its module.
///
/// Variant order is the canonical ordering of action sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub enum Action {
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "read")]
    Read,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "*")]
    All,
}

impl Action {
    /// Full vocabulary a wildcard expands to.
    pub const VOCABULARY: [Action; 5] = [
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
        Action::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::All => "*",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(Action::Create),
            "read" => Ok(Action::Read),
            "update" => Ok(Action::Update),
            "delete" => Ok(Action::Delete),
            "*" => Ok(Action::All),
            other => Err(format!("Invalid permission action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub module: String,
    pub action: Action,
    pub is_active: bool,
}

impl Permission {
    pub fn new(module: impl Into<String>, action: Action) -> Self {
        Self {
            module: module.into(),
            action,
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub policy_id: i64,
    pub name: String,
    pub tenant_id: Option<String>,
    pub is_active: bool,
    pub permissions: Vec<Permission>,
}

impl Policy {
    pub fn new(policy_id: i64, name: impl Into<String>, permissions: Vec<Permission>) -> Self {
        Self {
            policy_id,
            name: name.into(),
            tenant_id: None,
            is_active: true,
            permissions,
        }
    }
}

/// Role with its policies pre-loaded.
///
/// A role with `tenant_id == None` (or `is_system`) applies in every tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub role_id: i64,
    pub name: String,
    pub tenant_id: Option<String>,
    pub is_system: bool,
    pub is_active: bool,
    pub policies: Vec<Policy>,
}

impl Role {
    pub fn new(
        role_id: i64,
        name: impl Into<String>,
        tenant_id: Option<String>,
        policies: Vec<Policy>,
    ) -> Self {
        Self {
            role_id,
            name: name.into(),
            is_system: tenant_id.is_none(),
            tenant_id,
            is_active: true,
            policies,
        }
    }

    pub fn is_system_wide(&self) -> bool {
        self.is_system || self.tenant_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_wire_names() {
        assert_eq!(serde_json::to_string(&Action::All).unwrap(), "\"*\"");
        assert_eq!(serde_json::to_string(&Action::Read).unwrap(), "\"read\"");
        assert_eq!("DELETE".parse::<Action>(), Ok(Action::Delete));
        assert!("approve".parse::<Action>().is_err());
    }

    #[test]
    fn test_vocabulary_is_sorted() {
        let mut sorted = Action::VOCABULARY;
        sorted.sort();
        assert_eq!(sorted, Action::VOCABULARY);
    }

    #[test]
    fn test_role_without_tenant_is_system_wide() {
        let role = Role::new(1, "SuperAdmin", None, vec![]);
        assert!(role.is_system_wide());

        let role = Role::new(2, "Dispatcher", Some("ACME".to_string()), vec![]);
        assert!(!role.is_system_wide());
    }
}
