//! Permission aggregation over the role -> policy -> permission graph.

use crate::models::{CapabilitySet, Role, UserType};

/// Which tenant-scoped roles take part in an aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    /// Roles of this tenant plus system-wide roles. `None` keeps only system-wide roles.
    Tenant(Option<String>),
    /// System operations: every active role counts regardless of tenant.
    Bypass,
}

impl TenantScope {
    pub fn tenant(tenant_id: Option<&str>) -> Self {
        TenantScope::Tenant(tenant_id.map(str::to_string))
    }

    /// Admins are not tenant-bound and aggregate every role assigned to them.
    pub fn for_principal(user_type: UserType, tenant_id: Option<&str>) -> Self {
        match user_type {
            UserType::Admin => TenantScope::Bypass,
            _ => TenantScope::tenant(tenant_id),
        }
    }

    fn admits(&self, role: &Role) -> bool {
        if !role.is_active {
            return false;
        }
        match self {
            TenantScope::Bypass => true,
            TenantScope::Tenant(tenant) => {
                role.is_system_wide() || role.tenant_id.as_deref() == tenant.as_deref()
            }
        }
    }
}

/// Flatten roles into a capability set.
///
/// Pure and order-independent: any permutation of `roles` yields the same set.
/// Inactive roles, policies and permissions contribute nothing.
pub fn aggregate(roles: &[Role], scope: &TenantScope) -> CapabilitySet {
    let mut capabilities = CapabilitySet::new();

    for role in roles.iter().filter(|r| scope.admits(r)) {
        for policy in role.policies.iter().filter(|p| p.is_active) {
            for permission in policy.permissions.iter().filter(|p| p.is_active) {
                capabilities.grant(&permission.module, permission.action);
            }
        }
    }

    capabilities
}

/// Names of the roles `aggregate` would use, sorted and deduplicated.
pub fn eligible_role_names(roles: &[Role], scope: &TenantScope) -> Vec<String> {
    let mut names: Vec<String> = roles
        .iter()
        .filter(|r| scope.admits(r))
        .map(|r| r.name.clone())
        .collect();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Permission, Policy};

    fn role(id: i64, name: &str, tenant: Option<&str>, grants: &[(&str, Action)]) -> Role {
        let permissions = grants
            .iter()
            .map(|(module, action)| Permission::new(*module, *action))
            .collect();
        Role::new(
            id,
            name,
            tenant.map(str::to_string),
            vec![Policy::new(id, format!("{}Policy", name), permissions)],
        )
    }

    fn acme() -> TenantScope {
        TenantScope::tenant(Some("ACME"))
    }

    #[test]
    fn test_no_roles_yields_empty_set() {
        assert!(aggregate(&[], &acme()).is_empty());
    }

    #[test]
    fn test_wildcard_absorbs_specific_action() {
        let roles = vec![
            role(1, "Dispatcher", Some("ACME"), &[("booking", Action::All)]),
            role(2, "Viewer", Some("ACME"), &[("booking", Action::Read)]),
        ];

        let set = aggregate(&roles, &acme());
        let grants = set.to_grants();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].module, "booking");
        assert_eq!(
            grants[0].action,
            vec![
                Action::Create,
                Action::Read,
                Action::Update,
                Action::Delete,
                Action::All
            ]
        );
    }

    #[test]
    fn test_order_independent_and_idempotent() {
        let roles = vec![
            role(1, "A", Some("ACME"), &[("booking", Action::Read), ("route", Action::Update)]),
            role(2, "B", None, &[("booking", Action::All)]),
            role(3, "C", Some("ACME"), &[("vehicle", Action::Create), ("route", Action::Read)]),
            role(4, "D", Some("ACME"), &[("route", Action::Read)]),
        ];

        let expected = serde_json::to_vec(&aggregate(&roles, &acme())).unwrap();

        let mut reversed = roles.clone();
        reversed.reverse();
        let rotated: Vec<Role> = roles[2..].iter().chain(roles[..2].iter()).cloned().collect();
        let doubled: Vec<Role> = roles.iter().chain(roles.iter()).cloned().collect();

        for permutation in [reversed, rotated, doubled] {
            assert_eq!(
                serde_json::to_vec(&aggregate(&permutation, &acme())).unwrap(),
                expected
            );
        }
    }

    #[test]
    fn test_inactive_entries_are_excluded() {
        let mut inactive_role = role(1, "Old", Some("ACME"), &[("booking", Action::Delete)]);
        inactive_role.is_active = false;

        let mut inactive_policy = role(2, "Half", Some("ACME"), &[("route", Action::Read)]);
        inactive_policy.policies[0].is_active = false;

        let mut inactive_permission = role(3, "Perm", Some("ACME"), &[("vehicle", Action::Read)]);
        inactive_permission.policies[0].permissions[0].is_active = false;

        let set = aggregate(&[inactive_role, inactive_policy, inactive_permission], &acme());
        assert!(set.actions("booking").is_none());
        assert!(set.actions("route").is_none());
        assert!(set.actions("vehicle").is_none());
    }

    #[test]
    fn test_tenant_filtering() {
        let roles = vec![
            role(1, "Own", Some("ACME"), &[("booking", Action::Read)]),
            role(2, "Other", Some("GLOBEX"), &[("vehicle", Action::Delete)]),
            role(3, "System", None, &[("route", Action::Read)]),
        ];

        let set = aggregate(&roles, &acme());
        assert!(set.allows("booking", Action::Read));
        assert!(set.allows("route", Action::Read));
        assert!(!set.allows("vehicle", Action::Delete));
        assert_eq!(eligible_role_names(&roles, &acme()), vec!["Own", "System"]);

        let no_tenant = aggregate(&roles, &TenantScope::tenant(None));
        assert_eq!(no_tenant.modules().collect::<Vec<_>>(), vec!["route"]);

        let bypass = aggregate(&roles, &TenantScope::Bypass);
        assert_eq!(bypass.len(), 3);
        assert_eq!(
            TenantScope::for_principal(UserType::Admin, None),
            TenantScope::Bypass
        );
        assert_eq!(
            TenantScope::for_principal(UserType::Driver, Some("ACME")),
            acme()
        );
    }
}
