//! Seedable in-memory directory for tests and local development.

use async_trait::async_trait;
use std::sync::RwLock;

use super::directory::{CredentialStore, RbacStore};
use super::error::ServiceError;
use crate::models::{Role, User, UserType};

struct Assignment {
    user_type: UserType,
    user_id: i64,
    tenant_id: Option<String>,
    role_id: i64,
    is_active: bool,
}

/// Users, roles and role assignments held in memory.
///
/// Role edits are visible to the next lookup, which lets tests change the RBAC
/// graph between logins.
#[derive(Default)]
pub struct InMemoryDirectory {
    users: RwLock<Vec<User>>,
    roles: RwLock<Vec<Role>>,
    assignments: RwLock<Vec<Assignment>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: User) {
        if let Ok(mut users) = self.users.write() {
            users.retain(|u| !(u.user_type == user.user_type && u.user_id == user.user_id));
            users.push(user);
        }
    }

    /// Insert or replace a role by id.
    pub fn upsert_role(&self, role: Role) {
        if let Ok(mut roles) = self.roles.write() {
            roles.retain(|r| r.role_id != role.role_id);
            roles.push(role);
        }
    }

    /// Assign a role. `tenant_id == None` makes the assignment valid in every tenant.
    pub fn assign_role(&self, user_type: UserType, user_id: i64, role_id: i64, tenant_id: Option<&str>) {
        if let Ok(mut assignments) = self.assignments.write() {
            assignments.push(Assignment {
                user_type,
                user_id,
                tenant_id: tenant_id.map(str::to_string),
                role_id,
                is_active: true,
            });
        }
    }

    pub fn set_user_active(&self, user_type: UserType, user_id: i64, is_active: bool) {
        if let Ok(mut users) = self.users.write() {
            for user in users
                .iter_mut()
                .filter(|u| u.user_type == user_type && u.user_id == user_id)
            {
                user.is_active = is_active;
            }
        }
    }

    fn poisoned(what: &str) -> ServiceError {
        ServiceError::AuthProcessFailed(anyhow::anyhow!("In-memory {} lock poisoned", what))
    }
}

fn matches_identifier(user: &User, identifier: &str) -> bool {
    user.username.eq_ignore_ascii_case(identifier)
}

#[async_trait]
impl CredentialStore for InMemoryDirectory {
    async fn find_by_identifier(
        &self,
        user_type: UserType,
        identifier: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<User>, ServiceError> {
        let users = self.users.read().map_err(|_| Self::poisoned("user"))?;
        let mut matches = users.iter().filter(|u| {
            u.user_type == user_type
                && matches_identifier(u, identifier)
                && (user_type == UserType::Admin
                    || tenant_id.is_none()
                    || u.tenant_id.as_deref() == tenant_id)
        });

        match (matches.next(), matches.next()) {
            (Some(user), None) => Ok(Some(user.clone())),
            _ => Ok(None),
        }
    }

    async fn find_by_id(&self, user_type: UserType, user_id: i64) -> Result<Option<User>, ServiceError> {
        let users = self.users.read().map_err(|_| Self::poisoned("user"))?;
        Ok(users
            .iter()
            .find(|u| u.user_type == user_type && u.user_id == user_id)
            .cloned())
    }
}

#[async_trait]
impl RbacStore for InMemoryDirectory {
    async fn roles_for(
        &self,
        user_type: UserType,
        user_id: i64,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Role>, ServiceError> {
        let assignments = self.assignments.read().map_err(|_| Self::poisoned("assignment"))?;
        let roles = self.roles.read().map_err(|_| Self::poisoned("role"))?;

        let mut role_ids: Vec<i64> = assignments
            .iter()
            .filter(|a| {
                a.is_active
                    && a.user_type == user_type
                    && a.user_id == user_id
                    && (a.tenant_id.is_none() || a.tenant_id.as_deref() == tenant_id)
            })
            .map(|a| a.role_id)
            .collect();
        role_ids.sort_unstable();
        role_ids.dedup();

        Ok(role_ids
            .into_iter()
            .filter_map(|id| roles.iter().find(|r| r.role_id == id).cloned())
            .collect())
    }
}
