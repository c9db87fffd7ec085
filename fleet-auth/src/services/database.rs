//! PostgreSQL credential and RBAC store.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::BTreeMap;

use super::directory::{CredentialStore, RbacStore};
use super::error::ServiceError;
use crate::models::{Action, Permission, Policy, Role, User, UserType};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    user_id: i64,
    tenant_id: Option<String>,
    username: String,
    name: String,
    password_hash: String,
    is_active: bool,
}

impl CredentialRow {
    fn into_user(self, user_type: UserType) -> User {
        User {
            user_id: self.user_id,
            user_type,
            tenant_id: self.tenant_id,
            username: self.username,
            name: self.name,
            password_hash: self.password_hash,
            is_active: self.is_active,
        }
    }
}

/// One row of the flattened role -> policy -> permission join.
#[derive(Debug, FromRow)]
struct RoleGraphRow {
    role_id: i64,
    role_name: String,
    role_tenant_id: Option<String>,
    is_system_role: bool,
    role_active: bool,
    policy_id: Option<i64>,
    policy_name: Option<String>,
    policy_tenant_id: Option<String>,
    policy_active: Option<bool>,
    module: Option<String>,
    action: Option<String>,
    permission_active: Option<bool>,
}

const ADMIN_COLUMNS: &str = r#"
    SELECT a.admin_id AS user_id, NULL::TEXT AS tenant_id, a.email AS username,
           a.name, a.password AS password_hash, a.is_active
    FROM admin a
"#;

const EMPLOYEE_COLUMNS: &str = r#"
    SELECT e.employee_id AS user_id, e.tenant_id, e.email AS username,
           e.name, e.password AS password_hash, e.is_active
    FROM employees e
"#;

const DRIVER_COLUMNS: &str = r#"
    SELECT d.driver_id AS user_id, v.tenant_id, d.email AS username,
           d.name, d.password AS password_hash, d.is_active
    FROM drivers d
    JOIN vendors v ON v.vendor_id = d.vendor_id
"#;

const VENDOR_USER_COLUMNS: &str = r#"
    SELECT vu.vendor_user_id AS user_id, v.tenant_id, vu.email AS username,
           vu.name, vu.password AS password_hash, vu.is_active
    FROM vendor_users vu
    JOIN vendors v ON v.vendor_id = vu.vendor_id
"#;

fn by_identifier_query(user_type: UserType) -> String {
    match user_type {
        UserType::Admin => format!("{} WHERE a.email = $1 OR a.phone = $1", ADMIN_COLUMNS),
        UserType::Employee => format!(
            "{} WHERE (e.email = $1 OR e.phone = $1 OR e.employee_code = $1) \
             AND ($2::TEXT IS NULL OR e.tenant_id = $2)",
            EMPLOYEE_COLUMNS
        ),
        UserType::Driver => format!(
            "{} WHERE (d.email = $1 OR d.phone = $1 OR d.code = $1) \
             AND ($2::TEXT IS NULL OR v.tenant_id = $2)",
            DRIVER_COLUMNS
        ),
        UserType::VendorUser => format!(
            "{} WHERE (vu.email = $1 OR vu.phone = $1) \
             AND ($2::TEXT IS NULL OR v.tenant_id = $2)",
            VENDOR_USER_COLUMNS
        ),
    }
}

fn by_id_query(user_type: UserType) -> String {
    match user_type {
        UserType::Admin => format!("{} WHERE a.admin_id = $1", ADMIN_COLUMNS),
        UserType::Employee => format!("{} WHERE e.employee_id = $1", EMPLOYEE_COLUMNS),
        UserType::Driver => format!("{} WHERE d.driver_id = $1", DRIVER_COLUMNS),
        UserType::VendorUser => format!("{} WHERE vu.vendor_user_id = $1", VENDOR_USER_COLUMNS),
    }
}

const ROLE_GRAPH_QUERY: &str = r#"
    SELECT r.role_id, r.name AS role_name, r.tenant_id AS role_tenant_id,
           r.is_system_role, r.is_active AS role_active,
           p.policy_id, p.name AS policy_name, p.tenant_id AS policy_tenant_id,
           p.is_active AS policy_active,
           perm.module, perm.action, perm.is_active AS permission_active
    FROM iam_user_roles ur
    JOIN iam_roles r ON r.role_id = ur.role_id
    LEFT JOIN iam_role_policy rp ON rp.role_id = r.role_id
    LEFT JOIN iam_policies p ON p.policy_id = rp.policy_id
    LEFT JOIN iam_policy_permission pp ON pp.policy_id = p.policy_id
    LEFT JOIN iam_permissions perm ON perm.permission_id = pp.permission_id
    WHERE ur.user_type = $1
      AND ur.user_id = $2
      AND ur.is_active = TRUE
      AND (ur.tenant_id IS NULL OR ur.tenant_id = $3)
    ORDER BY r.role_id, p.policy_id, perm.permission_id
"#;

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Fold the flattened join back into roles, ordered by role id.
fn group_role_graph(rows: Vec<RoleGraphRow>) -> Vec<Role> {
    let mut roles: BTreeMap<i64, Role> = BTreeMap::new();

    for row in rows {
        let role = roles.entry(row.role_id).or_insert_with(|| Role {
            role_id: row.role_id,
            name: row.role_name.clone(),
            tenant_id: row.role_tenant_id.clone(),
            is_system: row.is_system_role,
            is_active: row.role_active,
            policies: Vec::new(),
        });

        let Some(policy_id) = row.policy_id else {
            continue;
        };

        let index = match role.policies.iter().position(|p| p.policy_id == policy_id) {
            Some(index) => index,
            None => {
                role.policies.push(Policy {
                    policy_id,
                    name: row.policy_name.clone().unwrap_or_default(),
                    tenant_id: row.policy_tenant_id.clone(),
                    is_active: row.policy_active.unwrap_or(false),
                    permissions: Vec::new(),
                });
                role.policies.len() - 1
            }
        };

        let (Some(module), Some(action)) = (row.module, row.action) else {
            continue;
        };

        match action.parse::<Action>() {
            Ok(action) => role.policies[index].permissions.push(Permission {
                module,
                action,
                is_active: row.permission_active.unwrap_or(false),
            }),
            Err(e) => {
                tracing::warn!(role_id = row.role_id, policy_id, module = %module, error = %e, "Skipping permission with unknown action");
            }
        }
    }

    roles.into_values().collect()
}

#[async_trait]
impl CredentialStore for Database {
    async fn find_by_identifier(
        &self,
        user_type: UserType,
        identifier: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<User>, ServiceError> {
        let query = by_identifier_query(user_type);
        let mut q = sqlx::query_as::<_, CredentialRow>(&query).bind(identifier);
        if user_type != UserType::Admin {
            q = q.bind(tenant_id);
        }

        let mut rows = q.fetch_all(&self.pool).await?;
        if rows.len() > 1 {
            tracing::debug!(user_type = %user_type, matches = rows.len(), "Identifier is ambiguous without a tenant");
            return Ok(None);
        }

        Ok(rows.pop().map(|row| row.into_user(user_type)))
    }

    async fn find_by_id(&self, user_type: UserType, user_id: i64) -> Result<Option<User>, ServiceError> {
        let query = by_id_query(user_type);
        let row = sqlx::query_as::<_, CredentialRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.into_user(user_type)))
    }

    async fn health_check(&self) -> Result<(), ServiceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(|e| {
            tracing::error!("Database health check failed: {}", e);
            ServiceError::Database(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl RbacStore for Database {
    async fn roles_for(
        &self,
        user_type: UserType,
        user_id: i64,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Role>, ServiceError> {
        let rows = sqlx::query_as::<_, RoleGraphRow>(ROLE_GRAPH_QUERY)
            .bind(user_type.as_str())
            .bind(user_id)
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(group_role_graph(rows))
    }
}
