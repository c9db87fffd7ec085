//! Read-only collaborators: user credentials and the RBAC graph.

use async_trait::async_trait;

use super::error::ServiceError;
use crate::models::{Role, User, UserType};

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a user by login identifier (email, phone or code).
    ///
    /// `tenant_id` narrows the search for tenant-bound user types; an identifier
    /// that matches users in several tenants without one yields `None`.
    async fn find_by_identifier(
        &self,
        user_type: UserType,
        identifier: &str,
        tenant_id: Option<&str>,
    ) -> Result<Option<User>, ServiceError>;

    async fn find_by_id(&self, user_type: UserType, user_id: i64) -> Result<Option<User>, ServiceError>;

    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    /// Roles assigned to the user, with policies and permissions loaded.
    ///
    /// Assignments bound to another tenant are excluded. Inactive entries are
    /// returned as-is; filtering them is the aggregator's job.
    async fn roles_for(
        &self,
        user_type: UserType,
        user_id: i64,
        tenant_id: Option<&str>,
    ) -> Result<Vec<Role>, ServiceError>;
}
