pub mod auth;
pub mod introspect_secret;
pub mod permission;

pub use auth::{auth_middleware, bearer_token, AuthUser};
pub use introspect_secret::introspect_secret_middleware;
pub use permission::{require_permissions, PermissionChecker};
