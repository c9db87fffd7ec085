pub mod capability;
pub mod claims;
pub mod rbac;
pub mod user;

pub use capability::{parse_permission_key, CapabilitySet, PermissionGrant};
pub use claims::{BasicTokenInfo, TokenClaims};
pub use rbac::{Action, Permission, Policy, Role};
pub use user::{Platform, User, UserSummary, UserType};
