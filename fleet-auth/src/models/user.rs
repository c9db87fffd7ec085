//! User model - the principals that can log in.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Closed set of principal variants. Each has its own credential table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Admin,
    Employee,
    Driver,
    VendorUser,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Admin => "admin",
            UserType::Employee => "employee",
            UserType::Driver => "driver",
            UserType::VendorUser => "vendor_user",
        }
    }

    pub fn all() -> [UserType; 4] {
        [
            UserType::Admin,
            UserType::Employee,
            UserType::Driver,
            UserType::VendorUser,
        ]
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserType::Admin),
            "employee" => Ok(UserType::Employee),
            "driver" => Ok(UserType::Driver),
            "vendor_user" | "vendor-user" | "vendor" => Ok(UserType::VendorUser),
            _ => Err(format!("Invalid user type: {}", s)),
        }
    }
}

/// Client platform. A user holds at most one session per platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Web,
    App,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Web => "web",
            Platform::App => "app",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential record as returned by the credential store.
///
/// `tenant_id` is `None` for admins, who are not tenant-bound.
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: i64,
    pub user_type: UserType,
    pub tenant_id: Option<String>,
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub is_active: bool,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

/// User information safe to return to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    #[schema(example = 7)]
    pub user_id: i64,
    pub user_type: UserType,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "ACME")]
    pub tenant_id: Option<String>,
    #[schema(example = "Alice Doe")]
    pub name: String,
    #[schema(example = "alice@acme.test")]
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<crate::models::PermissionGrant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_type_round_trips_through_str() {
        for user_type in UserType::all() {
            assert_eq!(user_type.as_str().parse::<UserType>(), Ok(user_type));
        }
    }

    #[test]
    fn test_vendor_alias() {
        assert_eq!("vendor".parse::<UserType>(), Ok(UserType::VendorUser));
        assert_eq!("Vendor-User".parse::<UserType>(), Ok(UserType::VendorUser));
        assert!("pilot".parse::<UserType>().is_err());
    }

    #[test]
    fn test_platform_defaults_to_web() {
        assert_eq!(Platform::default(), Platform::Web);
        let parsed: Platform = serde_json::from_str("\"app\"").unwrap();
        assert_eq!(parsed, Platform::App);
    }
}
