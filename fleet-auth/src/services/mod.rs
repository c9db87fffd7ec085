//! Services layer: the authentication and authorization core.

mod auth;
pub mod cache_backend;
mod database;
pub mod directory;
pub mod error;
pub mod introspection;
mod jwt;
pub mod local_cache;
mod memory;
pub mod permissions;
pub mod redis;
pub mod session;
pub mod token_store;

pub use auth::{AuthService, IssuedTokens, LoginCommand, LoginOutcome};
pub use cache_backend::CacheBackend;
pub use database::Database;
pub use directory::{CredentialStore, RbacStore};
pub use error::ServiceError;
pub use introspection::IntrospectionService;
pub use jwt::{
    generate_opaque_token, AccessTokenClaims, JwtService, RefreshTokenClaims, TokenSubject,
    TokenType,
};
pub use local_cache::{LocalCache, Retention};
pub use memory::InMemoryDirectory;
pub use permissions::{aggregate, eligible_role_names, TenantScope};
pub use redis::{KeyValueStore, MockKeyValueStore, RedisService};
pub use session::{SessionKey, SessionRegistry};
pub use token_store::TokenStore;
