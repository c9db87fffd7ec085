//! HTTP handlers for fleet-auth.

pub mod auth;
pub mod health;
pub mod metrics;

pub use auth::*;
pub use health::*;
