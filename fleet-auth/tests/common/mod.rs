//! Shared harness for fleet-auth integration tests.
//!
//! Builds the real router over in-memory collaborators: an `InMemoryDirectory`
//! for credentials and RBAC, and a `MockKeyValueStore` as the durable tier.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use fleet_auth::{
    build_router,
    config::{
        AuthConfig, DatabaseConfig, Environment, JwtConfig, LocalCacheConfig, RateLimitConfig,
        RedisConfig, SecurityConfig, SessionConfig,
    },
    models::{Action, Permission, Policy, Role, User, UserType},
    services::{
        AuthService, CacheBackend, CredentialStore, InMemoryDirectory, IntrospectionService,
        JwtService, KeyValueStore, LocalCache, MockKeyValueStore, RbacStore, SessionRegistry,
        TokenStore,
    },
    utils::{hash_password, Password},
    AppState,
};
use serde_json::Value;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tower::ServiceExt;

pub const TEST_INTROSPECT_SECRET: &str = "test-introspect-secret";
pub const TEST_PASSWORD: &str = "Secret123!";
pub const ALICE: &str = "alice@acme.test";
pub const BOB: &str = "bob@acme.test";
pub const ALICE_ID: i64 = 7;
pub const BOB_ID: i64 = 8;

pub const DISPATCHER_ROLE: i64 = 1;
pub const VIEWER_ROLE: i64 = 2;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub directory: Arc<InMemoryDirectory>,
    pub tokens: TokenStore,
    /// `None` when the app runs in local-only mode.
    pub durable: Option<Arc<MockKeyValueStore>>,
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "fleet-auth-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
            min_connections: 1,
            run_migrations: false,
        },
        redis: RedisConfig {
            enabled: true,
            url: "redis://unused".to_string(),
            timeout_ms: 200,
        },
        jwt: JwtConfig {
            secret: "integration-test-signing-secret-0123456789".to_string(),
            access_token_expiry_hours: 1,
            refresh_token_expiry_days: 7,
        },
        session: SessionConfig {
            enforced_user_types: vec![UserType::Employee, UserType::Driver],
        },
        local_cache: LocalCacheConfig {
            max_entries: 1000,
            max_ttl_seconds: 3600,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            introspect_secret: TEST_INTROSPECT_SECRET.to_string(),
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            global_ip_limit: 1000,
            global_ip_window_seconds: 60,
        },
    }
}

fn password_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| {
        hash_password(&Password::new(TEST_PASSWORD.to_string()))
            .expect("hash test password")
            .into_string()
    })
    .clone()
}

fn employee(user_id: i64, username: &str, name: &str) -> User {
    User {
        user_id,
        user_type: UserType::Employee,
        tenant_id: Some("ACME".to_string()),
        username: username.to_string(),
        name: name.to_string(),
        password_hash: password_hash(),
        is_active: true,
    }
}

/// alice holds a system-wide read-only role; bob is a tenant Dispatcher.
pub fn seed_directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());

    directory.add_user(employee(ALICE_ID, ALICE, "Alice"));
    directory.add_user(employee(BOB_ID, BOB, "Bob"));
    directory.add_user(User {
        user_id: 1,
        user_type: UserType::Admin,
        tenant_id: None,
        username: "root@fleet.test".to_string(),
        name: "Root".to_string(),
        password_hash: password_hash(),
        is_active: true,
    });

    directory.upsert_role(Role::new(
        DISPATCHER_ROLE,
        "Dispatcher",
        Some("ACME".to_string()),
        vec![Policy::new(
            10,
            "Booking management",
            vec![Permission::new("booking", Action::All)],
        )],
    ));
    directory.upsert_role(Role::new(
        VIEWER_ROLE,
        "Viewer",
        None,
        vec![Policy::new(
            20,
            "Read only",
            vec![
                Permission::new("employee", Action::Read),
                Permission::new("booking", Action::Read),
            ],
        )],
    ));

    directory.assign_role(UserType::Employee, ALICE_ID, VIEWER_ROLE, None);
    directory.assign_role(UserType::Employee, BOB_ID, DISPATCHER_ROLE, Some("ACME"));

    directory
}

pub async fn spawn_app() -> TestApp {
    let durable = Arc::new(MockKeyValueStore::new());
    build_app(test_config(), Some(durable)).await
}

pub async fn spawn_local_only_app() -> TestApp {
    build_app(test_config(), None).await
}

/// Local-only app whose cache caps evictable entries at `max_ttl_seconds`.
pub async fn spawn_local_only_app_with_max_ttl(max_ttl_seconds: u64) -> TestApp {
    let mut config = test_config();
    config.local_cache.max_ttl_seconds = max_ttl_seconds;
    build_app(config, None).await
}

async fn build_app(config: AuthConfig, durable: Option<Arc<MockKeyValueStore>>) -> TestApp {
    let directory = seed_directory();

    let local = LocalCache::new(
        config.local_cache.max_entries,
        config.local_cache.max_ttl_seconds,
    );
    let cache = Arc::new(
        CacheBackend::select(
            durable.clone().map(|d| d as Arc<dyn KeyValueStore>),
            local,
            Duration::from_millis(config.redis.timeout_ms),
        )
        .await,
    );

    let jwt = Arc::new(JwtService::new(&config.jwt).expect("jwt service"));
    let sessions = SessionRegistry::new(
        cache.clone(),
        &config.session.enforced_user_types,
        jwt.refresh_token_expiry_seconds() as u64,
    );
    let tokens = TokenStore::new(cache.clone());

    let credentials: Arc<dyn CredentialStore> = directory.clone();
    let rbac: Arc<dyn RbacStore> = directory.clone();

    let state = AppState {
        config: config.clone(),
        auth_service: AuthService::new(
            jwt.clone(),
            sessions.clone(),
            tokens.clone(),
            credentials.clone(),
            rbac.clone(),
        ),
        introspection: IntrospectionService::new(
            jwt,
            sessions,
            tokens.clone(),
            credentials.clone(),
            rbac,
        ),
        credentials,
        cache,
        metrics: None,
        login_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        ),
        ip_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        ),
    };

    TestApp {
        router: build_router(state.clone()),
        state,
        directory,
        tokens,
        durable,
    }
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn login(&self, user_type: &str, username: &str, platform: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri(format!("/auth/{}/login", user_type))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "username": username,
                        "password": TEST_PASSWORD,
                        "tenant_id": "ACME",
                        "platform": platform,
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
    }

    /// Log in and return the access token, failing the test on error.
    pub async fn access_token(&self, username: &str, platform: &str) -> String {
        let (status, body) = self.login("employee", username, platform).await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["access_token"].as_str().expect("access_token").to_string()
    }

    pub async fn introspect(&self, access_token: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri("/auth/introspect")
                .header("x-introspect-secret", TEST_INTROSPECT_SECRET)
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method("POST")
                .uri("/auth/refresh-token")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "refresh_token": refresh_token }).to_string(),
                ))
                .unwrap(),
        )
        .await
    }

    pub async fn bearer(&self, method: &str, uri: &str, access_token: &str) -> (StatusCode, Value) {
        self.request(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}
