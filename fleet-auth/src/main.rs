use fleet_auth::{
    build_router,
    config::AuthConfig,
    db,
    services::{
        AuthService, CacheBackend, CredentialStore, Database, IntrospectionService, JwtService,
        KeyValueStore, LocalCache, RbacStore, RedisService, SessionRegistry, TokenStore,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::{init_tracing, install_prometheus_recorder};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    let metrics = match install_prometheus_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Metrics disabled");
            None
        }
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting fleet auth service"
    );

    let pool = db::create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;

    if config.database.run_migrations {
        db::run_migrations(&pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.into()))?;
    }

    let database = Arc::new(Database::new(pool));

    // Durable tier is optional; selection happens once here
    let durable: Option<Arc<dyn KeyValueStore>> = if config.redis.enabled {
        match RedisService::new(&config.redis).await {
            Ok(redis) => Some(Arc::new(redis)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not connect to Redis");
                None
            }
        }
    } else {
        None
    };

    let local = LocalCache::new(
        config.local_cache.max_entries,
        config.local_cache.max_ttl_seconds,
    );
    let cache = Arc::new(
        CacheBackend::select(durable, local, Duration::from_millis(config.redis.timeout_ms)).await,
    );
    tracing::info!(mode = cache.mode(), "Token cache initialized");

    let jwt = Arc::new(JwtService::new(&config.jwt).map_err(AppError::ConfigError)?);

    let session_ttl = jwt.refresh_token_expiry_seconds().max(1) as u64;
    let sessions = SessionRegistry::new(
        cache.clone(),
        &config.session.enforced_user_types,
        session_ttl,
    );
    let tokens = TokenStore::new(cache.clone());

    let credentials: Arc<dyn CredentialStore> = database.clone();
    let rbac: Arc<dyn RbacStore> = database;

    let auth_service = AuthService::new(
        jwt.clone(),
        sessions.clone(),
        tokens.clone(),
        credentials.clone(),
        rbac.clone(),
    );
    let introspection = IntrospectionService::new(jwt, sessions, tokens, credentials.clone(), rbac);

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );

    let state = AppState {
        config: config.clone(),
        auth_service,
        introspection,
        credentials,
        cache,
        metrics,
        login_rate_limiter,
        ip_rate_limiter,
    };

    let app = build_router(state);

    let addr = config.common.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Listening");

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
