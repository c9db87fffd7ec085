mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{spawn_app, spawn_local_only_app, spawn_local_only_app_with_max_ttl, ALICE, BOB};

#[tokio::test]
async fn test_local_only_mode_serves_full_flow() {
    let app = spawn_local_only_app().await;
    assert_eq!(app.state.cache.mode(), "local_only");

    let first = app.access_token(ALICE, "app").await;
    assert_eq!(app.introspect(&first).await.0, StatusCode::OK);

    // Single-session enforcement still holds without the durable tier
    let second = app.access_token(ALICE, "app").await;
    let (status, body) = app.introspect(&first).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "session_superseded");
    assert_eq!(app.introspect(&second).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_durable_outage_falls_back_to_local_tier() {
    let app = spawn_app().await;
    let durable = app.durable.clone().expect("durable tier");
    assert_eq!(app.state.cache.mode(), "durable");

    let before_outage = app.access_token(ALICE, "web").await;
    assert!(!durable.is_empty());

    durable.set_failing(true);

    // Existing token recomputes from the directory
    let (status, body) = app.introspect(&before_outage).await;
    assert_eq!(status, StatusCode::OK, "{}", body);

    // New logins land in the local tier
    let during_outage = app.access_token(ALICE, "app").await;
    assert_eq!(app.introspect(&during_outage).await.0, StatusCode::OK);

    durable.set_failing(false);
    assert_eq!(app.introspect(&during_outage).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_login_during_outage_still_wins_after_recovery() {
    let app = spawn_app().await;
    let durable = app.durable.clone().expect("durable tier");

    let before_outage = app.access_token(ALICE, "app").await;
    durable.set_failing(true);
    let during_outage = app.access_token(ALICE, "app").await;
    durable.set_failing(false);

    let (status, body) = app.introspect(&before_outage).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "session_superseded");

    let (status, body) = app.introspect(&during_outage).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}

#[tokio::test]
async fn test_logout_during_outage_stays_effective_after_recovery() {
    let app = spawn_app().await;
    let durable = app.durable.clone().expect("durable tier");

    let (_, login) = app.login("employee", BOB, "web").await;
    let access = login["access_token"].as_str().unwrap();
    let refresh = login["refresh_token"].as_str().unwrap();
    assert_eq!(app.introspect(access).await.0, StatusCode::OK);

    durable.set_failing(true);
    assert_eq!(app.bearer("POST", "/auth/logout", access).await.0, StatusCode::OK);
    durable.set_failing(false);

    let (status, body) = app.introspect(access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");
    assert_eq!(app.refresh(refresh).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_outlives_local_cache_ttl_cap() {
    let app = spawn_local_only_app_with_max_ttl(1).await;

    let (_, login) = app.login("employee", ALICE, "app").await;
    let access = login["access_token"].as_str().unwrap();
    let refresh = login["refresh_token"].as_str().unwrap();
    assert_eq!(app.bearer("POST", "/auth/logout", access).await.0, StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    let (status, body) = app.introspect(access).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");

    let (status, body) = app.refresh(refresh).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");
}

#[tokio::test]
async fn test_superseded_session_outlives_local_cache_ttl_cap() {
    let app = spawn_local_only_app_with_max_ttl(1).await;

    let first = app.access_token(ALICE, "app").await;
    let second = app.access_token(ALICE, "app").await;

    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    let (status, body) = app.introspect(&first).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "session_superseded");
    assert_eq!(app.introspect(&second).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_health_reports_cache_mode() {
    let app = spawn_app().await;
    let request = || Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = app.request(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["cache"], "up");
    assert_eq!(body["checks"]["cache_mode"], "durable");

    // A durable outage degrades caching, not the service
    app.durable.as_ref().unwrap().set_failing(true);
    let (status, body) = app.request(request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["cache"], "down");

    let local = spawn_local_only_app().await;
    let (_, body) = local.request(request()).await;
    assert_eq!(body["checks"]["cache_mode"], "local_only");
}

#[tokio::test]
async fn test_responses_carry_security_headers_and_request_id() {
    let app = spawn_app().await;

    let response = tower::ServiceExt::oneshot(
        app.router.clone(),
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await
    .unwrap();

    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-content-type-options"));
}
