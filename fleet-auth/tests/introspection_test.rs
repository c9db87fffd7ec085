mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{spawn_app, ALICE, ALICE_ID, TEST_INTROSPECT_SECRET, VIEWER_ROLE};
use fleet_auth::models::{Action, Permission, Policy, Role};

#[tokio::test]
async fn test_introspect_requires_secret() {
    let app = spawn_app().await;
    let token = app.access_token(ALICE, "web").await;

    let (status, _) = app
        .request(
            Request::builder()
                .method("POST")
                .uri("/auth/introspect")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .request(
            Request::builder()
                .method("POST")
                .uri("/auth/introspect")
                .header("x-introspect-secret", format!("{}-wrong", TEST_INTROSPECT_SECRET))
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_introspect_secret");
}

#[tokio::test]
async fn test_introspect_returns_raw_claims() {
    let app = spawn_app().await;
    let token = app.access_token(ALICE, "web").await;

    let (status, claims) = app.introspect(&token).await;

    assert_eq!(status, StatusCode::OK, "{}", claims);
    assert_eq!(claims["user_id"], ALICE_ID);
    assert_eq!(claims["user_type"], "employee");
    assert_eq!(claims["tenant_id"], "ACME");
    assert_eq!(claims["platform"], "web");
    assert_eq!(claims["active"], true);
    assert_eq!(claims["opaque_token"].as_str().unwrap().len(), 32);
    assert!(claims["exp"].as_i64().unwrap() > claims["iat"].as_i64().unwrap());
}

#[tokio::test]
async fn test_cache_miss_recomputes_identical_claims() {
    let app = spawn_app().await;
    let token = app.access_token(ALICE, "web").await;

    let (_, cached) = app.introspect(&token).await;
    let opaque = cached["opaque_token"].as_str().unwrap().to_string();

    app.tokens.evict(&opaque).await;
    assert!(app.tokens.get(&opaque).await.unwrap().is_none());

    let (status, recomputed) = app.introspect(&token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cached, recomputed);

    // Repopulated for the next call
    assert!(app.tokens.get(&opaque).await.unwrap().is_some());
}

#[tokio::test]
async fn test_recompute_picks_up_role_changes() {
    let app = spawn_app().await;
    let token = app.access_token(ALICE, "web").await;
    let (_, before) = app.introspect(&token).await;

    app.directory.upsert_role(Role::new(
        VIEWER_ROLE,
        "Viewer",
        None,
        vec![Policy::new(
            20,
            "Read only",
            vec![Permission::new("vehicle", Action::Read)],
        )],
    ));

    // Cached claims are served until the entry goes away
    let (_, still_cached) = app.introspect(&token).await;
    assert_eq!(before, still_cached);

    app.tokens
        .evict(before["opaque_token"].as_str().unwrap())
        .await;
    let (_, after) = app.introspect(&token).await;
    assert_eq!(
        after["permissions"],
        serde_json::json!([{"module": "vehicle", "action": ["read"]}])
    );
}

#[tokio::test]
async fn test_revoked_token_fails_introspection() {
    let app = spawn_app().await;
    let token = app.access_token(ALICE, "web").await;
    let (_, claims) = app.introspect(&token).await;

    let revoked = app
        .tokens
        .revoke(claims["opaque_token"].as_str().unwrap())
        .await
        .unwrap();
    assert!(revoked);

    let (status, body) = app.introspect(&token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");
}

#[tokio::test]
async fn test_malformed_and_tampered_tokens_are_rejected() {
    let app = spawn_app().await;
    let token = app.access_token(ALICE, "web").await;

    let (status, _) = app.introspect("not-a-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (head, signature) = token.rsplit_once('.').unwrap();
    let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
    let tampered = format!("{}.{}{}", head, flipped, &signature[1..]);
    let (status, body) = app.introspect(&tampered).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_token");
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = spawn_app().await;
    let (_, body) = app.login("employee", ALICE, "web").await;

    let (status, _) = app
        .introspect(body["refresh_token"].as_str().unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
