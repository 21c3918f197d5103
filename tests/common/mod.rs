#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode, header},
};
use habitcraft::{
    ServerConfig, create_app,
    db::Database,
    secret::SigningSecret,
    session::SessionPolicy,
};
use std::net::SocketAddr;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-signing-key-0123456789";
pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(SessionPolicy::default(), 1000).await
}

pub async fn create_test_app_with(policy: SessionPolicy, auth_rate_limit: u32) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let config = ServerConfig {
        db: db.clone(),
        secret: SigningSecret::new(TEST_SECRET),
        policy,
        auth_rate_limit,
    };
    TestApp {
        app: create_app(&config),
        db,
    }
}

fn client_addr() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000)))
}

/// Send a request and return the status with the parsed JSON body (Null when empty).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
    bearer: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .extension(client_addr());
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, json)
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body), None).await
}

/// Register a user and return the response body (user + token pair).
pub async fn register(app: &Router, email: &str) -> serde_json::Value {
    let (status, json) = post_json(
        app,
        "/api/auth/register",
        serde_json::json!({ "email": email, "password": PASSWORD, "name": "Test User" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", json);
    json
}

pub async fn refresh(app: &Router, refresh_token: &str) -> (StatusCode, serde_json::Value) {
    post_json(
        app,
        "/api/auth/refresh",
        serde_json::json!({ "refreshToken": refresh_token }),
    )
    .await
}

pub fn str_field<'a>(json: &'a serde_json::Value, field: &str) -> &'a str {
    json[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing {} in {}", field, json))
}
