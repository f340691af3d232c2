#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use brankas_api::auth::jwt::{JwtConfig, TokenService};
use brankas_api::auth::session::SessionController;
use brankas_api::config::ServerConfig;
use brankas_api::router::build_app_router;
use brankas_api::state::AppState;
use brankas_events::EventBus;
use brankas_store::{FileStore, InMemoryUserDirectory};

pub const TEST_SECRET: &str = "integration-test-secret";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config(data_dir: PathBuf) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        data_dir,
        revalidate_interval_secs: 300,
        jwt: JwtConfig::new(TEST_SECRET),
    }
}

/// A router over a fresh session persisted in a temporary directory.
pub struct TestApp {
    pub router: Router,
    pub controller: SessionController,
    pub tokens: Arc<TokenService>,
    pub data_dir: TempDir,
}

/// Build the full application router with all middleware layers.
///
/// Uses the same [`build_app_router`] as `main.rs`, so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> TestApp {
    let data_dir = TempDir::new().expect("create temp dir");
    let config = test_config(data_dir.path().to_path_buf());

    let store = Arc::new(FileStore::open(&config.data_dir).expect("open file store"));
    let tokens = Arc::new(TokenService::new(config.jwt.clone()));
    let controller = SessionController::spawn(
        store,
        Arc::new(InMemoryUserDirectory::new()),
        Arc::clone(&tokens),
        Arc::new(EventBus::default()),
    )
    .expect("spawn controller");

    let state = AppState {
        controller: controller.clone(),
        tokens: Arc::clone(&tokens),
    };
    let router = build_app_router(state, &config).expect("build router");

    TestApp {
        router,
        controller,
        tokens,
        data_dir,
    }
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body is JSON")
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}
