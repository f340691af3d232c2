pub mod auth;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /auth/register          POST
/// /auth/login             POST
/// /auth/token/refresh     POST
/// /auth/logout            POST
/// /auth/session           GET
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/auth", auth::router())
}
