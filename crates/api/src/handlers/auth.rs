//! Handlers for the `/auth` resource (register, login, refresh, logout, session).
//!
//! All of them act on the single process-wide session held by the
//! [`SessionController`](crate::auth::session::SessionController), except
//! token refresh, which is a stateless Token Service call.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use brankas_core::error::CoreError;
use brankas_core::session::{Session, SessionStatus};
use brankas_core::user::User;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Message for every failed login, whichever half of the credentials was wrong.
const INVALID_CREDENTIALS: &str = "Invalid username or password";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /auth/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for `POST /auth/login`. `username` may also be an email.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request body for `POST /auth/token/refresh`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Successful authentication response returned by register and login.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
}

/// The current session without its tokens.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub status: SessionStatus,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/register
///
/// Create an account and log it in. 409 if the username or email is taken.
pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<AuthResponse>>)> {
    require_non_empty(&[
        ("username", &input.username),
        ("email", &input.email),
        ("password", &input.password),
    ])?;

    let Some(session) = state
        .controller
        .register_session(input.username.trim(), input.email.trim(), &input.password)
        .await?
    else {
        return Err(AppError::Core(CoreError::Conflict(
            "Username or email is already registered".into(),
        )));
    };

    let response = auth_response(&state, session)?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: response })))
}

/// POST /api/v1/auth/login
///
/// Authenticate with username (or email) + password.
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> AppResult<Json<DataResponse<AuthResponse>>> {
    require_non_empty(&[("username", &input.username), ("password", &input.password)])?;

    let Some(session) = state
        .controller
        .authenticate_session(input.username.trim(), &input.password)
        .await?
    else {
        return Err(AppError::Core(CoreError::Unauthorized(
            INVALID_CREDENTIALS.into(),
        )));
    };

    Ok(Json(DataResponse {
        data: auth_response(&state, session)?,
    }))
}

/// POST /api/v1/auth/token/refresh
///
/// Exchange a refresh token for a new access token. The refresh token is
/// not rotated.
pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshRequest>,
) -> AppResult<Json<DataResponse<RefreshResponse>>> {
    let access_token = state
        .tokens
        .refresh_access_token(&input.refresh_token)
        .map_err(|e| {
            if e.is_rejection() {
                tracing::debug!(error = %e, "Refresh token rejected");
                AppError::Core(CoreError::Unauthorized(
                    "Invalid or expired refresh token".into(),
                ))
            } else {
                AppError::InternalError(format!("Token generation error: {e}"))
            }
        })?;

    Ok(Json(DataResponse {
        data: RefreshResponse {
            access_token,
            expires_in: state.tokens.config().access_ttl_secs(),
        },
    }))
}

/// POST /api/v1/auth/logout
///
/// Clear the session. Always 204, even when nobody was logged in.
pub async fn logout(State(state): State<AppState>) -> AppResult<StatusCode> {
    state.controller.logout().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/session
pub async fn session(State(state): State<AppState>) -> Json<DataResponse<SessionView>> {
    let snapshot = state.controller.snapshot();
    Json(DataResponse {
        data: SessionView {
            user: snapshot.session.user,
            is_authenticated: snapshot.session.is_authenticated,
            status: snapshot.status,
        },
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_non_empty(fields: &[(&str, &String)]) -> Result<(), AppError> {
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(AppError::Core(CoreError::Validation(format!(
                "{name} must not be empty"
            ))));
        }
    }
    Ok(())
}

/// Build the response from the session this request committed, not whatever
/// the current session has become since.
fn auth_response(state: &AppState, session: Session) -> AppResult<AuthResponse> {
    let Session {
        user: Some(user),
        access_token: Some(access_token),
        refresh_token: Some(refresh_token),
        ..
    } = session
    else {
        return Err(AppError::InternalError(
            "Committed session is missing its user or tokens".into(),
        ));
    };

    Ok(AuthResponse {
        access_token,
        refresh_token,
        expires_in: state.tokens.config().access_ttl_secs(),
        user,
    })
}
