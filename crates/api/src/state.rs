use std::sync::Arc;

use crate::auth::jwt::TokenService;
use crate::auth::session::SessionController;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Handle to the single-writer session actor.
    pub controller: SessionController,
    /// Token Service, shared with the controller.
    pub tokens: Arc<TokenService>,
}
