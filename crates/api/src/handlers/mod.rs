//! Request handlers.
//!
//! Handlers delegate to the session controller or the Token Service and map
//! errors via [`AppError`](crate::error::AppError).

pub mod auth;
