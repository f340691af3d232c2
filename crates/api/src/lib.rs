//! Brankas API server library.
//!
//! Exposes the token lifecycle (Token Service, session controller,
//! revalidation loop) and the HTTP surface over it, so integration tests and
//! the binary entrypoint can both access them.

pub mod auth;
pub mod background;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
