//! Authentication primitives and the session controller.
//!
//! - [`password`] -- Argon2id password hashing and verification.
//! - [`jwt`] -- token pair minting, verification, and refresh.
//! - [`session`] -- the auth session controller and its single-writer actor.

mod actor;
pub mod jwt;
pub mod password;
pub mod session;

pub use actor::SessionSnapshot;
