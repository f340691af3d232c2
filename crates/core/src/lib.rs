//! Domain types shared by every brankas crate.
//!
//! - [`user`] -- public user identity and the directory's credential record.
//! - [`session`] -- the authenticated-session value and its lifecycle status.
//! - [`error`] -- the domain error taxonomy.

pub mod error;
pub mod session;
pub mod types;
pub mod user;
