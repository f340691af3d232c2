//! Authentication event bus.
//!
//! - [`EventBus`] -- in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`AuthEvent`] -- success/failure signal emitted by the session controller.
//! - [`EventLogger`] -- background subscriber that writes every event to the log.

pub mod bus;
pub mod logger;

pub use bus::{AuthEvent, AuthEventKind, EventBus};
pub use logger::EventLogger;
