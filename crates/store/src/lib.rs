//! Storage seams for the session controller.
//!
//! Nothing here is a global: callers construct a store and a directory and
//! inject them, so tests get isolated instances.

pub mod directory;
pub mod error;
pub mod kv;
pub mod persisted;

pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use error::StoreError;
pub use kv::{FileStore, KeyValueStore, MemoryStore};
