//! Durable session storage.
//!
//! Sessions live in memory and are mirrored to a single JSON file keyed by
//! session id, so they survive a restart of the broker.

pub mod session_store;

pub use session_store::{SessionStore, StoreError};
