//! Session lifecycle management.
//!
//! `SessionManager` decides per request which stored session is used,
//! renews it with retained credentials when the remote reports it expired,
//! and emits lifecycle events for every change to session membership or
//! credentials.

pub mod events;
pub mod manager;

pub use manager::{Forwarded, LoginOutcome, SessionManager, SessionPolicy};
