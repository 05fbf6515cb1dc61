//! Structured lifecycle events.
//!
//! Everything is emitted on [`TARGET`] so a subscriber can switch session
//! logging off with a single `p6gate::lifecycle=off` directive.

use tracing::{info, warn};

use crate::auth::Session;

pub const TARGET: &str = "p6gate::lifecycle";

pub(crate) fn session_created(session: &Session) {
    info!(
        target: TARGET,
        event = "session_created",
        id = %session.id,
        remembered = session.remembered(),
        "Session created"
    );
}

pub(crate) fn session_renewed(session: &Session) {
    info!(
        target: TARGET,
        event = "session_renewed",
        id = %session.id,
        generation = session.generation,
        "Auto-relogin successful"
    );
}

pub(crate) fn session_expired(id: &str, reason: &str) {
    warn!(target: TARGET, event = "session_expired", id, reason, "Session expired");
}

pub(crate) fn session_invalidated(id: &str) {
    info!(target: TARGET, event = "session_invalidated", id, "Session removed");
}

pub(crate) fn sessions_cleared(count: usize) {
    info!(target: TARGET, event = "sessions_cleared", count, "All sessions cleared");
}
