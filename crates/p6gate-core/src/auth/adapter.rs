//! Boundary between the session manager and the remote login protocol.

use std::future::Future;

use thiserror::Error;

use super::{AuthArtifacts, Credentials};
use crate::api::TransportError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login rejected (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outcome of asking the remote whether artifacts are still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    Valid,
    Expired,
    Unknown,
}

/// Translates remote login success/failure for the session manager.
///
/// Implementations make exactly one network attempt per call; retry policy
/// belongs to the caller.
pub trait AuthAdapter: Send + Sync + 'static {
    fn submit_credentials(
        &self,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<AuthArtifacts, AuthError>> + Send;

    fn probe(&self, artifacts: &AuthArtifacts) -> impl Future<Output = ProbeResult> + Send;
}
