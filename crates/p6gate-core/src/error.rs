use thiserror::Error;

use crate::api::TransportError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Invalid or expired session_id: {}", .0.as_deref().unwrap_or("no sessions available"))]
    SessionNotFound(Option<String>),

    #[error("session_id required (auto session mode is disabled)")]
    SessionRequired,

    #[error("No active session found. Please login first")]
    NoActiveSession,

    #[error("Session {id} expired: {reason}. Please login again")]
    SessionExpired { id: String, reason: String },

    #[error("Host not allowed: {0}")]
    ForbiddenTarget(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BrokerError {
    /// HTTP-style status for reporting the error to a client.
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::AuthenticationFailed(_)
            | BrokerError::SessionRequired
            | BrokerError::NoActiveSession
            | BrokerError::SessionExpired { .. } => 401,
            BrokerError::SessionNotFound(_) | BrokerError::NotFound(_) => 404,
            BrokerError::ForbiddenTarget(_) | BrokerError::InvalidRequest(_) => 400,
            BrokerError::Storage(_) => 500,
            BrokerError::Transport(_) => 502,
        }
    }

    /// Errors the caller can fix (log in again, fix the request).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_and_not_found_are_distinct() {
        let expired = BrokerError::SessionExpired {
            id: "1".into(),
            reason: "renewal failed".into(),
        };
        let missing = BrokerError::SessionNotFound(Some("1".into()));
        assert_ne!(expired.status_code(), missing.status_code());
        assert!(expired.is_client_error());
        assert!(missing.is_client_error());
    }

    #[test]
    fn test_session_not_found_message() {
        assert_eq!(
            BrokerError::SessionNotFound(Some("42".into())).to_string(),
            "Invalid or expired session_id: 42"
        );
        assert_eq!(
            BrokerError::SessionNotFound(None).to_string(),
            "Invalid or expired session_id: no sessions available"
        );
    }

    #[test]
    fn test_transport_is_not_client_error() {
        let err = BrokerError::Transport(TransportError::InvalidResponse("bad".into()));
        assert_eq!(err.status_code(), 502);
        assert!(!err.is_client_error());
    }
}
