//! Session lifecycle: login, per-request resolution, auto-renewal, logout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::events;
use crate::api::TransportError;
use crate::auth::{
    AuthAdapter, AuthArtifacts, AuthError, Credentials, ProbeResult, RedactedArtifacts, Session,
    SessionSummary,
};
use crate::error::BrokerError;
use crate::store::SessionStore;

/// How a request without an explicit session id is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    /// Fall back to the most recently used session.
    pub auto_session: bool,
    /// With auto session on, report an empty store as `NoActiveSession`.
    pub strict: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            auto_session: true,
            strict: true,
        }
    }
}

/// Result of one forwarded call as seen by [`SessionManager::with_auto_renew`].
#[derive(Debug)]
pub enum Forwarded<T> {
    Completed(T),
    /// The remote refused the attached cookies/token.
    AuthRejected,
}

/// What `authenticate` hands back. Never carries raw secrets.
#[derive(Debug, Clone, Serialize)]
pub struct LoginOutcome {
    pub session_id: String,
    pub artifacts: RedactedArtifacts,
    pub remember: bool,
}

#[derive(Debug, Clone, Error)]
enum RenewalFailure {
    #[error("{0}")]
    Rejected(String),

    #[error("session was invalidated during renewal")]
    Invalidated,

    #[error("credentials were not remembered")]
    NotRemembered,

    #[error("renewal task aborted: {0}")]
    Aborted(String),
}

type RenewalFuture = Shared<BoxFuture<'static, Result<Session, RenewalFailure>>>;

/// In-flight renewals keyed by session id, tagged with the generation being replaced.
type InFlight = Arc<Mutex<HashMap<String, (u64, RenewalFuture)>>>;

pub struct SessionManager<A> {
    store: Arc<SessionStore>,
    adapter: Arc<A>,
    in_flight: InFlight,
    last_issued_id: Mutex<i64>,
}

impl<A: AuthAdapter> SessionManager<A> {
    pub fn new(store: Arc<SessionStore>, adapter: Arc<A>) -> Self {
        Self {
            store,
            adapter,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            last_issued_id: Mutex::new(0),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Log in and store a new session. Credentials are kept only when `remember` is set.
    pub async fn authenticate(
        &self,
        credentials: Credentials,
        remember: bool,
    ) -> Result<LoginOutcome, BrokerError> {
        let artifacts = self
            .adapter
            .submit_credentials(&credentials)
            .await
            .map_err(|e| match e {
                AuthError::Rejected { reason, .. } => BrokerError::AuthenticationFailed(reason),
                AuthError::Transport(e) => BrokerError::Transport(e),
            })?;

        if artifacts.is_empty() {
            return Err(BrokerError::AuthenticationFailed(
                "login returned no session cookie or token".to_string(),
            ));
        }

        let id = self.next_session_id();
        let database_name = Some(credentials.database_name.clone());
        let session = Session::new(id, artifacts, database_name, remember.then_some(credentials));
        let outcome = LoginOutcome {
            session_id: session.id.clone(),
            artifacts: session.auth_artifacts.redacted(),
            remember,
        };

        events::session_created(&session);
        if let Err(e) = self.store.put(session) {
            warn!(id = %outcome.session_id, error = %e, "Session kept in memory only");
        }
        Ok(outcome)
    }

    /// Pick the session for one proxied request.
    pub fn resolve(
        &self,
        explicit_id: Option<&str>,
        policy: SessionPolicy,
    ) -> Result<Session, BrokerError> {
        let id = match explicit_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                debug!(id, "Using provided session_id");
                id.to_string()
            }
            None if !policy.auto_session => return Err(BrokerError::SessionRequired),
            None => match self.store.most_recently_used() {
                Some(latest) => {
                    debug!(id = %latest.id, "Auto-injecting latest session");
                    latest.id
                }
                None if policy.strict => return Err(BrokerError::NoActiveSession),
                None => return Err(BrokerError::SessionNotFound(None)),
            },
        };

        self.store
            .touch(&id, Utc::now())
            .ok_or(BrokerError::SessionNotFound(Some(id)))
    }

    /// Run one forwarded call, renewing the session at most once if the remote rejects it.
    ///
    /// Transport failures are returned unchanged and never trigger a renewal.
    pub async fn with_auto_renew<T, F, Fut>(
        &self,
        session: Session,
        mut forward: F,
    ) -> Result<T, BrokerError>
    where
        F: FnMut(AuthArtifacts) -> Fut,
        Fut: Future<Output = Result<Forwarded<T>, TransportError>>,
    {
        if let Forwarded::Completed(value) = forward(session.auth_artifacts.clone()).await? {
            return Ok(value);
        }

        if !session.remembered() {
            let reason = RenewalFailure::NotRemembered.to_string();
            events::session_expired(&session.id, &reason);
            return Err(BrokerError::SessionExpired {
                id: session.id,
                reason,
            });
        }

        let renewed = match self.renew(&session).await {
            Ok(renewed) => renewed,
            Err(e) => {
                let reason = e.to_string();
                events::session_expired(&session.id, &reason);
                return Err(BrokerError::SessionExpired {
                    id: session.id,
                    reason,
                });
            }
        };

        match forward(renewed.auth_artifacts.clone()).await? {
            Forwarded::Completed(value) => Ok(value),
            Forwarded::AuthRejected => {
                let reason = "rejected again after renewal";
                events::session_expired(&session.id, reason);
                Err(BrokerError::SessionExpired {
                    id: session.id,
                    reason: reason.to_string(),
                })
            }
        }
    }

    /// Remove a session. Unknown ids are ignored.
    ///
    /// Returns whether a session was removed. A persistence failure is
    /// reported after the in-memory removal has already happened.
    pub fn invalidate(&self, id: &str) -> Result<bool, BrokerError> {
        match self.store.remove(id) {
            Ok(Some(_)) => {
                events::session_invalidated(id);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                events::session_invalidated(id);
                Err(e.into())
            }
        }
    }

    /// Remove every session. Like [`invalidate`](Self::invalidate), the
    /// in-memory store is emptied even when the write fails.
    pub fn invalidate_all(&self) -> Result<usize, BrokerError> {
        let before = self.store.len();
        match self.store.clear() {
            Ok(count) => {
                events::sessions_cleared(count);
                Ok(count)
            }
            Err(e) => {
                events::sessions_cleared(before);
                Err(e.into())
            }
        }
    }

    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.store.all().iter().map(Session::summary).collect()
    }

    /// The session auto mode would pick, without marking it used.
    pub fn active_session(&self) -> Option<SessionSummary> {
        self.store.most_recently_used().map(|s| s.summary())
    }

    /// Ask the remote whether a stored session is still accepted.
    pub async fn probe(&self, id: &str) -> Result<ProbeResult, BrokerError> {
        let session = self
            .store
            .get(id)
            .ok_or_else(|| BrokerError::SessionNotFound(Some(id.to_string())))?;
        Ok(self.adapter.probe(&session.auth_artifacts).await)
    }

    /// Millisecond timestamp id, bumped past anything already issued or stored.
    fn next_session_id(&self) -> String {
        let mut last = self
            .last_issued_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut candidate = Utc::now().timestamp_millis().max(*last + 1);
        while self.store.contains(&candidate.to_string()) {
            candidate += 1;
        }
        *last = candidate;
        candidate.to_string()
    }

    /// Replace the artifacts of `stale`, or join a renewal already running for it.
    async fn renew(&self, stale: &Session) -> Result<Session, RenewalFailure> {
        let pending = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

            let current = self.store.get(&stale.id).ok_or(RenewalFailure::Invalidated)?;
            if current.generation > stale.generation {
                debug!(id = %stale.id, "Reusing artifacts from a completed renewal");
                return Ok(current);
            }

            match in_flight.get(&stale.id) {
                Some((generation, pending)) if *generation == stale.generation => {
                    debug!(id = %stale.id, "Joining in-flight renewal");
                    pending.clone()
                }
                _ => {
                    let credentials = current
                        .credential_ref()
                        .cloned()
                        .ok_or(RenewalFailure::NotRemembered)?;
                    let pending = self.spawn_renewal(current, credentials);
                    in_flight.insert(stale.id.clone(), (stale.generation, pending.clone()));
                    pending
                }
            }
        };

        pending.await
    }

    /// The renewal runs on its own task so that a caller going away does not
    /// cancel it for the other requests waiting on the same session.
    fn spawn_renewal(&self, session: Session, credentials: Credentials) -> RenewalFuture {
        let store = Arc::clone(&self.store);
        let adapter = Arc::clone(&self.adapter);
        let in_flight = Arc::clone(&self.in_flight);

        let handle = tokio::spawn(async move {
            let result = renew_once(&store, adapter.as_ref(), &session, &credentials).await;

            let mut in_flight = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if matches!(in_flight.get(&session.id), Some((g, _)) if *g == session.generation) {
                in_flight.remove(&session.id);
            }
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(RenewalFailure::Aborted(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

async fn renew_once<A: AuthAdapter>(
    store: &SessionStore,
    adapter: &A,
    session: &Session,
    credentials: &Credentials,
) -> Result<Session, RenewalFailure> {
    let artifacts = match adapter.submit_credentials(credentials).await {
        Ok(artifacts) if !artifacts.is_empty() => artifacts,
        Ok(_) => {
            return Err(RenewalFailure::Rejected(
                "relogin returned no session cookie or token".to_string(),
            ))
        }
        Err(e) => return Err(RenewalFailure::Rejected(format!("relogin failed: {}", e))),
    };

    let renewed = match store.replace_artifacts(&session.id, artifacts) {
        Ok(Some(renewed)) => renewed,
        Ok(None) => return Err(RenewalFailure::Invalidated),
        Err(e) => {
            warn!(id = %session.id, error = %e, "Renewed session kept in memory only");
            store.get(&session.id).ok_or(RenewalFailure::Invalidated)?
        }
    };

    events::session_renewed(&renewed);
    Ok(renewed)
}

// ============================================================================
// Tests
// ============================================================================
