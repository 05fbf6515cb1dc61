//! p6gate core - session broker for the Primavera P6 REST API.
//!
//! Clients log in once, get back an opaque session id, and send proxied
//! calls through the broker. Sessions are persisted across restarts and,
//! when credentials were retained at login, silently renewed when P6
//! reports them expired.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod proxy;
pub mod store;

pub use api::{HostGuard, P6Client, ProxyRequest, ProxyResponse, Transport, TransportError};
pub use auth::{AuthAdapter, Credentials, ProbeResult, SessionSummary};
pub use config::{Config, SecretProtection};
pub use error::BrokerError;
pub use lifecycle::{LoginOutcome, SessionManager, SessionPolicy};
pub use proxy::{CallRequest, ListOptions, ObsRef, Proxy};
pub use store::{SessionStore, StoreError};
