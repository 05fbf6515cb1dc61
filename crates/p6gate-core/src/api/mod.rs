//! REST API plumbing for the Primavera P6 web services.
//!
//! This module provides the `P6Client` used both to log in and to forward
//! proxied calls, the `Transport` trait the proxy forwards through, and the
//! `HostGuard` that keeps calls on the configured upstream host.
//!
//! P6 authenticates with a `JSESSIONID` cookie (and on some deployments an
//! `AuthToken` header) obtained from the `/login` endpoint.

pub mod client;
pub mod error;
pub mod guard;
pub mod transport;

pub use client::P6Client;
pub use error::TransportError;
pub use guard::HostGuard;
pub use transport::{host_of, ProxyRequest, ProxyResponse, Transport};
