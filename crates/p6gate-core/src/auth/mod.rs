//! Authentication module for P6 sessions and retained credentials.
//!
//! This module provides:
//! - `Session`: cookies/token from a successful login plus optional credentials
//! - `AuthAdapter`: the login protocol seen by the session manager
//! - `SecretProtector`: at-rest protection for retained credentials
//! - `PassphraseKeychain`: OS keychain storage for the seal passphrase

pub mod adapter;
pub mod credentials;
pub mod protect;
pub mod session;

pub use adapter::{AuthAdapter, AuthError, ProbeResult};
pub use credentials::PassphraseKeychain;
pub use protect::{PassphraseProtector, PlainProtector, ProtectError, SealedCredentials, SecretProtector};
pub use session::{AuthArtifacts, Credentials, RedactedArtifacts, Session, SessionSummary};
