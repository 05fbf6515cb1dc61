use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cookies and token returned by the P6 login endpoint.
///
/// The broker never looks inside these values; they are only attached to
/// outbound requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthArtifacts {
    #[serde(default)]
    pub cookies: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl AuthArtifacts {
    pub fn new(cookies: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            cookies: cookies.into(),
            auth_token,
        }
    }

    /// True when there is neither a cookie nor a token to send.
    pub fn is_empty(&self) -> bool {
        let no_token = self
            .auth_token
            .as_deref()
            .map(|t| t.trim().is_empty())
            .unwrap_or(true);
        self.cookies.trim().is_empty() && no_token
    }

    /// Cookie names only, never values.
    pub fn redacted(&self) -> RedactedArtifacts {
        let cookie_names = self
            .cookies
            .split(';')
            .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        RedactedArtifacts {
            cookie_names,
            has_auth_token: self.auth_token.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactedArtifacts {
    pub cookie_names: Vec<String>,
    pub has_auth_token: bool,
}

/// Login credentials for a P6 database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub database_name: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            database_name: database_name.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database_name", &self.database_name)
            .finish()
    }
}

/// An authenticated P6 session.
///
/// Retained credentials are private: the only way to attach them is through
/// [`Session::new`] or [`Session::restore`], so `remembered()` always agrees
/// with whether credentials are actually held.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub auth_artifacts: AuthArtifacts,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub database_name: Option<String>,
    /// Bumped every time the artifacts are replaced by a renewal.
    pub generation: u64,
    credential_ref: Option<Credentials>,
}

impl Session {
    pub fn new(
        id: String,
        auth_artifacts: AuthArtifacts,
        database_name: Option<String>,
        credential_ref: Option<Credentials>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            auth_artifacts,
            created_at: now,
            last_used_at: now,
            database_name,
            generation: 0,
            credential_ref,
        }
    }

    /// Rebuild a session read back from the store file.
    pub(crate) fn restore(
        id: String,
        auth_artifacts: AuthArtifacts,
        created_at: DateTime<Utc>,
        last_used_at: DateTime<Utc>,
        database_name: Option<String>,
        generation: u64,
        credential_ref: Option<Credentials>,
    ) -> Self {
        Self {
            id,
            auth_artifacts,
            created_at,
            last_used_at,
            database_name,
            generation,
            credential_ref,
        }
    }

    /// Whether retained credentials may be used to renew this session.
    pub fn remembered(&self) -> bool {
        self.credential_ref.is_some()
    }

    pub fn credential_ref(&self) -> Option<&Credentials> {
        self.credential_ref.as_ref()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            auto_login_enabled: self.remembered(),
            database: self.database_name.clone(),
        }
    }
}

/// Listing view of a session, safe to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub auto_login_enabled: bool,
    pub database: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts_is_empty() {
        assert!(AuthArtifacts::new("", None).is_empty());
        assert!(AuthArtifacts::new("  ", Some(" ".to_string())).is_empty());
        assert!(!AuthArtifacts::new("JSESSIONID=abc", None).is_empty());
        assert!(!AuthArtifacts::new("", Some("tok".to_string())).is_empty());
    }

    #[test]
    fn test_redacted_artifacts_hide_values() {
        let artifacts = AuthArtifacts::new(
            "JSESSIONID=secret1; ORA_OCIS=secret2",
            Some("token-value".to_string()),
        );
        let redacted = artifacts.redacted();
        assert_eq!(redacted.cookie_names, vec!["JSESSIONID", "ORA_OCIS"]);
        assert!(redacted.has_auth_token);

        let json = serde_json::to_string(&redacted).expect("serialize redacted view");
        assert!(!json.contains("secret1"));
        assert!(!json.contains("token-value"));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("alice", "hunter2", "PMDB");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_remembered_follows_credentials() {
        let artifacts = AuthArtifacts::new("JSESSIONID=a", None);
        let plain = Session::new("1".into(), artifacts.clone(), Some("PMDB".into()), None);
        assert!(!plain.remembered());
        assert!(plain.credential_ref().is_none());

        let kept = Session::new(
            "2".into(),
            artifacts,
            Some("PMDB".into()),
            Some(Credentials::new("a", "p", "PMDB")),
        );
        assert!(kept.remembered());
        assert_eq!(kept.summary().auto_login_enabled, true);
        assert_eq!(kept.summary().database.as_deref(), Some("PMDB"));
    }
}
