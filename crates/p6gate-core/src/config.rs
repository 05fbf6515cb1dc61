//! Broker configuration.
//!
//! Settings are read from `~/.config/p6gate/config.json` when present and
//! then overridden by environment variables (`P6_BASE_URL`,
//! `AUTO_SESSION_ENABLED`, ...). The session store defaults to
//! `~/.cache/p6gate/session_store.json`.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::host_of;
use crate::auth::{PassphraseKeychain, PassphraseProtector, PlainProtector, SecretProtector};
use crate::lifecycle::SessionPolicy;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "p6gate";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session store file name in the cache directory
const SESSION_STORE_FILE: &str = "session_store.json";

/// Keychain account holding the seal passphrase
const KEYCHAIN_ACCOUNT: &str = "session-store";

const DEFAULT_BASE_URL: &str = "https://ca1.p6.oraclecloud.com/metrolinx/p6ws/restapi";

/// 30s matches the P6 web services default gateway timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 30.0;

/// Upper bound on `REQUEST_TIMEOUT`; one day is far past any P6 response.
const MAX_REQUEST_TIMEOUT_SECS: f64 = 86_400.0;

/// Cheap authenticated read used to check whether a session is still accepted
const DEFAULT_PROBE_PATH: &str = "/project?Fields=ObjectId&MaxObjects=1";

/// How retained credentials are protected in the session store file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretProtection {
    /// Clear text
    #[default]
    None,
    /// Encrypted with `SESSION_SEAL_PASSPHRASE`
    Passphrase,
    /// Encrypted with a passphrase kept in the OS keychain
    Keyring,
}

impl FromStr for SecretProtection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "plain" => Ok(Self::None),
            "passphrase" => Ok(Self::Passphrase),
            "keyring" | "keychain" => Ok(Self::Keyring),
            other => bail!("Unknown secret protection mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub accept: String,
    pub version: Option<String>,
    pub request_timeout_secs: f64,
    pub verify_ssl: bool,
    pub auto_session_enabled: bool,
    pub auto_session_strict_mode: bool,
    pub session_store_file: Option<PathBuf>,
    pub allowed_host: Option<String>,
    pub enable_session_logging: bool,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    pub secret_protection: SecretProtection,
    #[serde(skip_serializing)]
    pub seal_passphrase: Option<String>,
    pub probe_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            accept: "application/json".to_string(),
            version: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            verify_ssl: false,
            auto_session_enabled: true,
            auto_session_strict_mode: true,
            session_store_file: None,
            allowed_host: None,
            enable_session_logging: true,
            log_level: "info".to_string(),
            log_dir: None,
            secret_protection: SecretProtection::None,
            seal_passphrase: None,
            probe_path: DEFAULT_PROBE_PATH.to_string(),
        }
    }
}

/// `true/1/yes/y/on`, case-insensitive
pub fn env_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

impl Config {
    /// Config file (if any) with environment overrides applied.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_path() {
            Ok(path) if path.exists() => Self::load_from(&path)?,
            Ok(_) => Self::default(),
            Err(e) => {
                warn!(error = %e, "No config directory, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply environment-style overrides. `lookup` returns the raw value for a key.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("P6_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("P6_ACCEPT") {
            self.accept = v;
        }
        if let Some(v) = lookup("P6_VERSION") {
            self.version = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("REQUEST_TIMEOUT") {
            self.request_timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("REQUEST_TIMEOUT is not a number: {}", v))?;
        }
        if let Some(v) = lookup("P6_VERIFY_SSL") {
            self.verify_ssl = env_bool(&v);
        }
        if let Some(v) = lookup("AUTO_SESSION_ENABLED") {
            self.auto_session_enabled = env_bool(&v);
        }
        if let Some(v) = lookup("AUTO_SESSION_STRICT_MODE") {
            self.auto_session_strict_mode = env_bool(&v);
        }
        if let Some(v) = lookup("SESSION_STORE_FILE") {
            self.session_store_file = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ALLOWED_HOST") {
            self.allowed_host = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("ENABLE_SESSION_LOGGING") {
            self.enable_session_logging = env_bool(&v);
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v.to_ascii_lowercase();
        }
        if let Some(v) = lookup("LOG_DIR") {
            self.log_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SECRET_PROTECTION") {
            self.secret_protection = v.parse()?;
        }
        if let Some(v) = lookup("SESSION_SEAL_PASSPHRASE") {
            self.seal_passphrase = Some(v).filter(|v| !v.is_empty());
        }
        if let Some(v) = lookup("P6_PROBE_PATH") {
            self.probe_path = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.request_timeout_secs.is_finite()
            || self.request_timeout_secs <= 0.0
            || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS
        {
            bail!(
                "Request timeout must be between 0 and {} seconds",
                MAX_REQUEST_TIMEOUT_SECS
            );
        }
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid P6 base URL: {}", self.base_url))?;
        if url.host_str().is_none() {
            bail!("P6 base URL has no host: {}", self.base_url);
        }
        if self.secret_protection == SecretProtection::Passphrase && self.seal_passphrase.is_none() {
            bail!("SECRET_PROTECTION=passphrase requires SESSION_SEAL_PASSPHRASE");
        }
        Ok(())
    }

    /// Configured allowed host, or the host of the base URL.
    pub fn allowed_host(&self) -> Result<String> {
        if let Some(ref host) = self.allowed_host {
            return Ok(host.clone());
        }
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("Invalid P6 base URL: {}", self.base_url))?;
        Ok(host_of(&url))
    }

    pub fn session_store_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.session_store_file {
            return Ok(path.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(SESSION_STORE_FILE))
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            auto_session: self.auto_session_enabled,
            strict: self.auto_session_strict_mode,
        }
    }

    pub fn secret_protector(&self) -> Result<Arc<dyn SecretProtector>> {
        match self.secret_protection {
            SecretProtection::None => Ok(Arc::new(PlainProtector)),
            SecretProtection::Passphrase => {
                let passphrase = self
                    .seal_passphrase
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("SESSION_SEAL_PASSPHRASE is not set"))?;
                Ok(Arc::new(PassphraseProtector::new(passphrase)?))
            }
            SecretProtection::Keyring => {
                let passphrase = PassphraseKeychain::load_or_create(KEYCHAIN_ACCOUNT)?;
                Ok(Arc::new(PassphraseProtector::new(passphrase)?))
            }
        }
    }

    /// Drop the keychain passphrase used by `SecretProtection::Keyring`.
    pub fn forget_keychain_passphrase() -> Result<()> {
        PassphraseKeychain::delete(KEYCHAIN_ACCOUNT)
    }
}
