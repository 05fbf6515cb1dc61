use anyhow::{Context, Result};
use keyring::Entry;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::info;

const SERVICE_NAME: &str = "p6gate";

/// Length of a generated seal passphrase
const GENERATED_PASSPHRASE_LEN: usize = 48;

/// Keeps the session-store seal passphrase in the OS keychain.
pub struct PassphraseKeychain;

impl PassphraseKeychain {
    /// Fetch the passphrase for `account`, generating and storing one on first use
    pub fn load_or_create(account: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;

        match entry.get_password() {
            Ok(passphrase) => Ok(passphrase),
            Err(keyring::Error::NoEntry) => {
                let passphrase = Self::generate();
                entry
                    .set_password(&passphrase)
                    .context("Failed to store seal passphrase in keychain")?;
                info!(account, "Generated new session seal passphrase in keychain");
                Ok(passphrase)
            }
            Err(e) => Err(e).context("Failed to retrieve seal passphrase from keychain"),
        }
    }

    /// Remove the stored passphrase; sealed credentials become unreadable
    pub fn delete(account: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, account).context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete seal passphrase from keychain")?;
        Ok(())
    }

    fn generate() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_PASSPHRASE_LEN)
            .map(char::from)
            .collect()
    }
}
