//! At-rest protection for retained credentials.
//!
//! The session store never writes a `Credentials` value directly; it asks a
//! [`SecretProtector`] to seal it first. [`PlainProtector`] keeps the old
//! cleartext behaviour, [`PassphraseProtector`] encrypts with
//! ChaCha20-Poly1305 under an Argon2id-derived key.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Credentials;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ProtectError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed - wrong passphrase or corrupted record")]
    Decrypt,

    #[error("Record sealed with {0} but no matching protector is configured")]
    SchemeMismatch(&'static str),

    #[error("Invalid sealed payload: {0}")]
    Payload(String),
}

/// Credentials as written to the session store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum SealedCredentials {
    Plain(Credentials),
    #[serde(rename = "chacha20poly1305")]
    Chacha20Poly1305 {
        salt: Vec<u8>,
        nonce: Vec<u8>,
        ciphertext: Vec<u8>,
    },
}

pub trait SecretProtector: Send + Sync {
    fn seal(&self, credentials: &Credentials) -> Result<SealedCredentials, ProtectError>;
    fn unseal(&self, sealed: &SealedCredentials) -> Result<Credentials, ProtectError>;
}

/// Stores credentials in clear form.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainProtector;

impl SecretProtector for PlainProtector {
    fn seal(&self, credentials: &Credentials) -> Result<SealedCredentials, ProtectError> {
        Ok(SealedCredentials::Plain(credentials.clone()))
    }

    fn unseal(&self, sealed: &SealedCredentials) -> Result<Credentials, ProtectError> {
        match sealed {
            SealedCredentials::Plain(credentials) => Ok(credentials.clone()),
            SealedCredentials::Chacha20Poly1305 { .. } => {
                Err(ProtectError::SchemeMismatch("chacha20poly1305"))
            }
        }
    }
}

/// Encrypts credentials with a key derived from a passphrase.
///
/// Each instance picks a random salt and derives its sealing key once.
/// Records sealed by an earlier process carry their own salt; the key for
/// those is derived on first use and cached.
pub struct PassphraseProtector {
    passphrase: String,
    salt: [u8; SALT_LEN],
    key: Key,
    derived: Mutex<HashMap<Vec<u8>, Key>>,
}

impl PassphraseProtector {
    pub fn new(passphrase: impl Into<String>) -> Result<Self, ProtectError> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(ProtectError::KeyDerivation("passphrase is empty".to_string()));
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = derive_key(&passphrase, &salt)?;

        Ok(Self {
            passphrase,
            salt,
            key,
            derived: Mutex::new(HashMap::new()),
        })
    }

    fn key_for_salt(&self, salt: &[u8]) -> Result<Key, ProtectError> {
        if salt == self.salt.as_slice() {
            return Ok(self.key.clone());
        }

        let mut derived = self.derived.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = derived.get(salt) {
            return Ok(key.clone());
        }
        let key = derive_key(&self.passphrase, salt)?;
        derived.insert(salt.to_vec(), key.clone());
        Ok(key)
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<Key, ProtectError> {
    let mut key = Key::default();
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| ProtectError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

impl SecretProtector for PassphraseProtector {
    fn seal(&self, credentials: &Credentials) -> Result<SealedCredentials, ProtectError> {
        let plaintext =
            serde_json::to_vec(credentials).map_err(|e| ProtectError::Payload(e.to_string()))?;

        let cipher = ChaCha20Poly1305::new(&self.key);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_ref())
            .map_err(|_| ProtectError::Encrypt)?;

        Ok(SealedCredentials::Chacha20Poly1305 {
            salt: self.salt.to_vec(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    fn unseal(&self, sealed: &SealedCredentials) -> Result<Credentials, ProtectError> {
        match sealed {
            // Written before encryption was turned on; re-sealed on the next store write.
            SealedCredentials::Plain(credentials) => Ok(credentials.clone()),
            SealedCredentials::Chacha20Poly1305 {
                salt,
                nonce,
                ciphertext,
            } => {
                if nonce.len() != NONCE_LEN {
                    return Err(ProtectError::Payload(format!(
                        "nonce must be {} bytes, got {}",
                        NONCE_LEN,
                        nonce.len()
                    )));
                }
                let key = self.key_for_salt(salt)?;
                let cipher = ChaCha20Poly1305::new(&key);
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext.as_ref())
                    .map_err(|_| ProtectError::Decrypt)?;
                serde_json::from_slice(&plaintext).map_err(|e| ProtectError::Payload(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("planner", "s3cret-pass", "PMDB")
    }

    #[test]
    fn test_plain_protector_round_trip() {
        let sealed = PlainProtector.seal(&creds()).expect("seal");
        assert!(matches!(sealed, SealedCredentials::Plain(_)));
        assert_eq!(PlainProtector.unseal(&sealed).expect("unseal"), creds());
    }

    #[test]
    fn test_plain_protector_rejects_encrypted_record() {
        let protector = PassphraseProtector::new("correct horse").expect("protector");
        let sealed = protector.seal(&creds()).expect("seal");
        assert!(matches!(
            PlainProtector.unseal(&sealed),
            Err(ProtectError::SchemeMismatch(_))
        ));
    }

    #[test]
    fn test_passphrase_protector_hides_password() {
        let protector = PassphraseProtector::new("correct horse").expect("protector");
        let sealed = protector.seal(&creds()).expect("seal");
        let json = serde_json::to_string(&sealed).expect("serialize");
        assert!(json.contains(r#""scheme":"chacha20poly1305""#));
        assert!(!json.contains("s3cret-pass"));
        assert!(!json.contains("planner"));
        assert_eq!(protector.unseal(&sealed).expect("unseal"), creds());
    }

    #[test]
    fn test_passphrase_protector_opens_records_from_other_instance() {
        let first = PassphraseProtector::new("correct horse").expect("protector");
        let sealed = first.seal(&creds()).expect("seal");

        // A new process gets a new salt but the same passphrase
        let second = PassphraseProtector::new("correct horse").expect("protector");
        assert_eq!(second.unseal(&sealed).expect("unseal"), creds());
    }

    #[test]
    fn test_passphrase_protector_wrong_passphrase() {
        let sealed = PassphraseProtector::new("correct horse")
            .expect("protector")
            .seal(&creds())
            .expect("seal");
        let other = PassphraseProtector::new("battery staple").expect("protector");
        assert!(matches!(other.unseal(&sealed), Err(ProtectError::Decrypt)));
    }

    #[test]
    fn test_passphrase_protector_rejects_empty_passphrase() {
        assert!(PassphraseProtector::new("").is_err());
    }
}
