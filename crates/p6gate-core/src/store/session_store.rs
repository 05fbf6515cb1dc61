use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::{AuthArtifacts, PlainProtector, ProtectError, SealedCredentials, SecretProtector, Session};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write session store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize session store: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to seal credentials for session {id}: {source}")]
    Seal {
        id: String,
        #[source]
        source: ProtectError,
    },
}

/// On-disk form of one session.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSession {
    auth_artifacts: AuthArtifacts,
    created_at: DateTime<Utc>,
    #[serde(default)]
    last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    remembered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database_name: Option<String>,
    #[serde(default)]
    generation: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_ref: Option<SealedCredentials>,
}

struct Entry {
    session: Session,
    /// Insertion order, used to break `last_used_at` ties.
    seq: u64,
    /// Sealed credentials the current protector could not open. Written back
    /// unchanged so the right key can still recover them later.
    locked: Option<SealedCredentials>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, session: Session) {
        self.insert_locked(session, None);
    }

    fn insert_locked(&mut self, session: Session, locked: Option<SealedCredentials>) {
        match self.sessions.get_mut(&session.id) {
            Some(entry) => {
                entry.session = session;
                entry.locked = locked;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.sessions.insert(
                    session.id.clone(),
                    Entry {
                        session,
                        seq,
                        locked,
                    },
                );
            }
        }
    }
}

/// In-memory session table mirrored to a JSON file.
///
/// The file is rewritten whole after every change to membership, artifacts
/// or credentials, never after a `last_used_at` touch. A failed write leaves
/// the in-memory change in place and is returned as [`StoreError`].
pub struct SessionStore {
    path: Option<PathBuf>,
    protector: Arc<dyn SecretProtector>,
    inner: RwLock<Inner>,
}

impl SessionStore {
    /// Load the store from `path`. A missing or unreadable file gives an empty store.
    pub fn open(path: impl Into<PathBuf>, protector: Arc<dyn SecretProtector>) -> Self {
        let path = path.into();
        let (inner, needs_rewrite) = load(&path, protector.as_ref());
        let store = Self {
            path: Some(path),
            protector,
            inner: RwLock::new(inner),
        };

        if needs_rewrite {
            let guard = store.write_lock();
            if let Err(e) = store.persist(&guard) {
                warn!(error = %e, "Failed to rewrite session store after cleanup");
            }
        }
        store
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            protector: Arc::new(PlainProtector),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Add or replace a session.
    pub fn put(&self, session: Session) -> Result<(), StoreError> {
        let mut inner = self.write_lock();
        inner.insert(session);
        self.persist(&inner)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.read_lock().sessions.get(id).map(|e| e.session.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read_lock().sessions.contains_key(id)
    }

    /// Update `last_used_at` in memory only and return the touched session.
    pub fn touch(&self, id: &str, at: DateTime<Utc>) -> Option<Session> {
        let mut inner = self.write_lock();
        let entry = inner.sessions.get_mut(id)?;
        entry.session.last_used_at = at;
        Some(entry.session.clone())
    }

    /// Swap in renewed artifacts and bump the generation.
    ///
    /// Returns `Ok(None)` if the session was removed in the meantime; a
    /// renewal never brings an invalidated session back.
    pub fn replace_artifacts(
        &self,
        id: &str,
        artifacts: AuthArtifacts,
    ) -> Result<Option<Session>, StoreError> {
        let mut inner = self.write_lock();
        let Some(entry) = inner.sessions.get_mut(id) else {
            return Ok(None);
        };
        entry.session.auth_artifacts = artifacts;
        entry.session.generation += 1;
        let updated = entry.session.clone();
        self.persist(&inner)?;
        Ok(Some(updated))
    }

    /// Session with the latest `last_used_at`; ties go to the most recently inserted.
    pub fn most_recently_used(&self) -> Option<Session> {
        self.read_lock()
            .sessions
            .values()
            .max_by_key(|e| (e.session.last_used_at, e.seq))
            .map(|e| e.session.clone())
    }

    /// Remove a session. Removing an unknown id is not an error and writes nothing.
    pub fn remove(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let mut inner = self.write_lock();
        let Some(entry) = inner.sessions.remove(id) else {
            return Ok(None);
        };
        self.persist(&inner)?;
        Ok(Some(entry.session))
    }

    /// Remove every session, returning how many were dropped.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let mut inner = self.write_lock();
        let count = inner.sessions.len();
        inner.sessions.clear();
        self.persist(&inner)?;
        Ok(count)
    }

    /// All sessions in insertion order.
    pub fn all(&self) -> Vec<Session> {
        let inner = self.read_lock();
        let mut entries: Vec<&Entry> = inner.sessions.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.session.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read_lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rewrite the whole file. Called with the write lock held.
    fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let result = self
            .serialize(inner)
            .and_then(|contents| write_atomic(path, contents.as_bytes()));

        match &result {
            Ok(()) => debug!(path = %path.display(), count = inner.sessions.len(), "Saved session store"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to save session store"),
        }
        result
    }

    fn serialize(&self, inner: &Inner) -> Result<String, StoreError> {
        let mut records = BTreeMap::new();
        for (id, entry) in &inner.sessions {
            let session = &entry.session;
            let credential_ref = match session.credential_ref() {
                Some(credentials) => Some(self.protector.seal(credentials).map_err(|source| {
                    StoreError::Seal {
                        id: id.clone(),
                        source,
                    }
                })?),
                None => entry.locked.clone(),
            };
            records.insert(
                id.as_str(),
                StoredSession {
                    auth_artifacts: session.auth_artifacts.clone(),
                    created_at: session.created_at,
                    last_used_at: Some(session.last_used_at),
                    remembered: credential_ref.is_some(),
                    database_name: session.database_name.clone(),
                    generation: session.generation,
                    credential_ref,
                },
            );
        }
        Ok(serde_json::to_string_pretty(&records)?)
    }
}

/// Write to a sibling temp file, fsync, then rename over the target.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path).map_err(io_err)?;
    file.write_all(contents).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(io_err)
}

/// Read the store file. The flag is set when records were dropped or
/// credentials stripped, so the caller can rewrite a clean file.
fn load(path: &Path, protector: &dyn SecretProtector) -> (Inner, bool) {
    let mut inner = Inner::default();

    if !path.exists() {
        debug!(path = %path.display(), "No session store file, starting empty");
        return (inner, false);
    }

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read session store, starting empty");
            return (inner, false);
        }
    };

    let records: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&contents) {
        Ok(records) => records,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse session store, starting empty");
            return (inner, false);
        }
    };

    let mut dirty = false;
    let mut sessions = Vec::with_capacity(records.len());

    for (id, value) in records {
        let record: StoredSession = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(e) => {
                warn!(id = %id, error = %e, "Dropping invalid session record");
                dirty = true;
                continue;
            }
        };

        if id.trim().is_empty() || record.auth_artifacts.is_empty() {
            warn!(id = %id, "Dropping session record without auth artifacts");
            dirty = true;
            continue;
        }

        let mut locked = None;
        let credentials = match (record.remembered, record.credential_ref) {
            (true, Some(sealed)) => match protector.unseal(&sealed) {
                Ok(credentials) => Some(credentials),
                Err(e) => {
                    warn!(id = %id, error = %e, "Cannot unseal retained credentials, auto-login disabled");
                    locked = Some(sealed);
                    None
                }
            },
            (true, None) => {
                warn!(id = %id, "Session marked remembered without credentials, auto-login disabled");
                dirty = true;
                None
            }
            (false, Some(_)) => {
                warn!(id = %id, "Stripping credentials from session that was not remembered");
                dirty = true;
                None
            }
            (false, None) => None,
        };

        let last_used_at = record.last_used_at.unwrap_or(record.created_at);
        let session = Session::restore(
            id,
            record.auth_artifacts,
            record.created_at,
            last_used_at,
            record.database_name,
            record.generation,
            credentials,
        );
        sessions.push((session, locked));
    }

    // Re-derive insertion order from creation time
    sessions.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    for (session, locked) in sessions {
        inner.insert_locked(session, locked);
    }

    debug!(path = %path.display(), count = inner.sessions.len(), "Loaded session store");
    (inner, dirty)
}

// ============================================================================
// Tests
// ============================================================================
