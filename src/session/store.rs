//! Credential persistence.
//!
//! The session pair lives in a durable key-value storage under a fixed key so
//! a restart restores the logged-in state. Storage failures degrade to
//! "logged out" and are never returned to the caller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use super::Session;
use crate::errors::StorageError;

/// Fixed key under which the session pair is stored.
pub const SESSION_STORAGE_KEY: &str = "hardcore_cards_session";

/// String key-value storage with durable semantics.
pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

// ── File-backed storage ───────────────────────────────────────────────

/// A single JSON object file holding string entries.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Map<String, Value>, StorageError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&content).map_err(StorageError::Corrupt)? {
            Value::Object(entries) => Ok(entries),
            _ => Ok(Map::new()),
        }
    }

    fn write_entries(&self, entries: &Map<String, Value>) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content =
            serde_json::to_string_pretty(&Value::Object(entries.clone())).map_err(StorageError::Corrupt)?;
        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, content).map_err(write_err)?;
        restrict_to_owner(&tmp).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }

    /// Current entries for a read-modify-write. An unparseable file is
    /// replaced rather than blocking every later write.
    fn entries_for_update(&self) -> Result<Map<String, Value>, StorageError> {
        match self.read_entries() {
            Err(StorageError::Corrupt(e)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "storage file is unreadable; starting it over"
                );
                Ok(Map::new())
            }
            other => other,
        }
    }
}

/// The file holds bearer credentials: owner read/write only.
#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .read_entries()?
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries_for_update()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        self.write_entries(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries_for_update()?;
        if entries.remove(key).is_some() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

// ── In-memory storage ─────────────────────────────────────────────────

/// Process-local storage. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// ── Credential store ──────────────────────────────────────────────────

/// Saves, loads and clears the session pair. Every storage error is logged
/// and swallowed.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueStorage>,
}

impl CredentialStore {
    pub fn new(backend: impl KeyValueStorage + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// A store that forgets everything when the process exits.
    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::new())
    }

    pub fn save(&self, session: &Session) {
        let serialized = match serde_json::to_string(session) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize session; not persisted");
                return;
            }
        };
        if let Err(e) = self.backend.set(SESSION_STORAGE_KEY, &serialized) {
            tracing::warn!(error = %e, "failed to persist session");
        }
    }

    pub fn load(&self) -> Option<Session> {
        let raw = match self.backend.get(SESSION_STORAGE_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stored session; treating as absent");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "stored session is unreadable; treating as absent");
                None
            }
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(SESSION_STORAGE_KEY) {
            tracing::warn!(error = %e, "failed to clear stored session");
        }
    }
}
