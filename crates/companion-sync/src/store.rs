//! Durable key-value storage for the sync core.
//!
//! The sync core publishes its state through a small set of well-known
//! keys holding JSON values. Embedders provide whatever backing they have
//! (extension storage, a state file, a test map) behind [`KeyValueStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use companion_providers::BoxFuture;

/// Persisted service configuration, a JSON array of service entries.
pub const CONFIG_KEY: &str = "onlineservices.config";
/// The published merged event list.
pub const EVENTS_KEY: &str = "events";
/// Backend status for UI collaborators: `"idle"` or `"fetching"`.
pub const STATUS_KEY: &str = "status";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store content: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Async key-value storage with JSON values.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<Value>>>;
    fn set(&self, key: &str, value: Value) -> BoxFuture<'_, StoreResult<()>>;
    fn remove(&self, key: &str) -> BoxFuture<'_, StoreResult<()>>;
}

/// In-memory store for tests and short-lived embedders.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek, for assertions.
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<Value>>> {
        let value = self.entries.lock().unwrap().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: Value) -> BoxFuture<'_, StoreResult<()>> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Box::pin(async move { Ok(()) })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, StoreResult<()>> {
        self.entries.lock().unwrap().remove(key);
        Box::pin(async move { Ok(()) })
    }
}

/// File-backed store holding all keys in one JSON document.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so a crash mid-write never leaves a truncated store behind.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: std::sync::Mutex<HashMap<String, Value>>,
}

impl FileStore {
    /// Opens the store, loading existing content when the file is present.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: std::sync::Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, entries: &HashMap<String, Value>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;

        // Credentials live in here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&temp_path, perms)?;
        }

        std::fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), "store saved");
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> BoxFuture<'_, StoreResult<Option<Value>>> {
        let value = self.entries.lock().unwrap().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: Value) -> BoxFuture<'_, StoreResult<()>> {
        let result = {
            let mut entries = self.entries.lock().unwrap();
            entries.insert(key.to_string(), value);
            self.save(&entries)
        };
        Box::pin(async move { result })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, StoreResult<()>> {
        let result = {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(key);
            self.save(&entries)
        };
        Box::pin(async move { result })
    }
}
