//! Durable key/value persistence for Switchyard state.
//!
//! [`MemoryStore`] backs the bandit statistics and run records.  Every
//! mutation rewrites the full JSON map through a temp-file-then-rename
//! sequence, so a crash mid-write never corrupts previously committed state.
//! A missing or unreadable file self-heals to an empty store on open.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use switchyard_types::{Result, SwitchyardError};

/// Durable JSON-backed key/value store.
///
/// Cloning a `MemoryStore` yields another handle to the **same** inner map
/// and lock, which is how concurrent runs share one persisted state without
/// losing updates: every mutation holds the lock across its whole
/// read-modify-write-persist sequence.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<tokio::sync::Mutex<HashMap<String, serde_json::Value>>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Open a store backed by the JSON file at `path`.
    ///
    /// A missing file yields an empty store; a corrupt file is logged and
    /// replaced by an empty store on the next write. Neither is fatal.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<HashMap<String, serde_json::Value>>(&raw) {
                Ok(map) => map,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        %err,
                        "Store file is corrupt; starting from an empty store"
                    );
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            inner: Arc::new(tokio::sync::Mutex::new(map)),
            path: Some(path),
        })
    }

    /// An ephemeral store that never touches disk. Useful for tests and for
    /// callers that opt out of persistence.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            path: None,
        }
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().await.get(key).cloned()
    }

    /// Read a value by key, falling back to `default` when absent.
    pub async fn get_or(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
        self.get(key).await.unwrap_or(default)
    }

    /// Insert or overwrite a key and persist the store.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.insert(key.into(), value);
        self.persist(&guard).await
    }

    /// Apply `f` to the current value of `key` and persist the result.
    ///
    /// The store lock is held across the whole read-modify-write-persist
    /// sequence, so concurrent updaters sharing this store never lose
    /// increments. Returns the stored value.
    pub async fn update<F>(&self, key: &str, f: F) -> Result<serde_json::Value>
    where
        F: FnOnce(Option<serde_json::Value>) -> serde_json::Value,
    {
        let mut guard = self.inner.lock().await;
        let next = f(guard.get(key).cloned());
        guard.insert(key.to_string(), next.clone());
        self.persist(&guard).await?;
        Ok(next)
    }

    /// Remove a key, persisting the store. Returns the removed value.
    pub async fn remove(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut guard = self.inner.lock().await;
        let removed = guard.remove(key);
        if removed.is_some() {
            self.persist(&guard).await?;
        }
        Ok(removed)
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Serialize the full map and atomically replace the backing file.
    async fn persist(&self, map: &HashMap<String, serde_json::Value>) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(map)?;
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await.map_err(|err| {
            SwitchyardError::Store(format!(
                "failed to commit {}: {err}",
                path.display()
            ))
        })?;
        tracing::debug!(path = %path.display(), keys = map.len(), "Store persisted");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
