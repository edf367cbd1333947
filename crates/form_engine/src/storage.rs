//! Snapshot persistence.
//!
//! `KeyValueStore` is the seam to the host's key-value storage (string keys,
//! string values). Two stores ship with the crate:
//! - `MemoryStore`: cloneable handle; clones share one map
//! - `FileStore`: one JSON file per key inside a directory; writes go to a
//!   temporary file renamed into place while an advisory lock is held
//!
//! `SnapshotStorage` sits on top and is the only thing the engine talks to.
//! It never returns errors: failures are logged and read as "no snapshot".

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;
use crate::field::FormData;

/// Prefix joined with the form id to build a storage key.
pub const DEFAULT_KEY_PREFIX: &str = "form_";

/// Host key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store. Clones share the same entries.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Advisory lock shared by every key of a `FileStore` directory.
const LOCK_FILE_NAME: &str = ".forms.lock";

/// Directory-backed store: `<dir>/<key>.json`, guarded by one lock file.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (or create) the store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Per-user data directory for `app`, e.g. `~/.local/share/<app>/forms`.
    pub fn default_location(qualifier: &str, organization: &str, app: &str) -> Option<PathBuf> {
        ProjectDirs::from(qualifier, organization, app).map(|p| p.data_local_dir().join("forms"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are sanitized to a safe file stem.
    fn path_for(&self, key: &str) -> PathBuf {
        let stem: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{stem}.json"))
    }

    /// Run `f` on the file for `key` while holding the directory lock.
    fn with_lock<F, R>(&self, key: &str, exclusive: bool, f: F) -> Result<R, StorageError>
    where
        F: FnOnce(&Path) -> Result<R, StorageError>,
    {
        let path = self.path_for(key);
        let lock_path = self.dir.join(LOCK_FILE_NAME);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if exclusive {
            FileExt::lock_exclusive(&lock)?;
        } else {
            FileExt::lock_shared(&lock)?;
        }
        let res = f(&path);
        FileExt::unlock(&lock)?;
        res
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.with_lock(key, false, |path| {
            if !path.exists() {
                return Ok(None);
            }
            Ok(Some(fs::read_to_string(path)?))
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.with_lock(key, true, |path| {
            let tmp = path.with_extension("tmp");
            let mut f = File::create(&tmp)?;
            f.write_all(value.as_bytes())?;
            f.sync_all()?;
            fs::rename(&tmp, path)?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.with_lock(key, true, |path| {
            if path.exists() {
                fs::remove_file(path)?;
            }
            Ok(())
        })
    }
}

/// Persisted form state.
///
/// Wire shape: `{"formData": {...}, "currentStep": n, "timestamp": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormSnapshot {
    pub form_data: FormData,
    pub current_step: usize,
    pub timestamp: DateTime<Utc>,
}

impl FormSnapshot {
    pub fn new(form_data: FormData, current_step: usize) -> Self {
        Self {
            form_data,
            current_step,
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot adapter over a `KeyValueStore`. Errors never escape.
#[derive(Clone)]
pub struct SnapshotStorage {
    store: Arc<dyn KeyValueStore>,
    excluded_fields: Vec<String>,
}

impl std::fmt::Debug for SnapshotStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStorage")
            .field("excluded_fields", &self.excluded_fields)
            .finish_non_exhaustive()
    }
}

impl SnapshotStorage {
    pub fn new(store: Arc<dyn KeyValueStore>, excluded_fields: Vec<String>) -> Self {
        Self {
            store,
            excluded_fields,
        }
    }

    pub fn excluded_fields(&self) -> &[String] {
        &self.excluded_fields
    }

    /// Write `snapshot` under `key`, minus excluded fields. Returns whether it was stored.
    pub fn save(&self, key: &str, snapshot: &FormSnapshot) -> bool {
        let mut snapshot = snapshot.clone();
        for field in &self.excluded_fields {
            snapshot.form_data.remove(field);
        }
        let result = serde_json::to_string(&snapshot)
            .map_err(StorageError::from)
            .and_then(|text| self.store.set(key, &text));
        match result {
            Ok(()) => {
                debug!("saved form snapshot '{key}' (step {})", snapshot.current_step);
                true
            }
            Err(e) => {
                warn!("failed to save form snapshot '{key}': {e}");
                false
            }
        }
    }

    /// Read the snapshot under `key`. Missing, unreadable or corrupt entries are `None`.
    pub fn load(&self, key: &str) -> Option<FormSnapshot> {
        let text = match self.store.get(key) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to read form snapshot '{key}': {e}");
                return None;
            }
        };
        match serde_json::from_str::<FormSnapshot>(&text) {
            Ok(mut snapshot) => {
                // Entries written by older clients may still carry excluded fields.
                for field in &self.excluded_fields {
                    snapshot.form_data.remove(field);
                }
                Some(snapshot)
            }
            Err(e) => {
                warn!("ignoring corrupt form snapshot '{key}': {e}");
                None
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to remove form snapshot '{key}': {e}");
                false
            }
        }
    }
}
