//! Small JSON key/value store standing in for the page's local storage.
//!
//! Writes are cheap (in-memory + dirty flag); a background task debounces
//! them to disk. Every disk failure is logged and swallowed.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::{fs, time::Duration};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::config::StageConfig;

const LOCAL_STORE_VERSION: u32 = 1;
const LOCAL_STORE_FILE: &str = "local_store.json";
const PERSIST_DEBOUNCE: Duration = Duration::from_millis(350);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedLocalState {
    version: u32,
    entries: Map<String, Value>,
}

impl Default for PersistedLocalState {
    fn default() -> Self {
        Self {
            version: LOCAL_STORE_VERSION,
            entries: Map::new(),
        }
    }
}

#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<LocalStoreInner>,
}

struct LocalStoreInner {
    path: Option<PathBuf>,
    state: Mutex<PersistedLocalState>,
    dirty: AtomicBool,
    notify: Notify,
    io_lock: Mutex<()>,
}

impl LocalStore {
    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(LocalStoreInner {
                path,
                state: Mutex::new(PersistedLocalState::default()),
                dirty: AtomicBool::new(false),
                notify: Notify::new(),
                io_lock: Mutex::new(()),
            }),
        }
    }

    /// Store that never touches the disk.
    pub fn in_memory() -> Self {
        Self::with_path(None)
    }

    /// Open (or lazily create) a store backed by `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::with_path(Some(path.into()));
        store.load_from_disk();
        store
    }

    /// Open `local_store.json` inside the configured data directory.
    pub fn open_default(config: &StageConfig) -> Result<Self, String> {
        let dir = super::paths::init_data_dir(config.data_dir.as_deref())?;
        Ok(Self::open(dir.join(LOCAL_STORE_FILE)))
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.inner.state.lock().ok()?.entries.get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(err) => {
                log::warn!("local store: ignoring malformed value for {}: {}", key, err);
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                log::warn!("local store: failed to serialize {}: {}", key, err);
                return;
            }
        };

        let mut changed = false;
        if let Ok(mut state) = self.inner.state.lock() {
            if state.entries.get(key) != Some(&value) {
                state.entries.insert(key.to_string(), value);
                changed = true;
            }
        }
        if changed {
            self.mark_dirty();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    fn load_from_disk(&self) {
        let Some(path) = self.inner.path.as_ref() else { return };
        let Ok(contents) = fs::read_to_string(path) else { return };
        let mut parsed = match serde_json::from_str::<PersistedLocalState>(&contents) {
            Ok(parsed) => parsed,
            Err(err) => {
                log::warn!("local store: discarding unreadable {}: {}", path.display(), err);
                return;
            }
        };

        if parsed.version != LOCAL_STORE_VERSION {
            parsed = PersistedLocalState::default();
        }

        if let Ok(mut state) = self.inner.state.lock() {
            *state = parsed;
        }
    }

    /// Write the current state immediately.
    pub fn flush(&self) {
        let snapshot = match self.inner.state.lock() {
            Ok(s) => s.clone(),
            Err(_) => return,
        };
        self.inner.dirty.store(false, Ordering::SeqCst);
        self.write_snapshot(&snapshot);
    }

    /// Debounced background writer. Abort the handle to stop it.
    pub fn spawn_persist_task(&self) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                store.inner.notify.notified().await;

                // Debounce: wait for a quiet period after the last update.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(PERSIST_DEBOUNCE) => break,
                        _ = store.inner.notify.notified() => continue,
                    }
                }

                if !store.inner.dirty.swap(false, Ordering::SeqCst) {
                    continue;
                }

                let snapshot = match store.inner.state.lock() {
                    Ok(s) => s.clone(),
                    Err(_) => continue,
                };
                store.write_snapshot(&snapshot);
            }
        })
    }

    fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    fn write_snapshot(&self, snapshot: &PersistedLocalState) {
        let Some(path) = self.inner.path.as_ref() else { return };
        if let Err(err) = self.try_write_snapshot(path, snapshot) {
            log::warn!("local store: write to {} failed: {}", path.display(), err);
        }
    }

    fn try_write_snapshot(&self, path: &Path, snapshot: &PersistedLocalState) -> Result<(), String> {
        let serialized = serde_json::to_string(snapshot).map_err(|e| e.to_string())?;

        let _guard = self
            .inner
            .io_lock
            .lock()
            .map_err(|_| "io lock poisoned".to_string())?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized).map_err(|e| e.to_string())?;
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        fs::rename(&tmp_path, path).map_err(|e| e.to_string())
    }
}
