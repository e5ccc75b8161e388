//! State persistence
//!
//! The session persists exactly one thing: the engine's opaque state blob.
//! [`StateStore`] is the collaborator that keeps it. The file store writes
//! atomically (temp file, fsync, rename) so a crash mid-save leaves the
//! previous blob intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::errors::StoreError;

/// Keeps the serialized engine state between runs
pub trait StateStore: Send + 'static {
    /// Replace the stored blob
    fn save(&mut self, state: &[u8]) -> Result<(), StoreError>;

    /// Read the stored blob, `None` when nothing was saved yet
    fn load(&mut self) -> Result<Option<Vec<u8>>, StoreError>;
}

// ----------------------------------------------------------------------------
// File Store
// ----------------------------------------------------------------------------

/// Stores the blob in a single file
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn save(&mut self, state: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(state)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!("Saved {} bytes of state to {}", state.len(), self.path.display());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Err(StoreError::Corrupted {
                reason: format!("{} is empty", self.path.display()),
            }),
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Memory Store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    state: Option<Vec<u8>>,
    saves: usize,
}

/// Keeps the blob in memory. Clones share the same slot, so a test can hand
/// one clone to the session and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds a blob
    pub fn with_state(state: Vec<u8>) -> Self {
        let store = Self::new();
        store.lock().state = Some(state);
        store
    }

    /// Current blob
    pub fn contents(&self) -> Option<Vec<u8>> {
        self.lock().state.clone()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn save(&mut self, state: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.state = Some(state.to_vec());
        inner.saves += 1;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock().state.clone())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
