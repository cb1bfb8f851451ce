//! Blob stores for computed artifacts.
//!
//! Artifacts are **content-addressed**: the key is the transformation's
//! fingerprint (source hash + parameters), never a path or URL. The same key
//! always maps to the same bytes, so re-storing is harmless and nothing is
//! ever updated in place.
//!
//! | Store | Scope |
//! |---|---|
//! | [`MemoryStore`] | one process; shared between service instances via `Arc` |
//! | [`FsStore`] | every process that mounts the same directory |
//!
//! ## FsStore layout
//!
//! ```text
//! <root>/
//! ├── 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed_200_200.jpg
//! └── 2aae6c35c94fcfb415dbe95f408b9ce91ee846ed_400_300.jpg
//! ```
//!
//! Writes land in a temp file next to the target and are renamed into place,
//! so readers see either nothing or the complete artifact.

use crate::service::{Store, StoreError};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Extension for stored artifacts; every artifact is a JPEG.
const ARTIFACT_EXTENSION: &str = "jpg";

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

/// One file per artifact under a root directory.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an artifact is stored at. Rejects keys that could escape the root.
    pub fn artifact_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.{ARTIFACT_EXTENSION}")))
    }
}

impl Store for FsStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        let path = match self.artifact_path(key) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(key, error = %e, "refusing store lookup");
                return None;
            }
        };
        match std::fs::read(&path) {
            Ok(data) => Some(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unable to read from store");
                None
            }
        }
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.artifact_path(key)?;
        write_atomic(&path, data)?;
        Ok(())
    }
}

/// Keys are fingerprints: `[A-Za-z0-9_-]+`.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}

/// Write `data` to `path` via a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp = path.with_file_name(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path).inspect_err(|_| {
        let _ = std::fs::remove_file(&tmp);
    })
}
