// SPDX-License-Identifier: Apache-2.0

//! Read positions of every harvested file, keyed by file identity.
//!
//! The registry lives in memory behind a mutex. Harvesters update their own
//! entry after each batch of lines is accepted by the output channel; the
//! [`Registrar`] snapshots the whole map to disk on a timer.

mod json_file;
mod registrar;
mod schema;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::crawler::error::Result;
use crate::crawler::input::{FileId, Fingerprint};

pub use registrar::{Registrar, RegistrarConfig};
pub use schema::{PERSISTED_STATE_VERSION, PersistedFileEntryV1, PersistedStateV1};

/// Registry shared between the prospectors, their harvesters and the registrar.
pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Last known read state of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub file_id: FileId,
    pub path: PathBuf,
    pub offset: u64,
    pub last_seen: DateTime<Utc>,
    pub finished: bool,
    /// Leading bytes read so far, empty until the harvester records them
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Default)]
pub struct Registry {
    /// Empty for an in-memory registry
    path: PathBuf,
    files: HashMap<FileId, FileState>,
}

impl Registry {
    /// Registry that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the registry file. A missing file is a cold start, a corrupt one
    /// is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut files = HashMap::new();

        match json_file::read_state(&path)? {
            None => info!(path = %path.display(), "No registry file found, starting fresh"),
            Some(state) => {
                for (key, entry) in state.files {
                    let file_id = FileId::new(entry.dev, entry.ino);
                    if key != file_id.key() {
                        debug!(key, "Registry key does not match entry identity, using identity");
                    }
                    files.insert(
                        file_id,
                        FileState {
                            file_id,
                            path: PathBuf::from(entry.path),
                            offset: entry.offset,
                            last_seen: entry.last_seen,
                            finished: entry.finished,
                            fingerprint: Fingerprint::from_bytes(entry.fingerprint),
                        },
                    );
                }
                info!(
                    path = %path.display(),
                    files = files.len(),
                    "Loaded registry"
                );
            }
        }

        Ok(Self { path, files })
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted offset, 0 for unknown files.
    pub fn get(&self, file_id: &FileId) -> u64 {
        self.files.get(file_id).map(|s| s.offset).unwrap_or(0)
    }

    pub fn state(&self, file_id: &FileId) -> Option<&FileState> {
        self.files.get(file_id)
    }

    pub fn update(&mut self, file_id: FileId, path: &Path, offset: u64, finished: bool) {
        let now = Utc::now();
        let state = self.files.entry(file_id).or_insert_with(|| FileState {
            file_id,
            path: path.to_path_buf(),
            offset,
            last_seen: now,
            finished,
            fingerprint: Fingerprint::default(),
        });

        if state.path != path {
            state.path = path.to_path_buf();
        }
        state.offset = offset;
        state.finished = finished;
        state.last_seen = now;
    }

    /// Replace the fingerprint of a known file. Unknown files are ignored.
    pub fn set_fingerprint(&mut self, file_id: &FileId, fingerprint: &Fingerprint) {
        if let Some(state) = self.files.get_mut(file_id) {
            if state.fingerprint != *fingerprint {
                state.fingerprint = fingerprint.clone();
            }
        }
    }

    /// Remove every entry for which `predicate` holds, returning how many went.
    pub fn prune<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&FileState) -> bool,
    {
        let before = self.files.len();
        self.files.retain(|_, state| !predicate(state));
        before - self.files.len()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn snapshot(&self) -> PersistedStateV1 {
        let files = self
            .files
            .values()
            .map(|s| {
                let entry = PersistedFileEntryV1 {
                    path: s.path.to_string_lossy().into_owned(),
                    dev: s.file_id.dev(),
                    ino: s.file_id.ino(),
                    offset: s.offset,
                    finished: s.finished,
                    last_seen: s.last_seen,
                    fingerprint: s.fingerprint.bytes().to_vec(),
                };
                (entry.key(), entry)
            })
            .collect();

        PersistedStateV1 {
            version: PERSISTED_STATE_VERSION,
            files,
        }
    }

}

/// Lock the shared registry. A poisoned lock still holds consistent data
/// since every mutation is a single map operation.
pub fn lock(registry: &SharedRegistry) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| {
        warn!("Registry lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Snapshot under the lock and write outside of it, so harvesters are never
/// held up by disk I/O. No-op for an in-memory registry.
pub fn flush(registry: &SharedRegistry) -> Result<()> {
    let (path, snapshot) = {
        let guard = lock(registry);
        (guard.path.clone(), guard.snapshot())
    };

    if path.as_os_str().is_empty() {
        return Ok(());
    }
    json_file::atomic_write(&path, &snapshot)
}
