// SPDX-License-Identifier: Apache-2.0

//! JSON file storage for the registry, with atomic writes.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::Path;

use super::schema::{PERSISTED_STATE_VERSION, PersistedStateV1};
use crate::crawler::error::{Error, Result};

/// Read the registry file. `Ok(None)` when it does not exist yet.
pub fn read_state(path: &Path) -> Result<Option<PersistedStateV1>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(Error::Registry(format!(
                "failed to open {}: {}",
                path.display(),
                e
            )));
        }
    };

    let state: PersistedStateV1 = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| Error::Registry(format!("failed to parse {}: {}", path.display(), e)))?;

    if state.version != PERSISTED_STATE_VERSION {
        return Err(Error::Registry(format!(
            "unsupported registry version {} in {}",
            state.version,
            path.display()
        )));
    }

    Ok(Some(state))
}

/// Write state to file atomically (write to temp, then rename)
pub fn atomic_write(path: &Path, state: &PersistedStateV1) -> Result<()> {
    use portable_atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Registry(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    // Process ID plus counter keeps concurrent writers off each other's temp files
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    if let Err(e) = write_temp(&temp_path, state) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::Registry(format!(
            "failed to rename registry file: {}",
            e
        )));
    }

    Ok(())
}

/// Write and sync the whole state, so the rename never exposes a partial file.
fn write_temp(temp_path: &Path, state: &PersistedStateV1) -> Result<()> {
    let file = File::create(temp_path)
        .map_err(|e| Error::Registry(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, state)
        .map_err(|e| Error::Registry(format!("failed to write registry: {}", e)))?;

    let file = writer
        .into_inner()
        .map_err(|e| Error::Registry(format!("failed to flush registry: {}", e.error())))?;
    file.sync_all()
        .map_err(|e| Error::Registry(format!("failed to sync registry: {}", e)))?;

    Ok(())
}
