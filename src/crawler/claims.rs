// SPDX-License-Identifier: Apache-2.0

//! File identities with a live harvester, shared by every prospector of a
//! crawler so that overlapping patterns never harvest a file twice.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::crawler::input::FileId;

#[derive(Debug, Clone, Default)]
pub struct HarvesterClaims {
    claimed: Arc<Mutex<HashSet<FileId>>>,
}

impl HarvesterClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// False when another harvester already owns `file_id`.
    pub fn try_claim(&self, file_id: FileId) -> bool {
        self.lock().insert(file_id)
    }

    pub fn release(&self, file_id: &FileId) {
        self.lock().remove(file_id);
    }

    pub fn is_claimed(&self, file_id: &FileId) -> bool {
        self.lock().contains(file_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<FileId>> {
        self.claimed.lock().unwrap_or_else(|poisoned| {
            warn!("Harvester claims lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
