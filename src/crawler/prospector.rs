// SPDX-License-Identifier: Apache-2.0

//! Periodic discovery of files worth harvesting.
//!
//! A prospector owns its discovery state exclusively: the set of live
//! harvesters, the files it decided to skip and the last identity seen at
//! each path. Harvesters report back only through their join handle, which
//! the prospector reaps at the start of every scan. The one piece of state
//! shared with the other prospectors is the set of claimed identities, which
//! keeps a file matched by several prospectors down to a single harvester.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use tokio::io::AsyncRead;
use tokio::select;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::crawler::config::{InputType, ProspectorConfig};
use crate::crawler::error::Result;
use crate::crawler::event::{Event, STDIN_SOURCE};
use crate::crawler::claims::HarvesterClaims;
use crate::crawler::harvester::{Harvester, HarvesterExit};
use crate::crawler::input::{FileFinder, FileId, FoundFile, stdin_reader};
use crate::crawler::registry::{SharedRegistry, lock};

/// Handle kept for every running harvester
struct LiveHarvester {
    path: PathBuf,
    cancel: CancellationToken,
}

pub struct Prospector {
    config: Arc<ProspectorConfig>,
    /// `None` in stdin mode
    finder: Option<FileFinder>,
    registry: SharedRegistry,
    output: BoundedSender<Event>,
    claims: HarvesterClaims,

    harvesters: JoinSet<HarvesterExit>,
    /// Task id of every harvester, so that a panicked task can be attributed
    tasks: HashMap<Id, Option<FileId>>,
    live: HashMap<FileId, LiveHarvester>,
    /// Files skipped for their age, with the mtime they were skipped at
    skipped: HashMap<FileId, SystemTime>,
    /// Identity last seen at each path, for rotation detection
    paths: HashMap<PathBuf, FileId>,
    /// Size up to which a closed harvester read, when it stopped on an
    /// unterminated line
    partial_at: HashMap<FileId, u64>,

    stdin: Option<Box<dyn AsyncRead + Unpin + Send>>,
    stdin_started: bool,
}

impl Prospector {
    /// Validates the configuration and compiles its patterns.
    pub fn new(
        config: ProspectorConfig,
        registry: SharedRegistry,
        output: BoundedSender<Event>,
    ) -> Result<Self> {
        config.validate()?;

        let finder = match config.input_type {
            InputType::Files => Some(FileFinder::new(
                config.paths.clone(),
                &config.exclude_files,
                config.fingerprint_size,
            )?),
            InputType::Stdin => None,
        };

        Ok(Self {
            config: Arc::new(config),
            finder,
            registry,
            output,
            claims: HarvesterClaims::new(),
            harvesters: JoinSet::new(),
            tasks: HashMap::new(),
            live: HashMap::new(),
            skipped: HashMap::new(),
            paths: HashMap::new(),
            partial_at: HashMap::new(),
            stdin: None,
            stdin_started: false,
        })
    }

    /// Read from `reader` instead of the process's stdin.
    pub fn with_stdin_reader(mut self, reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        self.stdin = Some(reader);
        self
    }

    /// Share harvester claims with other prospectors.
    pub fn with_claims(mut self, claims: HarvesterClaims) -> Self {
        self.claims = claims;
        self
    }

    pub fn config(&self) -> &ProspectorConfig {
        &self.config
    }

    /// Scan every `scan_frequency` until cancelled, then wait for the
    /// harvesters, which share the cancellation through child tokens.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            input_type = ?self.config.input_type,
            paths = ?self.config.paths,
            scan_frequency = ?self.config.scan_frequency,
            "Starting prospector"
        );

        let mut ticker = tokio::time::interval(self.config.scan_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Prospector cancelled, stopping harvesters");
                    break;
                }

                _ = ticker.tick() => self.scan(&cancel).await,
            }
        }

        while let Some(res) = self.harvesters.join_next_with_id().await {
            self.on_harvester_exit(res);
        }
        debug!("All harvesters of prospector stopped");

        Ok(())
    }

    async fn scan(&mut self, cancel: &CancellationToken) {
        self.reap();
        info!("Start next scan");

        let finder = match &self.finder {
            Some(finder) => finder.clone(),
            None => {
                self.start_stdin(cancel);
                return;
            }
        };

        let found = match tokio::task::spawn_blocking(move || finder.scan()).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!("Failed to scan for files: {}", e);
                return;
            }
            Err(e) => {
                error!("File scan task failed: {}", e);
                return;
            }
        };

        let mut seen = HashSet::with_capacity(found.len());
        for file in found {
            seen.insert(file.file_id);
            self.track_path(&file);
            self.consider(file, cancel);
        }

        self.forget_unseen(&seen);
        self.cleanup_registry(&seen);
    }

    fn start_stdin(&mut self, cancel: &CancellationToken) {
        if self.stdin_started {
            return;
        }
        self.stdin_started = true;

        let reader = match self.stdin.take() {
            Some(reader) => reader,
            None => match stdin_reader() {
                Ok(reader) => reader,
                Err(e) => {
                    error!("Failed to start reading stdin: {}", e);
                    return;
                }
            },
        };
        let harvester = Harvester::stream(
            STDIN_SOURCE,
            reader,
            self.config.clone(),
            self.output.clone(),
        );
        let handle = self.harvesters.spawn(harvester.run(cancel.child_token()));
        self.tasks.insert(handle.id(), None);
    }

    fn track_path(&mut self, file: &FoundFile) {
        if let Some(previous) = self.paths.insert(file.path.clone(), file.file_id) {
            if previous != file.file_id {
                info!(
                    previous = %previous,
                    current = %file.file_id,
                    "File rotated: {}",
                    file.path.display()
                );
            }
        }
    }

    /// Decide whether a found file needs a harvester, and start it.
    fn consider(&mut self, file: FoundFile, cancel: &CancellationToken) {
        if self.live.contains_key(&file.file_id) || self.claims.is_claimed(&file.file_id) {
            return;
        }

        if let Some(ignore_older) = self.config.ignore_older {
            let age = SystemTime::now()
                .duration_since(file.modified)
                .unwrap_or_default();
            if age > ignore_older {
                if self.skipped.get(&file.file_id) != Some(&file.modified) {
                    info!(
                        "Skipping file (older than ignore older of {}): {}",
                        humantime::format_duration(ignore_older),
                        file.path.display()
                    );
                    self.skipped.insert(file.file_id, file.modified);
                }
                return;
            }
        }
        self.skipped.remove(&file.file_id);

        let Some(offset) = self.start_offset(&file) else {
            return;
        };

        if !self.claims.try_claim(file.file_id) {
            debug!(
                path = %file.path.display(),
                file_id = %file.file_id,
                "File is already harvested by another prospector"
            );
            return;
        }

        self.start_harvester(file, offset, cancel);
    }

    /// Offset to harvest `file` from, `None` when there is nothing to read.
    fn start_offset(&self, file: &FoundFile) -> Option<u64> {
        let registry = lock(&self.registry);
        let Some(state) = registry.state(&file.file_id) else {
            return Some(if self.config.tail_files { file.size } else { 0 });
        };

        if !file.fingerprint.continues(&state.fingerprint) {
            info!(
                file_id = %file.file_id,
                offset = state.offset,
                "File identity was reused by new content, reading from the beginning: {}",
                file.path.display()
            );
            return Some(0);
        }

        let offset = state.offset;
        if offset == file.size {
            return None;
        }
        if file.size < offset {
            debug!(
                path = %file.path.display(),
                offset,
                size = file.size,
                "File is smaller than its stored offset, restarting from the beginning"
            );
            return Some(0);
        }
        // Only an unterminated line past the offset, which was already read
        if self.partial_at.get(&file.file_id) == Some(&file.size) {
            return None;
        }
        Some(offset)
    }

    fn start_harvester(&mut self, file: FoundFile, offset: u64, cancel: &CancellationToken) {
        debug!(
            path = %file.path.display(),
            file_id = %file.file_id,
            offset,
            "Starting harvester"
        );

        self.partial_at.remove(&file.file_id);
        let child = cancel.child_token();
        let harvester = Harvester::file(
            file.path.clone(),
            file.file_id,
            offset,
            self.config.clone(),
            self.registry.clone(),
            self.output.clone(),
        );
        let handle = self.harvesters.spawn(harvester.run(child.clone()));
        self.tasks.insert(handle.id(), Some(file.file_id));
        self.live.insert(
            file.file_id,
            LiveHarvester {
                path: file.path,
                cancel: child,
            },
        );
    }

    fn reap(&mut self) {
        while let Some(res) = self.harvesters.try_join_next_with_id() {
            self.on_harvester_exit(res);
        }
    }

    fn on_harvester_exit(&mut self, res: std::result::Result<(Id, HarvesterExit), JoinError>) {
        let task_id = match res {
            Ok((task_id, exit)) => {
                debug!(
                    file_id = ?exit.file_id,
                    offset = exit.offset,
                    read_to = exit.read_to,
                    reason = ?exit.reason,
                    "Harvester finished"
                );
                if let Some(file_id) = exit.file_id {
                    if exit.read_to > exit.offset {
                        self.partial_at.insert(file_id, exit.read_to);
                    } else {
                        self.partial_at.remove(&file_id);
                    }
                }
                task_id
            }
            Err(e) => {
                error!("Harvester task failed: {}", e);
                e.id()
            }
        };

        if let Some(Some(file_id)) = self.tasks.remove(&task_id) {
            self.claims.release(&file_id);
            if let Some(live) = self.live.remove(&file_id) {
                // Already finished, this only drops the child from its parent
                live.cancel.cancel();
                debug!(path = %live.path.display(), "Released harvester slot");
            }
        }
    }

    /// Bound the discovery maps to what the last scan returned.
    fn forget_unseen(&mut self, seen: &HashSet<FileId>) {
        self.skipped.retain(|id, _| seen.contains(id));
        self.paths.retain(|_, id| seen.contains(id));
        self.partial_at.retain(|id, _| seen.contains(id));
    }

    /// Remove finished entries of files that are gone for longer than
    /// `ignore_older`. Without `ignore_older` entries are kept forever.
    fn cleanup_registry(&mut self, seen: &HashSet<FileId>) {
        let (Some(ignore_older), Some(finder)) = (self.config.ignore_older, &self.finder) else {
            return;
        };
        let Ok(ignore_older) = chrono::Duration::from_std(ignore_older) else {
            return;
        };
        let cutoff = Utc::now() - ignore_older;

        let removed = lock(&self.registry).prune(|state| {
            state.finished
                && state.last_seen < cutoff
                && !seen.contains(&state.file_id)
                && !self.claims.is_claimed(&state.file_id)
                && finder.matches(&state.path)
        });

        if removed > 0 {
            debug!(removed, "Removed registry entries of files that are gone");
        }
    }

    #[cfg(test)]
    fn live_count(&self) -> usize {
        self.live.len()
    }
}
