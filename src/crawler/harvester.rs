// SPDX-License-Identifier: Apache-2.0

//! Tails one file, or one stream such as stdin, and emits an event per line.
//!
//! A file harvester keeps its handle for its whole life, so it keeps reading
//! the same content after the path is renamed or removed. It updates its own
//! registry entry only after the lines it read were accepted by the output
//! channel, which makes a persisted offset always safe to resume from.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};
use tokio::select;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::crawler::config::ProspectorConfig;
use crate::crawler::error::{Error, Result};
use crate::crawler::event::Event;
use crate::crawler::input::{FileId, Fingerprint, Line, LineReader};
use crate::crawler::registry::{SharedRegistry, lock};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Why a harvester stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Nothing new for `close_inactive`
    Inactive,
    /// Last modification older than `ignore_older`
    Aged,
    /// The stream reached its end
    EndOfStream,
    Cancelled,
    /// The output channel receiver is gone
    OutputClosed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvesterExit {
    /// `None` for streams
    pub file_id: Option<FileId>,
    /// Offset right after the last line handed to the output
    pub offset: u64,
    /// Bytes consumed from the source, an unterminated tail included
    pub read_to: u64,
    pub reason: CloseReason,
}

enum Source {
    File {
        path: PathBuf,
        file_id: FileId,
        offset: u64,
        registry: SharedRegistry,
    },
    Stream {
        name: String,
        reader: Box<dyn AsyncRead + Unpin + Send>,
    },
}

pub struct Harvester {
    source: Source,
    config: Arc<ProspectorConfig>,
    output: BoundedSender<Event>,
}

impl Harvester {
    /// Harvester for the file identified by `file_id`, currently at `path`.
    pub fn file(
        path: PathBuf,
        file_id: FileId,
        offset: u64,
        config: Arc<ProspectorConfig>,
        registry: SharedRegistry,
        output: BoundedSender<Event>,
    ) -> Self {
        Self {
            source: Source::File {
                path,
                file_id,
                offset,
                registry,
            },
            config,
            output,
        }
    }

    /// Harvester for a stream that has no identity and no persisted offset.
    pub fn stream(
        name: impl Into<String>,
        reader: Box<dyn AsyncRead + Unpin + Send>,
        config: Arc<ProspectorConfig>,
        output: BoundedSender<Event>,
    ) -> Self {
        Self {
            source: Source::Stream {
                name: name.into(),
                reader,
            },
            config,
            output,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> HarvesterExit {
        match self.source {
            Source::File {
                path,
                file_id,
                offset,
                registry,
            } => {
                let mut harvester = FileHarvester {
                    path,
                    file_id,
                    config: self.config,
                    output: self.output,
                    registry,
                    fingerprint: Fingerprint::default(),
                };
                harvester.run(offset, cancel).await
            }
            Source::Stream { name, reader } => {
                harvest_stream(name, reader, &self.config, &self.output, cancel).await
            }
        }
    }
}

struct OpenFile {
    file: File,
    /// Second handle for metadata queries while the first one is read from
    handle: std::fs::File,
    offset: u64,
}

struct FileHarvester {
    path: PathBuf,
    file_id: FileId,
    config: Arc<ProspectorConfig>,
    output: BoundedSender<Event>,
    registry: SharedRegistry,
    fingerprint: Fingerprint,
}

impl FileHarvester {
    async fn run(&mut self, offset: u64, cancel: CancellationToken) -> HarvesterExit {
        let OpenFile {
            mut file,
            handle,
            offset,
        } = match self.open(offset).await {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to open file: {}", e);
                return HarvesterExit {
                    file_id: Some(self.file_id),
                    offset,
                    read_to: offset,
                    reason: CloseReason::Error,
                };
            }
        };

        info!(
            file_id = %self.file_id,
            offset,
            "Harvester started for file: {}",
            self.path.display()
        );
        self.update_registry(&self.path, offset, false);

        let source = self.path.to_string_lossy().into_owned();
        let mut reader = LineReader::new(offset, self.config.max_bytes);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        // Position of the file cursor, partial line included
        let mut pos = offset;
        // End of the last line accepted by the output
        let mut committed = offset;
        let mut backoff = self.config.backoff;
        let mut last_activity = Instant::now();

        let reason = 'read: loop {
            let n = select! {
                biased;
                _ = cancel.cancelled() => break 'read CloseReason::Cancelled,
                r = file.read(&mut buf) => r,
            };

            match n {
                Err(e) => {
                    warn!(path = %self.path.display(), "Error reading file: {}", e);
                    break 'read CloseReason::Error;
                }
                Ok(0) => {
                    let metadata = match handle.metadata() {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(path = %self.path.display(), "Failed to stat file: {}", e);
                            break 'read CloseReason::Error;
                        }
                    };

                    if metadata.len() < pos {
                        info!(
                            path = %self.path.display(),
                            offset = pos,
                            size = metadata.len(),
                            "File was truncated, reading from the beginning"
                        );
                        if let Err(e) = file.seek(SeekFrom::Start(0)).await {
                            warn!(path = %self.path.display(), "Failed to seek file: {}", e);
                            break 'read CloseReason::Error;
                        }
                        reader.reset(0);
                        self.fingerprint.clear();
                        pos = 0;
                        committed = 0;
                        self.update_registry(&self.path, 0, false);
                        backoff = self.config.backoff;
                        last_activity = Instant::now();
                        continue;
                    }

                    if last_activity.elapsed() >= self.config.close_inactive {
                        break 'read CloseReason::Inactive;
                    }

                    if let Some(ignore_older) = self.config.ignore_older {
                        if modified_age(&metadata) > ignore_older {
                            break 'read CloseReason::Aged;
                        }
                    }

                    select! {
                        biased;
                        _ = cancel.cancelled() => break 'read CloseReason::Cancelled,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = next_backoff(backoff, &self.config);
                }
                Ok(n) => {
                    self.fingerprint
                        .extend_from(pos, &buf[..n], self.config.fingerprint_size);
                    pos += n as u64;
                    reader.push(&buf[..n]);
                    backoff = self.config.backoff;
                    last_activity = Instant::now();

                    let before = committed;
                    while let Some(line) = reader.next_line() {
                        let end = line.end_offset();
                        let event =
                            Event::new(line.text, source.clone(), line.offset, Some(self.file_id));
                        if let Err(reason) = send(&self.output, event, &cancel).await {
                            break 'read reason;
                        }
                        committed = end;
                    }
                    if committed != before {
                        self.update_registry(&self.path, committed, false);
                    }
                }
            }
        };

        if reason == CloseReason::Cancelled && self.config.flush_partial_lines {
            if let Some(line) = reader.flush_partial() {
                let end = line.end_offset();
                if flush_partial(&self.output, line, &source, Some(self.file_id)).await {
                    debug!(path = %self.path.display(), "Flushed partial line on shutdown");
                    committed = end;
                }
            }
        }

        let current_path = current_path(&handle).unwrap_or_else(|| self.path.clone());
        if current_path != self.path {
            debug!(
                path = %self.path.display(),
                current = %current_path.display(),
                "File was renamed while being harvested"
            );
        }

        let offset = committed;
        if reason != CloseReason::Error {
            self.update_registry(&current_path, offset, true);
        } else {
            self.mark_finished();
        }

        info!(
            file_id = %self.file_id,
            reason = ?reason,
            offset,
            "Closing file: {}",
            self.path.display()
        );

        HarvesterExit {
            file_id: Some(self.file_id),
            offset,
            read_to: pos,
            reason,
        }
    }

    async fn open(&mut self, offset: u64) -> Result<OpenFile> {
        let std_file = std::fs::File::open(&self.path)?;
        let actual = FileId::from_file(&std_file)?;
        if actual != self.file_id {
            // The path now points at different content; the next scan picks it up
            debug!(
                path = %self.path.display(),
                expected = %self.file_id,
                actual = %actual,
                "File identity changed before open"
            );
            return Err(Error::FileNotFound(self.path.clone()));
        }

        let size = std_file.metadata()?.len();
        let offset = if offset > size {
            info!(
                path = %self.path.display(),
                offset,
                size,
                "File is shorter than the stored offset, starting from the beginning"
            );
            0
        } else {
            offset
        };

        self.fingerprint = Fingerprint::read(&std_file, self.config.fingerprint_size)?;

        let handle = std_file.try_clone()?;
        let mut file = File::from_std(std_file);
        file.seek(SeekFrom::Start(offset)).await?;

        Ok(OpenFile {
            file,
            handle,
            offset,
        })
    }

    fn update_registry(&self, path: &Path, offset: u64, finished: bool) {
        let mut registry = lock(&self.registry);
        registry.update(self.file_id, path, offset, finished);
        registry.set_fingerprint(&self.file_id, &self.fingerprint);
    }

    /// Keep the stored offset but release the entry.
    fn mark_finished(&self) {
        let mut registry = lock(&self.registry);
        if let Some(state) = registry.state(&self.file_id) {
            let (path, offset) = (state.path.clone(), state.offset);
            registry.update(self.file_id, &path, offset, true);
        }
    }
}

async fn harvest_stream(
    name: String,
    mut stream: Box<dyn AsyncRead + Unpin + Send>,
    config: &ProspectorConfig,
    output: &BoundedSender<Event>,
    cancel: CancellationToken,
) -> HarvesterExit {
    info!("Harvester started for file: {}", name);

    let mut reader = LineReader::new(0, config.max_bytes);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut committed = 0;
    let mut read_to = 0u64;

    let reason = 'read: loop {
        let n = select! {
            biased;
            _ = cancel.cancelled() => break 'read CloseReason::Cancelled,
            r = stream.read(&mut buf) => r,
        };

        match n {
            Err(e) => {
                warn!(source = %name, "Error reading stream: {}", e);
                break 'read CloseReason::Error;
            }
            Ok(0) => break 'read CloseReason::EndOfStream,
            Ok(n) => {
                read_to += n as u64;
                reader.push(&buf[..n]);
                while let Some(line) = reader.next_line() {
                    let end = line.end_offset();
                    let event = Event::new(line.text, name.clone(), line.offset, None);
                    if let Err(reason) = send(output, event, &cancel).await {
                        break 'read reason;
                    }
                    committed = end;
                }
            }
        }
    };

    if config.flush_partial_lines
        && matches!(reason, CloseReason::EndOfStream | CloseReason::Cancelled)
    {
        if let Some(line) = reader.flush_partial() {
            let end = line.end_offset();
            if flush_partial(output, line, &name, None).await {
                committed = end;
            }
        }
    }

    info!(reason = ?reason, "Closing file: {}", name);

    HarvesterExit {
        file_id: None,
        offset: committed,
        read_to: read_to.max(committed),
        reason,
    }
}

/// Send under backpressure, giving up only on cancellation or a closed channel.
async fn send(
    output: &BoundedSender<Event>,
    event: Event,
    cancel: &CancellationToken,
) -> std::result::Result<(), CloseReason> {
    select! {
        biased;
        _ = cancel.cancelled() => Err(CloseReason::Cancelled),
        r = output.send(event) => r.map_err(|_| CloseReason::OutputClosed),
    }
}

/// Last-chance send of an unterminated line. Bounded in time since the
/// consumer may already be shutting down.
async fn flush_partial(
    output: &BoundedSender<Event>,
    line: Line,
    source: &str,
    file_id: Option<FileId>,
) -> bool {
    let event = Event::new(line.text, source.to_string(), line.offset, file_id);
    matches!(
        tokio::time::timeout(Duration::from_secs(1), output.send(event)).await,
        Ok(Ok(()))
    )
}

fn next_backoff(current: Duration, config: &ProspectorConfig) -> Duration {
    current
        .saturating_mul(config.backoff_factor)
        .min(config.max_backoff)
}

fn modified_age(metadata: &std::fs::Metadata) -> Duration {
    metadata
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .unwrap_or_default()
}

#[cfg(any(target_os = "linux", target_os = "macos", windows))]
fn current_path(handle: &std::fs::File) -> Option<PathBuf> {
    crate::crawler::input::get_path_from_file(handle).ok()
}

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
fn current_path(_handle: &std::fs::File) -> Option<PathBuf> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{BoundedReceiver, bounded};
    use crate::crawler::registry::Registry;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;
    use tracing_test::traced_test;

    fn fast_config() -> ProspectorConfig {
        ProspectorConfig {
            backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(20),
            ..ProspectorConfig::files(["unused"])
        }
    }

    fn append(path: &Path, data: &str) {
        let mut f = OpenOptions::new().append(true).create(true).open(path).unwrap();
        f.write_all(data.as_bytes()).unwrap();
    }

    async fn recv(rx: &mut BoundedReceiver<Event>) -> Event {
        rx.next_timeout(Duration::from_secs(5))
            .await
            .expect("timed out waiting for event")
    }

    fn spawn_file_harvester(
        path: &Path,
        offset: u64,
        config: ProspectorConfig,
    ) -> (
        SharedRegistry,
        BoundedReceiver<Event>,
        CancellationToken,
        tokio::task::JoinHandle<HarvesterExit>,
    ) {
        let registry = Registry::in_memory().into_shared();
        let (tx, rx) = bounded(100);
        let harvester = Harvester::file(
            path.to_path_buf(),
            FileId::from_path(path).unwrap(),
            offset,
            Arc::new(config),
            registry.clone(),
            tx,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(harvester.run(cancel.clone()));
        (registry, rx, cancel, handle)
    }

    #[tokio::test]
    async fn test_reads_existing_and_appended_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first\nsecond\n").unwrap();
        let file_id = FileId::from_path(&path).unwrap();

        let (registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 0, fast_config());

        let e1 = recv(&mut rx).await;
        assert_eq!(e1.text, "first");
        assert_eq!(e1.offset, 0);
        assert_eq!(e1.file_id, Some(file_id));
        assert_eq!(e1.source, path.to_string_lossy());
        assert_eq!(recv(&mut rx).await.offset, 6);

        append(&path, "third\n");
        let e3 = recv(&mut rx).await;
        assert_eq!(e3.text, "third");
        assert_eq!(e3.offset, 13);

        cancel.cancel();
        let exit = handle.await.unwrap();
        assert_eq!(exit.reason, CloseReason::Cancelled);
        assert_eq!(exit.offset, 19);

        let registry = lock(&registry);
        let state = registry.state(&file_id).unwrap();
        assert_eq!(state.offset, 19);
        assert!(state.finished);
    }

    #[tokio::test]
    async fn test_starts_at_given_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\nnew\n").unwrap();

        let (_registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 4, fast_config());

        let event = recv(&mut rx).await;
        assert_eq!(event.text, "new");
        assert_eq!(event.offset, 4);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_offset_past_end_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "short\n").unwrap();

        let (_registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 500, fast_config());

        let event = recv(&mut rx).await;
        assert_eq!(event.text, "short");
        assert_eq!(event.offset, 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_terminator() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();
        let file_id = FileId::from_path(&path).unwrap();

        let (registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 0, fast_config());

        append(&path, "hal");
        assert!(rx.next_timeout(Duration::from_millis(100)).await.is_none());
        assert_eq!(lock(&registry).get(&file_id), 0);

        append(&path, "f done\n");
        let event = recv(&mut rx).await;
        assert_eq!(event.text, "half done");
        assert_eq!(event.offset, 0);

        cancel.cancel();
        let exit = handle.await.unwrap();
        assert_eq!(exit.offset, 10);
    }

    #[tokio::test]
    async fn test_flush_partial_line_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "complete\ntail").unwrap();

        let config = ProspectorConfig {
            flush_partial_lines: true,
            ..fast_config()
        };
        let (_registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 0, config);

        assert_eq!(recv(&mut rx).await.text, "complete");
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let exit = handle.await.unwrap();

        let event = recv(&mut rx).await;
        assert_eq!(event.text, "tail");
        assert_eq!(event.offset, 9);
        assert_eq!(exit.reason, CloseReason::Cancelled);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_beginning() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "a fairly long first line\nanother line\n").unwrap();
        let file_id = FileId::from_path(&path).unwrap();

        let (registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 0, fast_config());
        recv(&mut rx).await;
        recv(&mut rx).await;

        // Truncate in place, keeping the identity
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(0).unwrap();
        drop(f);
        append(&path, "fresh\n");

        let event = recv(&mut rx).await;
        assert_eq!(event.text, "fresh");
        assert_eq!(event.offset, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(lock(&registry).get(&file_id), 6);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[traced_test]
    #[tokio::test]
    async fn test_closes_when_inactive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idle.log");
        std::fs::write(&path, "only line\n").unwrap();
        let file_id = FileId::from_path(&path).unwrap();

        let config = ProspectorConfig {
            close_inactive: Duration::from_millis(100),
            ..fast_config()
        };
        let (registry, mut rx, _cancel, handle) = spawn_file_harvester(&path, 0, config);

        assert_eq!(recv(&mut rx).await.text, "only line");
        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit.reason, CloseReason::Inactive);
        assert!(lock(&registry).state(&file_id).unwrap().finished);
        assert!(logs_contain("Harvester started for file:"));
        assert!(logs_contain(&format!("Closing file: {}", path.display())));
    }

    #[tokio::test]
    async fn test_closes_when_older_than_ignore_older() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aged.log");
        std::fs::write(&path, "line\n").unwrap();

        let config = ProspectorConfig {
            ignore_older: Some(Duration::from_millis(100)),
            ..fast_config()
        };
        let (_registry, mut rx, _cancel, handle) = spawn_file_harvester(&path, 0, config);

        recv(&mut rx).await;
        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.reason, CloseReason::Aged);
    }

    #[tokio::test]
    async fn test_inactive_close_reports_unterminated_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line\npart").unwrap();

        let config = ProspectorConfig {
            close_inactive: Duration::from_millis(100),
            ..fast_config()
        };
        let (_registry, mut rx, _cancel, handle) = spawn_file_harvester(&path, 0, config);

        assert_eq!(recv(&mut rx).await.text, "line");
        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.reason, CloseReason::Inactive);
        assert_eq!(exit.offset, 5);
        assert_eq!(exit.read_to, 9);
    }

    #[tokio::test]
    async fn test_fingerprint_grows_with_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "abc").unwrap();
        let file_id = FileId::from_path(&path).unwrap();

        let config = ProspectorConfig {
            fingerprint_size: 8,
            ..fast_config()
        };
        let (registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 0, config);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            lock(&registry).state(&file_id).unwrap().fingerprint.bytes(),
            b"abc"
        );

        append(&path, "defghij\n");
        assert_eq!(recv(&mut rx).await.text, "abcdefghij");
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(
            lock(&registry).state(&file_id).unwrap().fingerprint.bytes(),
            b"abcdefgh"
        );
    }

    #[tokio::test]
    async fn test_fingerprint_taken_from_start_when_resuming() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old\nnew\n").unwrap();
        let file_id = FileId::from_path(&path).unwrap();

        let (registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 4, fast_config());
        assert_eq!(recv(&mut rx).await.text, "new");
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(
            lock(&registry).state(&file_id).unwrap().fingerprint.bytes(),
            b"old\nnew\n"
        );
    }

    #[tokio::test]
    async fn test_keeps_reading_after_rename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "before\n").unwrap();

        let (_registry, mut rx, cancel, handle) = spawn_file_harvester(&path, 0, fast_config());
        assert_eq!(recv(&mut rx).await.text, "before");

        let rotated = dir.path().join("app.log.1");
        std::fs::rename(&path, &rotated).unwrap();
        append(&rotated, "after\n");

        let event = recv(&mut rx).await;
        assert_eq!(event.text, "after");
        // Events keep the path the harvester was started with
        assert_eq!(event.source, path.to_string_lossy());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_identity_mismatch_fails_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line\n").unwrap();

        let registry = Registry::in_memory().into_shared();
        let (tx, _rx) = bounded(10);
        let harvester = Harvester::file(
            path.clone(),
            FileId::new(0, 0),
            0,
            Arc::new(fast_config()),
            registry.clone(),
            tx,
        );

        let exit = harvester.run(CancellationToken::new()).await;
        assert_eq!(exit.reason, CloseReason::Error);
        assert!(lock(&registry).is_empty());
    }

    #[tokio::test]
    async fn test_output_closed_stops_harvester() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "line\n").unwrap();

        let (_registry, rx, _cancel, handle) = spawn_file_harvester(&path, 0, fast_config());
        drop(rx);

        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.reason, CloseReason::OutputClosed);
        assert_eq!(exit.offset, 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_stream_harvester_until_end_of_stream() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = bounded(100);
        let harvester = Harvester::stream(
            "-",
            Box::new(reader),
            Arc::new(ProspectorConfig::stdin()),
            tx,
        );
        let handle = tokio::spawn(harvester.run(CancellationToken::new()));

        for i in 0..5 {
            writer
                .write_all(format!("Hello World {}\n", i).as_bytes())
                .await
                .unwrap();
        }

        for i in 0..5 {
            let event = recv(&mut rx).await;
            assert_eq!(event.text, format!("Hello World {}", i));
            assert_eq!(event.source, "-");
            assert!(event.file_id.is_none());
        }

        writer.write_all(b"no newline").await.unwrap();
        drop(writer);

        let exit = handle.await.unwrap();
        assert_eq!(exit.reason, CloseReason::EndOfStream);
        // Partial trailing lines are dropped unless configured otherwise
        assert!(rx.try_recv().is_none());
        assert!(logs_contain("Harvester started for file: -"));
    }

    #[tokio::test]
    async fn test_stream_flushes_partial_line_at_end() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = bounded(10);
        let config = ProspectorConfig {
            flush_partial_lines: true,
            ..ProspectorConfig::stdin()
        };
        let harvester = Harvester::stream("-", Box::new(reader), Arc::new(config), tx);
        let handle = tokio::spawn(harvester.run(CancellationToken::new()));

        writer.write_all(b"one\ntwo").await.unwrap();
        drop(writer);

        assert_eq!(recv(&mut rx).await.text, "one");
        let last = recv(&mut rx).await;
        assert_eq!(last.text, "two");
        assert_eq!(last.offset, 4);
        assert_eq!(handle.await.unwrap().offset, 7);
    }

    #[test]
    fn test_next_backoff_is_capped() {
        let config = ProspectorConfig::default();
        let b = next_backoff(Duration::from_secs(1), &config);
        assert_eq!(b, Duration::from_secs(2));
        let b = next_backoff(Duration::from_secs(8), &config);
        assert_eq!(b, Duration::from_secs(10));
    }
}
