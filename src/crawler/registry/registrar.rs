// SPDX-License-Identifier: Apache-2.0

//! Periodic registry persistence.
//!
//! The registrar is cancelled last during shutdown, after all harvesters have
//! stopped and the spooler has drained, so its final flush records every
//! offset that reached the output.

use std::time::{Duration, Instant};

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{SharedRegistry, flush, lock};
use crate::crawler::error::Result;

pub struct RegistrarConfig {
    /// Interval between periodic flushes
    pub flush_interval: Duration,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(1),
        }
    }
}

pub struct Registrar {
    registry: SharedRegistry,
    config: RegistrarConfig,
    /// When consecutive flush failures started
    first_failure: Option<Instant>,
}

impl Registrar {
    pub fn new(registry: SharedRegistry, config: RegistrarConfig) -> Self {
        Self {
            registry,
            config,
            first_failure: None,
        }
    }

    /// Flush on every tick until cancelled, then flush once more. Flush
    /// failures are logged and retried on the next tick.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        info!(
            path = %lock(&self.registry).path().display(),
            interval = ?self.config.flush_interval,
            "Registrar started"
        );

        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!("Registrar cancelled, performing final flush");
                    break;
                }

                _ = ticker.tick() => self.maybe_flush(),
            }
        }

        match flush(&self.registry) {
            Ok(()) => info!(
                files = lock(&self.registry).len(),
                "Final registry flush completed"
            ),
            Err(e) => warn!("Failed to perform final registry flush: {}", e),
        }

        Ok(())
    }

    fn maybe_flush(&mut self) {
        match flush(&self.registry) {
            Ok(()) => {
                if let Some(first) = self.first_failure.take() {
                    debug!(
                        "Registry flush succeeded after failing for {:?}",
                        first.elapsed()
                    );
                }
            }
            Err(e) => {
                let first = *self.first_failure.get_or_insert_with(Instant::now);
                warn!(
                    "Registry flush failed (failures started {:?} ago): {}",
                    first.elapsed(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::input::FileId;
    use crate::crawler::registry::Registry;
    use std::path::Path;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registrar_flushes_periodically_and_on_cancel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let registry = Registry::load(&path).unwrap().into_shared();

        let registrar = Registrar::new(
            registry.clone(),
            RegistrarConfig {
                flush_interval: Duration::from_millis(20),
            },
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registrar.run(cancel.clone()));

        lock(&registry).update(FileId::new(1, 1), Path::new("/a.log"), 10, false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(Registry::load(&path).unwrap().get(&FileId::new(1, 1)), 10);

        lock(&registry).update(FileId::new(1, 1), Path::new("/a.log"), 20, true);
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.get(&FileId::new(1, 1)), 20);
        assert!(reloaded.state(&FileId::new(1, 1)).unwrap().finished);
    }

    #[tokio::test]
    async fn test_flush_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        // Parent is a regular file, so every write fails
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let mut registry = Registry {
            path: blocker.join("registry.json"),
            ..Default::default()
        };
        registry.update(FileId::new(1, 1), Path::new("/a.log"), 1, false);

        let registrar = Registrar::new(
            registry.into_shared(),
            RegistrarConfig {
                flush_interval: Duration::from_millis(10),
            },
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(registrar.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
