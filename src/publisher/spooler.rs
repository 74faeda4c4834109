// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::time::Duration;

use tokio::select;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Publisher;
use crate::bounded_channel::BoundedReceiver;
use crate::crawler::Event;

#[derive(Debug, Clone)]
pub struct SpoolerConfig {
    /// Flush as soon as this many events are buffered
    pub spool_size: usize,
    /// Flush whatever is buffered after this long
    pub idle_timeout: Duration,
    /// Pause between attempts to publish a failed batch
    pub retry_interval: Duration,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            spool_size: 2048,
            idle_timeout: Duration::from_secs(5),
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// Batches events from the output channel for a publisher.
///
/// Exits once every sender is dropped and the remaining events are published,
/// or early when cancelled.
pub struct Spooler {
    rx: BoundedReceiver<Event>,
    publisher: Box<dyn Publisher>,
    config: SpoolerConfig,
    buffer: Vec<Event>,
}

impl Spooler {
    pub fn new(
        rx: BoundedReceiver<Event>,
        publisher: Box<dyn Publisher>,
        config: SpoolerConfig,
    ) -> Self {
        let buffer = Vec::with_capacity(config.spool_size);
        Self {
            rx,
            publisher,
            config,
            buffer,
        }
    }

    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        info!(
            spool_size = self.config.spool_size,
            idle_timeout = ?self.config.idle_timeout,
            "Spooler started"
        );

        let mut deadline = Instant::now() + self.config.idle_timeout;
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Spooler cancelled");
                    break;
                }

                event = self.rx.next() => match event {
                    Some(event) => {
                        self.buffer.push(event);
                        if self.buffer.len() >= self.config.spool_size {
                            self.flush(&cancel).await;
                            deadline = Instant::now() + self.config.idle_timeout;
                        }
                    }
                    None => {
                        debug!("Output channel closed, flushing remaining events");
                        break;
                    }
                },

                _ = sleep_until(deadline) => {
                    self.flush(&cancel).await;
                    deadline = Instant::now() + self.config.idle_timeout;
                }
            }
        }

        self.flush(&cancel).await;
        info!("Spooler stopped");
        Ok(())
    }

    async fn flush(&mut self, cancel: &CancellationToken) {
        if !self.buffer.is_empty() {
            info!("Processing {} events", self.buffer.len());

            loop {
                match self.publisher.publish(&self.buffer) {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("Failed to publish {} events, retrying: {}", self.buffer.len(), e);
                        select! {
                            _ = cancel.cancelled() => {
                                warn!(
                                    "Dropping {} unpublished events on shutdown",
                                    self.buffer.len()
                                );
                                break;
                            }
                            _ = sleep(self.config.retry_interval) => {}
                        }
                    }
                }
            }
            self.buffer.clear();
        }

        info!("Events flushed");
    }
}
