// SPDX-License-Identifier: Apache-2.0

//! Delivery of harvested events.
//!
//! The [`Spooler`] drains the output channel into batches and hands each batch
//! to a [`Publisher`]. Publishers write one JSON object per line.

pub mod file;
pub mod spooler;

use std::io::{self, Write};

use thiserror::Error;

use crate::crawler::Event;

pub use file::FilePublisher;
pub use spooler::{Spooler, SpoolerConfig};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PublishError>;

/// Destination of event batches. A batch is either fully accepted or the call
/// fails and the spooler retries it whole.
pub trait Publisher: Send {
    fn publish(&mut self, events: &[Event]) -> Result<()>;
}

/// Writes events to stdout.
#[derive(Default)]
pub struct ConsolePublisher;

impl ConsolePublisher {
    pub fn new() -> Self {
        Self
    }
}

impl Publisher for ConsolePublisher {
    fn publish(&mut self, events: &[Event]) -> Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        write_json_lines(&mut out, events)?;
        out.flush()?;
        Ok(())
    }
}

pub(crate) fn write_json_lines<W: Write>(w: &mut W, events: &[Event]) -> Result<()> {
    for event in events {
        serde_json::to_writer(&mut *w, event)?;
        w.write_all(b"\n")?;
    }
    Ok(())
}
