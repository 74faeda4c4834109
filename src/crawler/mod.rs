// SPDX-License-Identifier: Apache-2.0

//! Discovery and harvesting of log files.
//!
//! A [`Crawler`] owns one [`Prospector`] per configured input. Each prospector
//! periodically scans its patterns and runs a [`Harvester`] task per file
//! worth reading. Harvesters push [`Event`]s into a bounded output channel
//! and record their progress in the shared [`Registry`].

pub mod claims;
pub mod config;
pub mod error;
pub mod event;
pub mod harvester;
pub mod input;
pub mod prospector;
pub mod registry;

use std::error::Error as StdError;

use tokio::io::AsyncRead;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bounded_channel::BoundedSender;

pub use claims::HarvesterClaims;
pub use config::{InputType, ProspectorConfig};
pub use error::{Error, Result};
pub use event::Event;
pub use harvester::{CloseReason, Harvester, HarvesterExit};
pub use prospector::Prospector;
pub use registry::{Registrar, RegistrarConfig, Registry, SharedRegistry};

pub const NO_PROSPECTORS: &str =
    "No prospectors defined. You must have at least one prospector defined in the config file.";

pub struct Crawler {
    prospectors: Vec<Prospector>,
}

impl Crawler {
    /// Build every prospector up front so that a bad configuration fails
    /// before anything is read.
    pub fn new(
        configs: Vec<ProspectorConfig>,
        registry: SharedRegistry,
        output: BoundedSender<Event>,
    ) -> Result<Self> {
        if configs.is_empty() {
            return Err(Error::Config(NO_PROSPECTORS.to_string()));
        }

        let claims = HarvesterClaims::new();
        let prospectors = configs
            .into_iter()
            .map(|config| {
                Prospector::new(config, registry.clone(), output.clone())
                    .map(|p| p.with_claims(claims.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { prospectors })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.prospectors.len()
    }

    /// Feed the first stdin prospector from `reader` instead of stdin.
    pub fn with_stdin_reader(mut self, reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        if let Some(idx) = self
            .prospectors
            .iter()
            .position(|p| p.config().input_type == InputType::Stdin)
        {
            let prospector = self.prospectors.remove(idx);
            self.prospectors
                .insert(idx, prospector.with_stdin_reader(reader));
        }
        self
    }

    /// Spawn every prospector on `task_set`. The prospectors drop their
    /// output senders when they exit.
    pub fn start(
        self,
        task_set: &mut JoinSet<std::result::Result<(), Box<dyn StdError + Send + Sync>>>,
        cancel: &CancellationToken,
    ) {
        info!(prospectors = self.prospectors.len(), "Loading prospectors");

        for prospector in self.prospectors {
            let cancel = cancel.clone();
            task_set.spawn(async move { prospector.run(cancel).await.map_err(Into::into) });
        }
    }
}
