// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::bounded;
use crate::crawler::{Crawler, Registrar, RegistrarConfig, Registry};
use crate::init::config::{AgentConfig, Output};
use crate::init::wait::{self, BoxError, TaskSet};
use crate::publisher::{ConsolePublisher, FilePublisher, Publisher, Spooler, SpoolerConfig};

/// Wires the crawler, spooler and registrar together for one run.
pub struct Agent {
    config: AgentConfig,
    publisher: Option<Box<dyn Publisher>>,
    stdin: Option<Box<dyn AsyncRead + Unpin + Send>>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            publisher: None,
            stdin: None,
        }
    }

    /// Publish to `publisher` instead of the configured output.
    pub fn with_publisher(mut self, publisher: Box<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Feed a stdin prospector from `reader` instead of the process's stdin.
    pub fn with_stdin_reader(mut self, reader: Box<dyn AsyncRead + Unpin + Send>) -> Self {
        self.stdin = Some(reader);
        self
    }

    /// Run until `agent_cancel` fires or a component fails.
    ///
    /// Shutdown runs in stages: prospectors and their harvesters stop first,
    /// which closes the output channel; the spooler then publishes what is
    /// left; the registrar writes the registry last.
    pub async fn run(self, agent_cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.config;

        if let Err(e) = config.validate() {
            return Err(config_error(e));
        }

        let registry = match Registry::load(&config.registry_file) {
            Ok(registry) => registry.into_shared(),
            Err(e) => return Err(config_error(e)),
        };

        let (events_tx, events_rx) = bounded(config.queue_size);

        let crawler = Crawler::new(config.prospectors.clone(), registry.clone(), events_tx);
        let mut crawler = match crawler {
            Ok(crawler) => crawler,
            Err(e) => return Err(config_error(e)),
        };
        if let Some(reader) = self.stdin {
            crawler = crawler.with_stdin_reader(reader);
        }

        let publisher = match self.publisher {
            Some(publisher) => publisher,
            None => match build_publisher(&config.output) {
                Ok(publisher) => publisher,
                Err(e) => return Err(config_error(e)),
            },
        };

        let mut prospectors_task_set = TaskSet::new();
        let mut spooler_task_set = TaskSet::new();
        let mut registrar_task_set = TaskSet::new();

        let prospectors_cancel = CancellationToken::new();
        let spooler_cancel = CancellationToken::new();
        let registrar_cancel = CancellationToken::new();

        {
            let registrar = Registrar::new(
                registry.clone(),
                RegistrarConfig {
                    flush_interval: config.registry_flush_interval,
                },
            );
            let token = registrar_cancel.clone();
            registrar_task_set
                .spawn(async move { registrar.run(token).await.map_err(BoxError::from) });
        }

        {
            let spooler = Spooler::new(
                events_rx,
                publisher,
                SpoolerConfig {
                    spool_size: config.spool_size,
                    idle_timeout: config.idle_timeout,
                    ..Default::default()
                },
            );
            spooler_task_set.spawn(spooler.run(spooler_cancel.clone()));
        }

        crawler.start(&mut prospectors_task_set, &prospectors_cancel);
        info!(
            registry = %config.registry_file.display(),
            output = %config.output,
            "Agent started"
        );

        let mut result = Ok(());
        select! {
            _ = agent_cancel.cancelled() => {
                debug!("Agent cancellation signaled.");
            },
            e = wait::wait_for_any_task(&mut prospectors_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of prospector."),
                    Err(e) => result = Err(e),
                }
            },
            e = wait::wait_for_any_task(&mut spooler_task_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of spooler."),
                    Err(e) => result = Err(e),
                }
            },
        }

        info!("shutting down");
        let stage_timeout = config.shutdown_timeout;

        // Stopping the prospectors stops their harvesters and drops every
        // sender of the output channel
        prospectors_cancel.cancel();
        if let Err(e) =
            wait::wait_for_tasks_with_timeout(&mut prospectors_task_set, stage_timeout).await
        {
            warn!("Prospectors did not stop cleanly, aborting: {}", e);
            prospectors_task_set.shutdown().await;
        }

        let res = wait::wait_for_tasks_with_timeout(&mut spooler_task_set, stage_timeout).await;
        if res.is_err() {
            warn!("Spooler did not exit on channel close, cancelling.");
            spooler_cancel.cancel();
            let res =
                wait::wait_for_tasks_with_timeout(&mut spooler_task_set, Duration::from_secs(1))
                    .await;
            if let Err(e) = res {
                warn!("Spooler did not stop: {}", e);
                spooler_task_set.shutdown().await;
            }
        }

        registrar_cancel.cancel();
        if let Err(e) =
            wait::wait_for_tasks_with_timeout(&mut registrar_task_set, stage_timeout).await
        {
            warn!("Registrar did not stop: {}", e);
        }

        info!("Agent stopped");
        result
    }
}

fn build_publisher(output: &Output) -> crate::publisher::Result<Box<dyn Publisher>> {
    Ok(match output {
        Output::Console => Box::new(ConsolePublisher::new()),
        Output::File(path) => Box::new(FilePublisher::open(path)?),
    })
}

/// Configuration problems end the run before anything is read.
fn config_error(e: impl Into<BoxError>) -> BoxError {
    let e = e.into();
    error!("{}", e);
    info!("shutting down");
    e
}
