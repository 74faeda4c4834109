// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crawler::ProspectorConfig;
use crate::crawler::config::duration;
use crate::init::args::AgentRun;

pub const ENV_PREFIX: &str = "LOGSHIP_";

/// Where published events go
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Output {
    #[default]
    Console,
    /// Append JSON lines to this file
    File(PathBuf),
}

impl FromStr for Output {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err("output must be `console` or a file path".to_string()),
            "console" | "stdout" => Ok(Output::Console),
            path => Ok(Output::File(PathBuf::from(path))),
        }
    }
}

impl TryFrom<String> for Output {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Output> for String {
    fn from(o: Output) -> Self {
        o.to_string()
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Console => write!(f, "console"),
            Output::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Everything one agent run needs, after merging all configuration sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub prospectors: Vec<ProspectorConfig>,

    pub registry_file: PathBuf,

    #[serde(with = "duration")]
    pub registry_flush_interval: Duration,

    /// Events per published batch
    pub spool_size: usize,

    /// Longest time an event waits in a partial batch
    #[serde(with = "duration")]
    pub idle_timeout: Duration,

    /// Capacity of the channel between harvesters and the spooler
    pub queue_size: usize,

    pub output: Output,

    /// Upper bound for each shutdown stage
    #[serde(with = "duration")]
    pub shutdown_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prospectors: Vec::new(),
            registry_file: PathBuf::from(".logship/registry.json"),
            registry_flush_interval: Duration::from_secs(1),
            spool_size: 2048,
            idle_timeout: Duration::from_secs(5),
            queue_size: 1024,
            output: Output::Console,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl AgentConfig {
    /// Checks agent-level settings. Prospectors are checked when they are
    /// built.
    pub fn validate(&self) -> Result<(), String> {
        if self.spool_size == 0 {
            return Err("spool_size must be positive".to_string());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be positive".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be positive".to_string());
        }
        if self.registry_flush_interval.is_zero() {
            return Err("registry_flush_interval must be positive".to_string());
        }
        if self.registry_file.as_os_str().is_empty() {
            return Err("registry_file must not be empty".to_string());
        }
        Ok(())
    }
}

/// Merge, lowest priority first: defaults, the JSON config file, `LOGSHIP_`
/// environment variables, command line flags.
pub fn load_config(args: &AgentRun) -> Result<AgentConfig, Box<dyn Error + Send + Sync>> {
    let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));

    if let Some(path) = &args.config {
        if !path.exists() {
            return Err(format!("config file not found: {}", path.display()).into());
        }
        debug!(path = %path.display(), "Loading config file");
        figment = figment.merge(Json::file(path));
    }

    figment = figment.merge(
        Env::prefixed(ENV_PREFIX)
            .split("__")
            .ignore(&["config", "log_format"]),
    );

    let mut config: AgentConfig = figment
        .extract()
        .map_err(|e| format!("failed to parse config: {}", e))?;

    args.apply(&mut config);
    Ok(config)
}
