// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::crawler::ProspectorConfig;
use crate::init::config::{AgentConfig, Output};

#[derive(Debug, Args, Clone, Default)]
pub struct AgentRun {
    /// JSON configuration file
    #[arg(long, env = "LOGSHIP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Registry file holding read offsets
    #[arg(long)]
    pub registry_file: Option<PathBuf>,

    /// How often the registry is written to disk (e.g. 1s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub registry_flush_interval: Option<Duration>,

    /// Events per published batch
    #[arg(long)]
    pub spool_size: Option<usize>,

    /// Longest time an event waits in a partial batch (e.g. 5s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub idle_timeout: Option<Duration>,

    /// Capacity of the queue between harvesters and the publisher
    #[arg(long)]
    pub queue_size: Option<usize>,

    /// `console` or the path of a file receiving JSON lines
    #[arg(long)]
    pub output: Option<Output>,

    #[command(flatten)]
    pub prospector: ProspectorArgs,
}

/// Flags defining a single prospector, used when the configuration file
/// defines none.
#[derive(Debug, Args, Clone, Default)]
pub struct ProspectorArgs {
    /// Comma-separated glob patterns of files to harvest
    #[arg(long = "path", action = clap::ArgAction::Append, value_delimiter = ',')]
    pub paths: Vec<String>,

    /// Regular expressions of paths to skip, comma-separated
    #[arg(long, action = clap::ArgAction::Append, value_delimiter = ',')]
    pub exclude_files: Vec<String>,

    /// Never open files not modified for this long (e.g. 24h)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ignore_older: Option<Duration>,

    /// Release files without new content for this long
    #[arg(long, value_parser = humantime::parse_duration)]
    pub close_inactive: Option<Duration>,

    /// Interval between scans for new files
    #[arg(long, value_parser = humantime::parse_duration)]
    pub scan_frequency: Option<Duration>,

    /// Start files never seen before at their end
    #[arg(long, default_value = "false")]
    pub tail_files: bool,

    /// Read from standard input instead of files
    #[arg(long, default_value = "false", conflicts_with = "paths")]
    pub stdin: bool,
}

impl ProspectorArgs {
    /// `None` when no prospector was requested on the command line.
    pub fn build_config(&self) -> Option<ProspectorConfig> {
        let mut config = if self.stdin {
            ProspectorConfig::stdin()
        } else if !self.paths.is_empty() {
            ProspectorConfig::files(self.paths.iter().cloned())
        } else {
            return None;
        };

        config.exclude_files = self.exclude_files.clone();
        config.ignore_older = self.ignore_older;
        config.tail_files = self.tail_files;
        if let Some(d) = self.close_inactive {
            config.close_inactive = d;
        }
        if let Some(d) = self.scan_frequency {
            config.scan_frequency = d;
        }

        Some(config)
    }
}

impl AgentRun {
    /// Override `config` with every flag given on the command line.
    pub fn apply(&self, config: &mut AgentConfig) {
        if let Some(v) = &self.registry_file {
            config.registry_file = v.clone();
        }
        if let Some(v) = self.registry_flush_interval {
            config.registry_flush_interval = v;
        }
        if let Some(v) = self.spool_size {
            config.spool_size = v;
        }
        if let Some(v) = self.idle_timeout {
            config.idle_timeout = v;
        }
        if let Some(v) = self.queue_size {
            config.queue_size = v;
        }
        if let Some(v) = &self.output {
            config.output = v.clone();
        }

        if config.prospectors.is_empty() {
            if let Some(prospector) = self.prospector.build_config() {
                config.prospectors.push(prospector);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::InputType;

    #[test]
    fn test_no_flags_no_prospector() {
        assert!(ProspectorArgs::default().build_config().is_none());

        let args = ProspectorArgs {
            ignore_older: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(args.build_config().is_none());
    }

    #[test]
    fn test_flags_override_file_prospectors_only_when_empty() {
        let args = AgentRun {
            prospector: ProspectorArgs {
                paths: vec!["/tmp/*.log".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };

        let mut config = AgentConfig {
            prospectors: vec![ProspectorConfig::stdin()],
            ..Default::default()
        };
        args.apply(&mut config);
        assert_eq!(config.prospectors.len(), 1);
        assert_eq!(config.prospectors[0].input_type, InputType::Stdin);

        let mut config = AgentConfig::default();
        args.apply(&mut config);
        assert_eq!(config.prospectors[0].paths, vec!["/tmp/*.log".to_string()]);
    }
}
