// SPDX-License-Identifier: Apache-2.0

//! Prospector configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::crawler::error::{Error, Result};

/// Where a prospector reads from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    /// Files matching the configured glob patterns
    #[default]
    Files,
    /// The process's standard input
    Stdin,
}

/// Configuration for a single prospector. Immutable once the crawler starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProspectorConfig {
    /// Glob patterns for files to harvest
    pub paths: Vec<String>,

    /// Regular expressions matched against the full path of every candidate
    pub exclude_files: Vec<String>,

    /// Files whose last modification is older than this are never opened
    #[serde(with = "duration_opt")]
    pub ignore_older: Option<Duration>,

    /// Idle time after which a harvester releases its file
    #[serde(with = "duration")]
    pub close_inactive: Duration,

    /// How often the prospector rescans its patterns
    #[serde(with = "duration")]
    pub scan_frequency: Duration,

    pub input_type: InputType,

    /// Start unknown files at their end instead of their beginning
    pub tail_files: bool,

    /// Maximum bytes kept per line; longer lines are truncated
    pub max_bytes: usize,

    /// First wait after reaching end of file
    #[serde(with = "duration")]
    pub backoff: Duration,

    /// Upper bound for the end-of-file wait
    #[serde(with = "duration")]
    pub max_backoff: Duration,

    /// Growth factor applied to the wait after each empty read
    pub backoff_factor: u32,

    /// Emit an unterminated trailing line when the input ends
    pub flush_partial_lines: bool,

    /// Leading bytes remembered per file to detect a reused identity
    pub fingerprint_size: usize,
}

impl Default for ProspectorConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude_files: Vec::new(),
            ignore_older: None,
            close_inactive: Duration::from_secs(60 * 60),
            scan_frequency: Duration::from_secs(10),
            input_type: InputType::Files,
            tail_files: false,
            max_bytes: 10 * 1024 * 1024,
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_factor: 2,
            flush_partial_lines: false,
            fingerprint_size: 1024,
        }
    }
}

impl ProspectorConfig {
    /// Stdin prospector with default settings.
    pub fn stdin() -> Self {
        Self {
            input_type: InputType::Stdin,
            ..Default::default()
        }
    }

    /// Files prospector over the given patterns with default settings.
    pub fn files<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_type == InputType::Files && self.paths.is_empty() {
            return Err(Error::Config(
                "No paths were defined for prospector".to_string(),
            ));
        }

        if self.scan_frequency.is_zero() {
            return Err(Error::Config("scan_frequency must be positive".to_string()));
        }

        if self.max_bytes == 0 {
            return Err(Error::Config("max_bytes must be positive".to_string()));
        }

        if self.fingerprint_size == 0 {
            return Err(Error::Config("fingerprint_size must be positive".to_string()));
        }

        if self.backoff.is_zero() || self.max_backoff < self.backoff {
            return Err(Error::Config(
                "backoff must be positive and not larger than max_backoff".to_string(),
            ));
        }

        if self.backoff_factor == 0 {
            return Err(Error::Config("backoff_factor must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// humantime strings such as `250ms` or `1h`
pub(crate) mod duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod duration_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&humantime::format_duration(*d).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let s = Option::<String>::deserialize(d)?;
        s.filter(|s| !s.is_empty())
            .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
