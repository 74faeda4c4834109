// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::crawler::input::FileId;

/// Source name used for the standard input stream.
pub const STDIN_SOURCE: &str = "-";

/// One line read by a harvester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "message")]
    pub text: String,
    /// Resolved file path, or `-` for stdin
    pub source: String,
    /// Byte offset at which the line begins
    pub offset: u64,
    /// `None` for stdin
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
}

impl Event {
    pub fn new(text: String, source: String, offset: u64, file_id: Option<FileId>) -> Self {
        Self {
            timestamp: Utc::now(),
            text,
            source,
            offset,
            file_id,
        }
    }
}
