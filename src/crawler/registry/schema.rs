// SPDX-License-Identifier: Apache-2.0

//! On-disk layout of the registry file.
//!
//! ```json
//! {
//!   "version": 1,
//!   "files": {
//!     "2049:131": {
//!       "path": "/var/log/app.log",
//!       "dev": 2049,
//!       "ino": 131,
//!       "offset": 4096,
//!       "finished": false,
//!       "last_seen": "2024-05-01T10:00:00Z",
//!       "fingerprint": "MjAyNC0wNS0wMSBzdGFydGVkCg=="
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version for the registry file
pub const PERSISTED_STATE_VERSION: u8 = 1;

/// Persisted state for all known files.
/// Key is "dev:ino" so that the file stays readable by humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStateV1 {
    pub version: u8,
    pub files: HashMap<String, PersistedFileEntryV1>,
}

impl Default for PersistedStateV1 {
    fn default() -> Self {
        Self {
            version: PERSISTED_STATE_VERSION,
            files: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFileEntryV1 {
    /// Last known path to the file
    pub path: String,

    /// Device ID (Unix) or volume serial (Windows)
    pub dev: u64,
    /// Inode number (Unix) or file index (Windows)
    pub ino: u64,

    /// Start of the first line not yet handed to the output
    pub offset: u64,
    /// No harvester holds the file open
    #[serde(default)]
    pub finished: bool,
    pub last_seen: DateTime<Utc>,
    /// Leading bytes of the file, base64 encoded. Absent in files written
    /// before fingerprints were recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "base64_bytes")]
    pub fingerprint: Vec<u8>,
}

impl PersistedFileEntryV1 {
    pub fn key(&self) -> String {
        file_id_to_key(self.dev, self.ino)
    }
}

/// Generate a map key from dev and ino ("dev:ino" format)
pub fn file_id_to_key(dev: u64, ino: u64) -> String {
    format!("{}:{}", dev, ino)
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
