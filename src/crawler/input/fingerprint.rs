// SPDX-License-Identifier: Apache-2.0

//! First bytes of a file, used to tell a file apart from a later one that
//! was given the same identity after the first was deleted.

use std::io::{self, Read};

/// Leading bytes of a file, at most the configured fingerprint size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    first_bytes: Vec<u8>,
}

impl Fingerprint {
    /// Read up to `size` bytes from the current position of `reader`, which
    /// must be the start of the file.
    pub fn read<R: Read>(reader: R, size: usize) -> io::Result<Self> {
        let mut first_bytes = Vec::with_capacity(size);
        reader.take(size as u64).read_to_end(&mut first_bytes)?;
        Ok(Self { first_bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { first_bytes: bytes }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.first_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.first_bytes.is_empty()
    }

    /// True when the file this fingerprint was taken from may be the one
    /// `stored` was taken from: `stored` is a prefix of it. An empty stored
    /// fingerprint carries no information and always matches.
    pub fn continues(&self, stored: &Fingerprint) -> bool {
        stored.is_empty() || self.first_bytes.starts_with(&stored.first_bytes)
    }

    /// Grow the fingerprint with `data`, read at file position `at`, until it
    /// holds `size` bytes. Data that does not start at or before the end of
    /// the fingerprint is ignored.
    pub fn extend_from(&mut self, at: u64, data: &[u8], size: usize) {
        let len = self.first_bytes.len();
        if len >= size || at > len as u64 {
            return;
        }

        let skip = len - at as usize;
        if skip >= data.len() {
            return;
        }
        let take = (size - len).min(data.len() - skip);
        self.first_bytes.extend_from_slice(&data[skip..skip + take]);
    }

    pub fn clear(&mut self) {
        self.first_bytes.clear();
    }
}
