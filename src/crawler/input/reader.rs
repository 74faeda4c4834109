// SPDX-License-Identifier: Apache-2.0

use bytes::{Buf, BytesMut};

/// A complete line cut from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line content without the terminator, possibly truncated to `max_bytes`
    pub text: String,
    /// Byte position where the line begins
    pub offset: u64,
    /// Bytes consumed from the input, terminator included
    pub len: u64,
}

impl Line {
    pub fn end_offset(&self) -> u64 {
        self.offset + self.len
    }
}

/// Splits a byte stream into lines while tracking input offsets.
///
/// Bytes of an unterminated trailing line stay buffered and are not counted
/// in `offset()` until the terminator arrives, so a persisted offset always
/// points at the start of a line.
pub struct LineReader {
    buf: BytesMut,
    /// Offset of the first buffered byte
    offset: u64,
    max_bytes: usize,
    /// Bytes of the current line dropped because it exceeded `max_bytes`
    overflow: u64,
    /// Skipping to the end of an over-long line
    discarding: bool,
}

impl LineReader {
    pub fn new(offset: u64, max_bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            offset,
            max_bytes: max_bytes.max(1),
            overflow: 0,
            discarding: false,
        }
    }

    /// Offset right after the last complete line returned.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes read but not yet part of a complete line.
    pub fn pending(&self) -> u64 {
        self.buf.len() as u64 + self.overflow
    }

    pub fn push(&mut self, data: &[u8]) {
        if !self.discarding {
            self.buf.extend_from_slice(data);
            return;
        }

        match data.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                self.overflow += pos as u64;
                self.buf.extend_from_slice(&data[pos..]);
                self.discarding = false;
            }
            None => self.overflow += data.len() as u64,
        }
    }

    /// Next complete line, or `None` when only a partial line is buffered.
    pub fn next_line(&mut self) -> Option<Line> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let raw = self.buf.split_to(idx + 1);
                let len = raw.len() as u64 + self.overflow;
                let line = self.make_line(&raw[..idx], len);
                self.overflow = 0;
                Some(line)
            }
            None => {
                if self.buf.len() > self.max_bytes {
                    let extra = self.buf.len() - self.max_bytes;
                    self.overflow += extra as u64;
                    self.buf.truncate(self.max_bytes);
                    self.discarding = true;
                }
                None
            }
        }
    }

    /// Emit whatever partial line is buffered, used at end of stream.
    pub fn flush_partial(&mut self) -> Option<Line> {
        if self.buf.is_empty() && self.overflow == 0 {
            return None;
        }
        let raw = self.buf.split();
        let len = raw.len() as u64 + self.overflow;
        let line = self.make_line(&raw, len);
        self.overflow = 0;
        self.discarding = false;
        Some(line)
    }

    /// Drop buffered bytes and restart at `offset`, e.g. after truncation.
    pub fn reset(&mut self, offset: u64) {
        self.buf.advance(self.buf.len());
        self.offset = offset;
        self.overflow = 0;
        self.discarding = false;
    }

    fn make_line(&mut self, content: &[u8], len: u64) -> Line {
        let content = content.strip_suffix(b"\r").unwrap_or(content);
        let content = &content[..content.len().min(self.max_bytes)];

        let line = Line {
            text: String::from_utf8_lossy(content).into_owned(),
            offset: self.offset,
            len,
        };
        self.offset += len;
        line
    }
}
