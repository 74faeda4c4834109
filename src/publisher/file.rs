// SPDX-License-Identifier: Apache-2.0

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use super::{Publisher, Result, write_json_lines};
use crate::crawler::Event;

/// Appends events as JSON lines to a single file.
pub struct FilePublisher {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FilePublisher {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "Publishing events to file");

        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Publisher for FilePublisher {
    fn publish(&mut self, events: &[Event]) -> Result<()> {
        write_json_lines(&mut self.writer, events)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_appends_across_batches_and_reopens() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("events.json");

        let mut publisher = FilePublisher::open(&path).unwrap();
        publisher
            .publish(&[Event::new("a".into(), "/x".into(), 0, None)])
            .unwrap();
        publisher
            .publish(&[Event::new("b".into(), "/x".into(), 2, None)])
            .unwrap();
        drop(publisher);

        let mut publisher = FilePublisher::open(&path).unwrap();
        publisher
            .publish(&[Event::new("c".into(), "/x".into(), 4, None)])
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let messages: Vec<String> = content
            .lines()
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l).unwrap();
                v["message"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
    }
}
