// SPDX-License-Identifier: Apache-2.0

use glob::glob;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use super::file_id::FileId;
use super::fingerprint::Fingerprint;
use crate::crawler::error::{Error, Result};

/// A file matched during a scan, with the metadata the prospector needs to
/// decide whether it deserves a harvester.
#[derive(Debug, Clone)]
pub struct FoundFile {
    pub path: PathBuf,
    pub file_id: FileId,
    pub size: u64,
    pub modified: SystemTime,
    pub fingerprint: Fingerprint,
}

/// FileFinder expands glob patterns and drops paths matching any exclude regex.
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<Regex>,
    fingerprint_size: usize,
}

impl FileFinder {
    /// Fails on a malformed glob or exclude expression so that the problem
    /// surfaces at startup rather than on every scan.
    pub fn new(
        include: Vec<String>,
        exclude_files: &[String],
        fingerprint_size: usize,
    ) -> Result<Self> {
        for pattern in &include {
            glob::Pattern::new(pattern)
                .map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }

        let exclude = exclude_files
            .iter()
            .map(|e| Regex::new(e))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            include,
            exclude,
            fingerprint_size,
        })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.exclude.iter().any(|re| re.is_match(&path))
    }

    /// True when the path would be returned by `find_files`, existing or not.
    pub fn matches(&self, path: &Path) -> bool {
        if self.is_excluded(path) {
            return false;
        }
        self.include.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches_path(path))
                .unwrap_or(false)
        })
    }

    /// All regular files matching the include patterns, minus excluded ones.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!("Skipping unreadable glob entry: {}", e);
                        continue;
                    }
                };

                if path.is_dir() {
                    continue;
                }

                if self.is_excluded(&path) {
                    debug!(path = %path.display(), "Excluding file");
                    continue;
                }

                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }

    /// Resolve identity, size, mtime and fingerprint of every matching file.
    /// Files that disappear between the glob and the stat are skipped.
    pub fn scan(&self) -> Result<Vec<FoundFile>> {
        let paths = self.find_files()?;
        let mut found = Vec::with_capacity(paths.len());

        for path in paths {
            match stat_file(&path, self.fingerprint_size) {
                Ok(f) => found.push(f),
                Err(e) => debug!("Failed to stat {:?}: {}", path, e),
            }
        }

        Ok(found)
    }
}

fn stat_file(path: &Path, fingerprint_size: usize) -> std::io::Result<FoundFile> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    Ok(FoundFile {
        path: path.to_path_buf(),
        file_id: FileId::from_file(&file)?,
        size: metadata.len(),
        modified: metadata.modified()?,
        fingerprint: Fingerprint::read(&file, fingerprint_size)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup_test_files(dir: &TempDir) {
        for name in ["test1.log", "test2.log", "other.txt", "archive.gz"] {
            fs::write(dir.path().join(name), format!("content of {}\n", name)).unwrap();
        }
    }

    #[test]
    fn test_finder_basic() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], &[], 1024).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_finder_with_regex_exclude() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let include = format!("{}/*", dir.path().display());
        let finder = FileFinder::new(vec![include], &[".gz$".to_string()], 1024).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 3);
        assert!(
            !files
                .iter()
                .any(|p| p.file_name().unwrap() == "archive.gz"),
            "archive.gz must be excluded"
        );
    }

    #[test]
    fn test_finder_no_duplicates() {
        let dir = TempDir::new().unwrap();
        setup_test_files(&dir);

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern.clone(), pattern], &[], 1024).unwrap();

        assert_eq!(finder.find_files().unwrap().len(), 2);
    }

    #[test]
    fn test_finder_skips_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested.log")).unwrap();
        fs::write(dir.path().join("real.log"), "x\n").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], &[], 1024).unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files, vec![dir.path().join("real.log")]);
    }

    #[test]
    fn test_finder_rejects_bad_patterns() {
        assert!(matches!(
            FileFinder::new(vec!["/var/log/[".to_string()], &[], 1024),
            Err(Error::InvalidGlob(_))
        ));
        assert!(matches!(
            FileFinder::new(vec!["/var/log/*".to_string()], &["(".to_string()], 1024),
            Err(Error::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_finder_discovers_file_in_initially_empty_directory() {
        let dir = TempDir::new().unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], &[], 1024).unwrap();

        assert!(finder.find_files().unwrap().is_empty());

        fs::write(dir.path().join("first.log"), "first log entry\n").unwrap();

        let files = finder.find_files().unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_scan_reports_identity_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "hello world\n").unwrap();

        let pattern = format!("{}/*.log", dir.path().display());
        let finder = FileFinder::new(vec![pattern], &[], 5).unwrap();

        let found = finder.scan().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, path);
        assert_eq!(found[0].size, 12);
        assert_eq!(found[0].file_id, FileId::from_path(&path).unwrap());
        assert_eq!(found[0].fingerprint.bytes(), b"hello");
    }

    #[test]
    fn test_matches_respects_exclude() {
        let finder =
            FileFinder::new(vec!["/var/log/*".to_string()], &["debug".to_string()], 1024)
                .unwrap();
        assert!(finder.matches(Path::new("/var/log/app.log")));
        assert!(!finder.matches(Path::new("/var/log/debug.log")));
        assert!(!finder.matches(Path::new("/tmp/app.log")));
    }
}
