//! File-backed progress store.
//!
//! Each book gets a directory under the store root named by a hash of its id
//! to avoid filesystem issues. Progress lives in a small `progress.toml` that
//! partial updates are merged into.

use crate::narration::{ProgressSink, ProgressUpdate};
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PROGRESS_FILE: &str = "progress.toml";

#[derive(Debug, Clone)]
pub struct FileProgressStore {
    root: PathBuf,
}

impl FileProgressStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn hash_dir(&self, book_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(book_id.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.root.join(hash)
    }

    fn progress_path(&self, book_id: &str) -> PathBuf {
        self.hash_dir(book_id).join(PROGRESS_FILE)
    }

    /// Last stored record for the book, if any. Unreadable files are treated
    /// as absent.
    pub fn load(&self, book_id: &str) -> Option<ProgressUpdate> {
        let path = self.progress_path(book_id);
        let data = fs::read_to_string(&path).ok()?;
        match toml::from_str(&data) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(path = %path.display(), "Ignoring unreadable progress file: {err}");
                None
            }
        }
    }
}

impl ProgressSink for FileProgressStore {
    fn update_progress(&mut self, book_id: &str, update: &ProgressUpdate) -> Result<()> {
        let path = self.progress_path(book_id);
        let mut record = self.load(book_id).unwrap_or_default();
        record.merge(update.clone());
        write_atomically(&path, &toml::to_string(&record).context("Serializing progress")?)?;
        debug!(path = %path.display(), "Wrote progress record");
        Ok(())
    }
}

fn write_atomically(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Creating progress dir {}", parent.display()))?;
    }
    let tmp = path.with_extension("toml.tmp");
    fs::write(&tmp, contents).with_context(|| format!("Writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_updates_merge_into_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileProgressStore::new(dir.path());

        store
            .update_progress(
                "dune",
                &ProgressUpdate {
                    chapter: Some(2),
                    sentence: Some(5),
                    percent: Some(40),
                    ..ProgressUpdate::default()
                },
            )
            .unwrap();
        store
            .update_progress(
                "dune",
                &ProgressUpdate {
                    title: Some("Dune".into()),
                    ..ProgressUpdate::default()
                },
            )
            .unwrap();

        let record = store.load("dune").unwrap();
        assert_eq!(record.chapter, Some(2));
        assert_eq!(record.sentence, Some(5));
        assert_eq!(record.title.as_deref(), Some("Dune"));
    }

    #[test]
    fn books_are_stored_apart() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileProgressStore::new(dir.path());
        store
            .update_progress(
                "a",
                &ProgressUpdate {
                    percent: Some(10),
                    ..ProgressUpdate::default()
                },
            )
            .unwrap();
        assert!(store.load("b").is_none());
        assert_ne!(store.hash_dir("a"), store.hash_dir("b"));
    }

    #[test]
    fn corrupt_file_reads_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileProgressStore::new(dir.path());
        let path = store.progress_path("x");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "chapter = [").unwrap();
        assert!(store.load("x").is_none());
    }
}
