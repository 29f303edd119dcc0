//! Disk tier of the listing cache.
//!
//! Stores each directory's raw listing records as a flat record file.
//! Files are written atomically (temp → rename).
//!
//! Cache layout: `{instance_dir}/{vcs path with host separators}/{record_file}`,
//! so the record tree mirrors the VCS directory hierarchy.

use anyhow::{Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use vcsfs_core::path::to_host;

use crate::record::{decode_records, encode_records, Record};

pub struct RecordStore {
    dir: PathBuf,
    record_file: String,
}

impl RecordStore {
    /// Create a record store rooted at `dir`. Nothing is created on disk
    /// until the first write.
    pub fn new(dir: PathBuf, record_file: impl Into<String>) -> Self {
        RecordStore {
            dir,
            record_file: record_file.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }

    pub fn record_file_name(&self) -> &str {
        &self.record_file
    }

    /// Cached directory for a VCS path.
    pub fn dir_for(&self, path: &str) -> PathBuf {
        to_host(&self.dir, path)
    }

    /// Record file for a VCS path.
    pub fn file_for(&self, path: &str) -> PathBuf {
        self.dir_for(path).join(&self.record_file)
    }

    /// Read cached records. Returns `Ok(None)` if nothing is cached.
    pub fn read(&self, path: &str) -> Result<Option<Vec<Record>>> {
        let file = self.file_for(path);
        match fs::read_to_string(&file) {
            Ok(content) => Ok(Some(decode_records(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading record file: {}", file.display())),
        }
    }

    /// Returns true if a record file exists for `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.file_for(path).is_file()
    }

    /// Store records for `path`, atomically.
    pub fn write(&self, path: &str, records: &[Record]) -> Result<()> {
        let dir = self.ensure_dir(path)?;
        let file = dir.join(&self.record_file);

        let tmp = file.with_extension("tmp");
        fs::write(&tmp, encode_records(records))
            .with_context(|| format!("writing record tmp: {}", tmp.display()))?;
        fs::rename(&tmp, &file)
            .with_context(|| format!("renaming record file: {}", file.display()))?;
        Ok(())
    }

    /// Create the cached directory for `path`.
    pub fn ensure_dir(&self, path: &str) -> Result<PathBuf> {
        let dir = self.dir_for(path);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache dir: {}", dir.display()))?;
        Ok(dir)
    }

    /// Delete the record file for `path`. A missing file is not an error.
    pub fn remove(&self, path: &str) -> Result<()> {
        let file = self.file_for(path);
        match fs::remove_file(&file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing record file: {}", file.display())),
        }
    }

    /// Delete the cached directory for `path` and everything beneath it.
    pub fn remove_tree(&self, path: &str) -> Result<()> {
        let dir = self.dir_for(path);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing cache dir: {}", dir.display())),
        }
    }

    /// Move the cached directory tree of `old` to `new`.
    pub fn rename_dir(&self, old: &str, new: &str) -> Result<()> {
        let from = self.dir_for(old);
        let to = self.dir_for(new);
        if !from.exists() {
            return Ok(());
        }
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating cache dir: {}", parent.display()))?;
        }
        fs::rename(&from, &to).with_context(|| {
            format!("renaming cache dir: {} → {}", from.display(), to.display())
        })
    }

    /// Delete the whole record tree.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("clearing cache: {}", self.dir.display())),
        }
    }
}
