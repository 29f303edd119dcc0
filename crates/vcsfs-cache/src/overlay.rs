//! Local overlay: entries that exist only on local disk.
//!
//! Recomputed on every listing request. All `local` children of a cached
//! directory are dropped and rebuilt from a fresh scan of the working
//! directory, so local-only entries never survive as stable cache state.
//! Only VCS-sourced children persist across calls.

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};
use vcsfs_core::config::OverlayConfig;
use vcsfs_core::path::{join, to_host};
use vcsfs_core::{DirEntry, Entry, EntryKind, VcsfsError, VcsfsResult};

use crate::index::CacheIndex;

/// One child of a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalItem {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Modification time as Unix seconds
    pub modified: Option<u64>,
}

impl LocalItem {
    pub fn file(name: impl Into<String>) -> Self {
        LocalItem {
            name: name.into(),
            is_dir: false,
            size: 0,
            modified: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        LocalItem {
            is_dir: true,
            ..Self::file(name)
        }
    }
}

/// Decides which local names may appear in listings.
pub trait NameFilter: Send + Sync {
    fn accept(&self, name: &str, is_dir: bool) -> bool;
}

/// Lists the immediate children of a local directory.
pub trait LocalScanner: Send + Sync {
    fn scan(&self, dir: &Path, filter: &dyn NameFilter) -> io::Result<Vec<LocalItem>>;
}

/// Scans the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

impl LocalScanner for FsScanner {
    fn scan(&self, dir: &Path, filter: &dyn NameFilter) -> io::Result<Vec<LocalItem>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let meta = entry.metadata()?;
            if !filter.accept(&name, meta.is_dir()) {
                continue;
            }
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs());
            items.push(LocalItem {
                name,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
                modified,
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

/// Rejects names matching ignore globs, VCS metadata directories, and the
/// cache's own record file.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    patterns: Vec<glob::Pattern>,
    hidden: HashSet<String>,
}

impl GlobFilter {
    pub fn new(ignore: &[String], hidden: impl IntoIterator<Item = String>) -> VcsfsResult<Self> {
        let patterns = ignore
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| VcsfsError::Config(format!("invalid ignore pattern {p:?}: {e}")))
            })
            .collect::<VcsfsResult<Vec<_>>>()?;
        Ok(GlobFilter {
            patterns,
            hidden: hidden.into_iter().collect(),
        })
    }

    pub fn from_config(config: &OverlayConfig, record_file: &str) -> VcsfsResult<Self> {
        let hidden = config
            .vcs_dirs
            .iter()
            .cloned()
            .chain(std::iter::once(record_file.to_string()));
        Self::new(&config.ignore, hidden)
    }
}

impl NameFilter for GlobFilter {
    fn accept(&self, name: &str, _is_dir: bool) -> bool {
        !self.hidden.contains(name) && !self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Merges local-only entries into cached directory listings.
pub struct LocalOverlay {
    root: PathBuf,
    scanner: Arc<dyn LocalScanner>,
    filter: Arc<dyn NameFilter>,
    local_status: String,
}

impl LocalOverlay {
    pub fn new(
        root: PathBuf,
        scanner: Arc<dyn LocalScanner>,
        filter: Arc<dyn NameFilter>,
        local_status: impl Into<String>,
    ) -> Self {
        LocalOverlay {
            root,
            scanner,
            filter,
            local_status: local_status.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_status(&self) -> &str {
        &self.local_status
    }

    /// Scan the local directory of `path`. A missing directory or an I/O
    /// failure yields an empty scan.
    pub fn scan(&self, path: &str) -> Vec<LocalItem> {
        let dir = to_host(&self.root, path);
        match self.scanner.scan(&dir, self.filter.as_ref()) {
            Ok(items) => items,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path, "no local directory to overlay");
                Vec::new()
            }
            Err(e) => {
                warn!(path = %path, dir = %dir.display(), "local scan failed: {e}");
                Vec::new()
            }
        }
    }

    /// An entry for a local-only item.
    pub fn local_entry(&self, item: &LocalItem) -> Entry {
        let kind = if item.is_dir {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let mut entry = Entry::new(kind, item.name.as_str());
        entry.local = true;
        entry.status = self.local_status.clone();
        if !item.is_dir {
            entry.size = item.size.to_string();
        }
        if let Some(secs) = item.modified {
            entry.date = secs.to_string();
        }
        entry
    }

    /// Replace the local children of the cached directory `path` with the
    /// scanned `items` that the VCS does not already list.
    ///
    /// Newly seen local directories are registered in the index. Returns
    /// the number of local children now present.
    pub fn apply(&self, index: &mut CacheIndex, path: &str, items: &[LocalItem]) -> usize {
        let Some(dir) = index.get_mut(path) else {
            return 0;
        };
        dir.children.retain(|c| !c.local);

        let mut added = 0;
        let mut new_dirs = Vec::new();
        for item in items {
            if dir.child(&item.name).is_some() {
                continue;
            }
            if item.is_dir {
                new_dirs.push(join(path, &item.name));
            }
            dir.children.push(self.local_entry(item));
            added += 1;
        }

        for dir_path in new_dirs {
            if !index.contains(&dir_path) {
                index.merge(&dir_path, DirEntry::new_local(dir_path.as_str(), &self.local_status));
            }
        }
        added
    }

    /// Scan each cached directory in `paths`, keeping their order.
    pub fn scan_subtree(&self, paths: &[String]) -> Vec<(String, Vec<LocalItem>)> {
        paths.iter().map(|p| (p.clone(), self.scan(p))).collect()
    }

    /// Apply previously gathered scans depth-first.
    pub fn apply_subtree(&self, index: &mut CacheIndex, scans: &[(String, Vec<LocalItem>)]) {
        for (path, items) in scans {
            self.apply(index, path, items);
        }
    }
}
