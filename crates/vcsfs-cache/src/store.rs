//! Two-tier listing cache: the memory index plus the on-disk record tree.
//!
//! The memory index and the fetch dispatcher's counters share one mutex per
//! cache instance. It is only held for index and queue bookkeeping; record
//! files are read and written before the lock is taken or after it is
//! released. Disk failures are logged and degrade to a cache miss (`load`)
//! or skipped persistence (`persist`); they never reach the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use vcsfs_core::path::split_parent;
use vcsfs_core::{DirEntry, Entry, EntryId};

use crate::cache::RecordStore;
use crate::dispatch::FetchState;
use crate::index::CacheIndex;
use crate::record::{build_dir_entry, Record, RecordParser};

/// State guarded by the cache instance's mutex.
#[derive(Debug, Default)]
pub struct CacheState {
    pub index: CacheIndex,
    pub fetch: FetchState,
}

pub struct CacheStore {
    records: RecordStore,
    parser: Arc<dyn RecordParser>,
    state: Mutex<CacheState>,
}

impl CacheStore {
    pub fn new(records: RecordStore, parser: Arc<dyn RecordParser>) -> Self {
        CacheStore {
            records,
            parser,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Lock the instance state. A panic while holding the lock leaves the
    /// index usable, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn parser(&self) -> &dyn RecordParser {
        self.parser.as_ref()
    }

    /// Memory lookup only. Returns a snapshot of the cached entry.
    pub fn get(&self, path: &str) -> Option<DirEntry> {
        self.lock().index.get(path).cloned()
    }

    /// Register `entry` under `path`, merging into an existing entry.
    pub fn merge(&self, path: &str, entry: DirEntry) -> EntryId {
        self.lock().index.merge(path, entry)
    }

    /// Write the raw listing records of `path` to its record file.
    /// Returns false if the write failed.
    pub fn persist(&self, path: &str, records: &[Record]) -> bool {
        match self.records.write(path, records) {
            Ok(()) => {
                debug!(path = %path, records = records.len(), "persisted listing");
                true
            }
            Err(e) => {
                warn!(path = %path, "skipping listing persistence: {e:#}");
                false
            }
        }
    }

    /// Load `path` from its record file into memory.
    ///
    /// Returns the merged entry, or `None` on a miss or read failure.
    pub fn load(&self, path: &str) -> Option<DirEntry> {
        let records = match self.records.read(path) {
            Ok(Some(records)) => records,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %path, "treating unreadable record file as a miss: {e:#}");
                return None;
            }
        };
        let dir = build_dir_entry(path, &records, self.parser.as_ref());
        let mut state = self.lock();
        state.index.merge(path, dir);
        debug!(path = %path, records = records.len(), "loaded listing from disk cache");
        state.index.get(path).cloned()
    }

    /// Delete the record file of `path` and mark its memory entry unloaded.
    pub fn invalidate(&self, path: &str) {
        self.drop_record(path);
        self.lock().index.set_loaded(path, false);
    }

    /// Delete the record file of `path` only; the memory entry is kept as is.
    pub fn drop_record(&self, path: &str) {
        if let Err(e) = self.records.remove(path) {
            warn!(path = %path, "failed to remove record file: {e:#}");
        }
    }

    /// Rename a cached directory: the on-disk record tree, every memory
    /// entry beneath it, and its entry in the parent listing.
    ///
    /// A failed disk rename is logged and the memory rename still happens;
    /// the next full refresh reconciles the two tiers.
    pub fn rename_path(&self, old: &str, new: &str) -> usize {
        if let Err(e) = self.records.rename_dir(old, new) {
            warn!(old = %old, new = %new, "disk cache rename failed: {e:#}");
        }
        let moved = self.lock().index.rename_subtree(old, new);
        debug!(old = %old, new = %new, moved, "renamed cached subtree");
        moved
    }

    /// Remove `path` from its parent's listing and unregister any cached
    /// subtree at `path`, in memory and on disk.
    pub fn remove_entry(&self, path: &str) -> bool {
        let (parent, name) = split_parent(path);
        let (removed, subtree) = {
            let mut state = self.lock();
            let removed = state
                .index
                .get_mut(parent)
                .and_then(|p| p.remove_child(name))
                .is_some();
            let subtree = state.index.remove_subtree(path);
            (removed, subtree)
        };
        if !subtree.is_empty() {
            if let Err(e) = self.records.remove_tree(path) {
                warn!(path = %path, "failed to remove cached subtree: {e:#}");
            }
        }
        removed || !subtree.is_empty()
    }

    /// Insert `entry` into the cached listing of `parent`, replacing any
    /// child of the same name. Returns false if `parent` is not cached.
    pub fn insert_entry(&self, parent: &str, entry: Entry) -> bool {
        match self.lock().index.get_mut(parent) {
            Some(dir) => {
                dir.upsert_child(entry);
                true
            }
            None => false,
        }
    }

    /// Clear the memory index, the fetch backlog, and the on-disk cache.
    pub fn teardown(&self) {
        {
            let mut state = self.lock();
            state.index.clear();
            state.fetch.clear();
        }
        if let Err(e) = self.records.clear() {
            warn!(dir = %self.records.root().display(), "failed to clear disk cache: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ColumnParser;

    fn store(dir: &std::path::Path) -> CacheStore {
        CacheStore::new(
            RecordStore::new(dir.to_path_buf(), "list.txt"),
            Arc::new(ColumnParser::default()),
        )
    }

    fn rec(fields: &[&str]) -> Record {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn persist_then_load_cold() {
        let dir = tempfile::tempdir().unwrap();
        let warm = store(dir.path());
        warm.persist("src", &[rec(&["Foo.java", "file", "Up-to-date"]), rec(&["bar", "dir", ""])]);

        let cold = store(dir.path());
        assert!(cold.get("src").is_none());
        let loaded = cold.load("src").unwrap();
        assert!(loaded.loaded);
        assert_eq!(loaded.children.len(), 2);
        assert!(cold.get("src/bar").is_some());
    }

    #[test]
    fn load_miss() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(dir.path()).load("nothing").is_none());
    }

    #[test]
    fn invalidate_clears_disk_and_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.persist("src", &[rec(&["a", "file"])]);
        s.load("src").unwrap();

        s.invalidate("src");
        assert!(!s.get("src").unwrap().loaded);
        assert!(!s.records().contains("src"));
    }

    #[test]
    fn rename_moves_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.persist("a/b", &[rec(&["f", "file"])]);
        s.load("a/b").unwrap();

        assert_eq!(s.rename_path("a/b", "a/c"), 1);
        assert!(s.get("a/b").is_none());
        assert_eq!(s.get("a/c").unwrap().path, "a/c");
        assert!(s.records().contains("a/c"));
        assert!(!s.records().contains("a/b"));
    }

    #[test]
    fn remove_entry_drops_child_and_subtree() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let mut src = DirEntry::new("src");
        src.children = vec![Entry::file("Foo.java"), Entry::dir("bar")];
        src.loaded = true;
        s.merge("src", src);
        s.persist("src/bar", &[rec(&["x", "file"])]);

        assert!(s.remove_entry("src/bar"));
        let src = s.get("src").unwrap();
        assert_eq!(src.children.len(), 1);
        assert!(s.get("src/bar").is_none());
        assert!(!s.records().contains("src/bar"));
    }

    #[test]
    fn insert_entry_needs_cached_parent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        assert!(!s.insert_entry("src", Entry::file("a")));

        s.merge("src", DirEntry::new("src"));
        assert!(s.insert_entry("src", Entry::file("a")));
        assert!(s.insert_entry("src", Entry::dir("a")));
        let src = s.get("src").unwrap();
        assert_eq!(src.children.len(), 1);
        assert!(src.child("a").unwrap().is_dir());
    }

    #[test]
    fn teardown_empties_everything() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("inst");
        let s = store(&root);
        s.persist("a", &[rec(&["x", "file"])]);
        s.load("a").unwrap();

        s.teardown();
        assert!(s.get("a").is_none());
        assert!(!root.exists());
    }

    #[test]
    fn unreadable_record_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        std::fs::create_dir_all(s.records().file_for("src")).unwrap();

        assert!(s.load("src").is_none());
        assert!(s.get("src").is_none());
    }

    #[test]
    fn failed_persist_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("inst");
        std::fs::write(&root, b"not a directory").unwrap();
        let s = store(&root);

        assert!(!s.persist("src", &[rec(&["a", "file"])]));
        assert!(s.load("src").is_none());
    }

    #[test]
    fn failed_disk_rename_still_rekeys_memory() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        s.persist("a/b", &[rec(&["f", "file"])]);
        s.load("a/b").unwrap();
        std::fs::write(dir.path().join("z"), b"").unwrap();

        assert_eq!(s.rename_path("a/b", "z/d"), 1);
        assert!(s.get("a/b").is_none());
        assert!(s.get("z/d").unwrap().child("f").is_some());
        assert!(s.records().contains("a/b"));
    }

    #[test]
    fn load_skips_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(dir.path());
        let file = s.records().file_for("src");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "good.c|file|Modified|\n|file|\nnested/x.c|file|\nsub|dir|\n").unwrap();

        let src = s.load("src").unwrap();
        assert!(src.loaded);
        assert_eq!(src.children.len(), 2);
        assert_eq!(src.child("good.c").unwrap().status, "Modified");
        assert!(src.child("sub").unwrap().is_dir());
    }
}
