//! Memory tier of the listing cache: one `DirEntry` per VCS path.
//!
//! Entries are merged, never replaced, so an entry's `EntryId` and its
//! slot in the map survive every update of that path.

use std::collections::HashMap;

use vcsfs_core::path::{file_name, is_within, join, rebase, split_parent};
use vcsfs_core::{DirEntry, Entry, EntryId};

#[derive(Debug, Default)]
pub struct CacheIndex {
    /// path → directory entry; key always equals `DirEntry::path`
    dirs: HashMap<String, DirEntry>,
    next_id: u64,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&DirEntry> {
        self.dirs.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut DirEntry> {
        self.dirs.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.dirs.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// All registered paths equal to or beneath `prefix`.
    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .dirs
            .keys()
            .filter(|k| is_within(k, prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    fn alloc_id(&mut self) -> EntryId {
        self.next_id += 1;
        EntryId(self.next_id)
    }

    /// Register `incoming` under `path`, merging into an existing entry.
    ///
    /// An existing entry keeps its id and is updated in place: status,
    /// locker, local and loaded flags are taken from `incoming` and its
    /// children are merged by name. A loaded `incoming` is authoritative
    /// for VCS-sourced children, so those it no longer lists are dropped;
    /// local-only children are left for the overlay. Every subdirectory
    /// child is registered under its own path.
    pub fn merge(&mut self, path: &str, mut incoming: DirEntry) -> EntryId {
        incoming.path = path.to_string();
        incoming.meta.name = file_name(path).to_string();
        let subdirs: Vec<Entry> = incoming.subdirs().cloned().collect();

        let id = match self.dirs.get_mut(path) {
            Some(existing) => {
                // a directory's own listing carries no status for itself
                if !incoming.meta.status.is_empty() {
                    existing.meta.status = incoming.meta.status;
                }
                if !incoming.meta.locker.is_empty() {
                    existing.meta.locker = incoming.meta.locker;
                }
                existing.meta.local = incoming.meta.local;
                existing.loaded = incoming.loaded;

                if incoming.loaded {
                    existing
                        .children
                        .retain(|c| c.local || incoming.children.iter().any(|n| n.name == c.name));
                }
                for child in incoming.children {
                    match existing.child_mut(&child.name) {
                        Some(current) => current.update_from(&child),
                        None => existing.children.push(child),
                    }
                }
                existing.id
            }
            None => {
                let id = self.alloc_id();
                incoming.id = id;
                self.dirs.insert(path.to_string(), incoming);
                id
            }
        };

        for child in subdirs {
            self.register_child_dir(&join(path, &child.name), &child);
        }
        id
    }

    /// Make sure a subdirectory named in a parent listing has an index
    /// entry, updating its own status from the listing if it already does.
    fn register_child_dir(&mut self, path: &str, meta: &Entry) {
        match self.dirs.get_mut(path) {
            Some(existing) => existing.meta.update_from(meta),
            None => {
                let id = self.alloc_id();
                let mut dir = DirEntry::new(path);
                dir.id = id;
                dir.meta = meta.clone();
                self.dirs.insert(path.to_string(), dir);
            }
        }
    }

    /// Set the `loaded` flag of an existing entry.
    pub fn set_loaded(&mut self, path: &str, loaded: bool) -> bool {
        match self.dirs.get_mut(path) {
            Some(dir) => {
                dir.loaded = loaded;
                true
            }
            None => false,
        }
    }

    /// Unregister `prefix` and every path beneath it.
    pub fn remove_subtree(&mut self, prefix: &str) -> Vec<String> {
        let keys = self.keys_under(prefix);
        for key in &keys {
            self.dirs.remove(key);
        }
        keys
    }

    /// Re-key the subtree rooted at `old` to `new`, rewriting every path
    /// field, and relabel the directory in its parent's children.
    ///
    /// Returns the number of re-keyed entries.
    pub fn rename_subtree(&mut self, old: &str, new: &str) -> usize {
        let keys = self.keys_under(old);
        let mut moved = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(dir) = self.dirs.remove(key) {
                moved.push(dir);
            }
        }

        let count = moved.len();
        for mut dir in moved {
            let Some(new_path) = rebase(&dir.path, old, new) else {
                continue;
            };
            if dir.path == old {
                dir.meta.name = file_name(new).to_string();
            }
            dir.path = new_path.clone();
            self.dirs.insert(new_path, dir);
        }

        self.move_child(old, new);
        count
    }

    /// Move the child entry for `old` from its parent's listing to the
    /// listing of `new`'s parent under the new name. Parents that are not
    /// cached are skipped. Returns false if `old` was not listed.
    pub fn move_child(&mut self, old: &str, new: &str) -> bool {
        let (old_parent, old_name) = split_parent(old);
        let (new_parent, new_name) = split_parent(new);
        if old_parent == new_parent {
            return self
                .dirs
                .get_mut(old_parent)
                .is_some_and(|parent| parent.rename_child(old_name, new_name));
        }
        let Some(mut child) = self
            .dirs
            .get_mut(old_parent)
            .and_then(|p| p.remove_child(old_name))
        else {
            return false;
        };
        if let Some(parent) = self.dirs.get_mut(new_parent) {
            child.name = new_name.to_string();
            parent.upsert_child(child);
        }
        true
    }

    pub fn clear(&mut self) {
        self.dirs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn listing(path: &str, children: Vec<Entry>) -> DirEntry {
        let mut dir = DirEntry::new(path);
        dir.children = children;
        dir.loaded = true;
        dir
    }

    #[test]
    fn merge_inserts_and_registers_subdirs() {
        let mut index = CacheIndex::new();
        index.merge(
            "src",
            listing("src", vec![Entry::file("Foo.java"), Entry::dir("bar").with_status("Up-to-date")]),
        );

        assert!(index.get("src").unwrap().loaded);
        let bar = index.get("src/bar").unwrap();
        assert!(!bar.loaded);
        assert_eq!(bar.meta.status, "Up-to-date");
        assert_eq!(bar.path, "src/bar");
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn merge_twice_keeps_identity() {
        let mut index = CacheIndex::new();
        let first = index.merge("src", DirEntry::new("src"));
        let second = index.merge(
            "src",
            listing("src", vec![Entry::file("a").with_status("Modified")]),
        );

        assert_eq!(first, second);
        assert_eq!(index.len(), 1);
        let src = index.get("src").unwrap();
        assert!(src.loaded);
        assert_eq!(src.child("a").unwrap().status, "Modified");
    }

    #[test]
    fn merge_updates_children_in_place() {
        let mut index = CacheIndex::new();
        index.merge("", listing("", vec![Entry::file("a"), Entry::file("b")]));
        index.merge(
            "",
            listing("", vec![Entry::file("b").with_status("Modified"), Entry::file("a")]),
        );

        let root = index.get("").unwrap();
        let names: Vec<&str> = root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(root.child("b").unwrap().status, "Modified");
    }

    #[test]
    fn loaded_merge_drops_vanished_vcs_children_but_keeps_local() {
        let mut index = CacheIndex::new();
        let mut local = Entry::file("scratch.txt");
        local.local = true;
        index.merge("", listing("", vec![Entry::file("gone"), Entry::file("kept"), local]));

        index.merge("", listing("", vec![Entry::file("kept")]));
        let root = index.get("").unwrap();
        assert!(root.child("gone").is_none());
        assert!(root.child("kept").is_some());
        assert!(root.child("scratch.txt").is_some());
    }

    #[test]
    fn unloaded_merge_keeps_children_and_status() {
        let mut index = CacheIndex::new();
        index.merge("", listing("", vec![Entry::dir("src").with_status("Up-to-date")]));
        index.merge("src", DirEntry::new("src"));

        let src = index.get("src").unwrap();
        assert_eq!(src.meta.status, "Up-to-date");
        assert!(!src.loaded);
    }

    #[test]
    fn rename_rekeys_subtree() {
        let mut index = CacheIndex::new();
        index.merge("a", listing("a", vec![Entry::dir("b")]));
        index.merge("a/b", listing("a/b", vec![Entry::dir("x"), Entry::file("f")]));
        index.merge("a/b/x", listing("a/b/x", vec![Entry::file("g")]));
        index.merge("a/bb", listing("a/bb", vec![]));
        let id = index.get("a/b").unwrap().id;

        let moved = index.rename_subtree("a/b", "a/c");
        assert_eq!(moved, 2);
        assert!(index.keys_under("a/b").is_empty());
        assert!(index.contains("a/bb"));

        let c = index.get("a/c").unwrap();
        assert_eq!(c.id, id);
        assert_eq!(c.name(), "c");
        assert_eq!(index.get("a/c/x").unwrap().path, "a/c/x");
        assert!(index.get("a").unwrap().child("c").is_some());
        assert!(index.get("a").unwrap().child("b").is_none());
    }

    #[test]
    fn rename_across_parents_moves_child_entry() {
        let mut index = CacheIndex::new();
        index.merge("a", listing("a", vec![Entry::dir("b")]));
        index.merge("z", listing("z", vec![]));

        index.rename_subtree("a/b", "z/d");
        assert!(index.get("a").unwrap().child("b").is_none());
        assert!(index.get("z").unwrap().child("d").unwrap().is_dir());
        assert!(index.contains("z/d"));
    }

    #[test]
    fn remove_subtree_unregisters_descendants() {
        let mut index = CacheIndex::new();
        index.merge("a", listing("a", vec![Entry::dir("b")]));
        index.merge("a/b", listing("a/b", vec![Entry::dir("c")]));
        let removed = index.remove_subtree("a/b");
        assert_eq!(removed, vec!["a/b".to_string(), "a/b/c".to_string()]);
        assert!(index.contains("a"));
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(names in proptest::collection::btree_set("[a-z]{1,6}", 0..8)) {
            let children: Vec<Entry> = names
                .iter()
                .enumerate()
                .map(|(i, n)| if i % 2 == 0 { Entry::dir(n.as_str()) } else { Entry::file(n.as_str()) })
                .collect();
            let mut index = CacheIndex::new();
            let first = index.merge("root", listing("root", children.clone()));
            let len = index.len();
            let snapshot = index.get("root").unwrap().clone();

            let second = index.merge("root", listing("root", children));
            prop_assert_eq!(first, second);
            prop_assert_eq!(index.len(), len);
            prop_assert_eq!(index.get("root").unwrap(), &snapshot);
        }
    }
}
