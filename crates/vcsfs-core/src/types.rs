use serde::{Deserialize, Serialize};

use crate::path;

/// Whether an entry is a plain file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Dir,
}

/// VCS status of one file or directory as reported by the listing command.
///
/// `status` is free-form and VCS-defined. `local` marks entries that exist
/// only on local disk and are not tracked by the VCS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub kind: EntryKind,
    pub name: String,
    pub size: String,
    pub date: String,
    pub time: String,
    pub status: String,
    pub locker: String,
    pub attr: String,
    pub local: bool,
}

impl Entry {
    pub fn new(kind: EntryKind, name: impl Into<String>) -> Self {
        Entry {
            kind,
            name: name.into(),
            size: String::new(),
            date: String::new(),
            time: String::new(),
            status: String::new(),
            locker: String::new(),
            attr: String::new(),
            local: false,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(EntryKind::File, name)
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self::new(EntryKind::Dir, name)
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Copy the VCS-reported fields of `other` into `self`, keeping the name.
    pub fn update_from(&mut self, other: &Entry) {
        self.kind = other.kind;
        self.size.clone_from(&other.size);
        self.date.clone_from(&other.date);
        self.time.clone_from(&other.time);
        self.status.clone_from(&other.status);
        self.locker.clone_from(&other.locker);
        self.attr.clone_from(&other.attr);
        self.local = other.local;
    }
}

/// Stable identity of a cached directory. Assigned when a path is first
/// registered and kept across every later merge of that path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub u64);

/// A cached directory: its own status plus its ordered children.
///
/// Subdirectory children are metadata only; the full `DirEntry` of a
/// subdirectory is registered separately under its own path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub id: EntryId,
    /// Full slash-separated path from the VCS root (root = "")
    pub path: String,
    pub meta: Entry,
    pub children: Vec<Entry>,
    /// Children reflect the last successful fetch or disk-cache load
    pub loaded: bool,
    /// Only true while a placeholder is being announced to views
    #[serde(default)]
    pub being_loaded: bool,
}

impl DirEntry {
    /// An empty, unloaded directory for `path`. The id is assigned on
    /// registration with the cache index.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path::file_name(&path).to_string();
        DirEntry {
            id: EntryId(0),
            path,
            meta: Entry::dir(name),
            children: Vec::new(),
            loaded: false,
            being_loaded: false,
        }
    }

    /// A directory known only from local disk.
    pub fn new_local(path: impl Into<String>, status: &str) -> Self {
        let mut dir = Self::new(path);
        dir.meta.local = true;
        dir.meta.status = status.to_string();
        dir
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn is_local(&self) -> bool {
        self.meta.local
    }

    pub fn files(&self) -> impl Iterator<Item = &Entry> {
        self.children.iter().filter(|c| !c.is_dir())
    }

    pub fn subdirs(&self) -> impl Iterator<Item = &Entry> {
        self.children.iter().filter(|c| c.is_dir())
    }

    pub fn child(&self, name: &str) -> Option<&Entry> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Entry> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Insert a child, replacing any existing child of the same name.
    ///
    /// A file and a directory never share a name within one parent.
    pub fn upsert_child(&mut self, entry: Entry) {
        match self.children.iter_mut().find(|c| c.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.children.push(entry),
        }
    }

    pub fn remove_child(&mut self, name: &str) -> Option<Entry> {
        let pos = self.children.iter().position(|c| c.name == name)?;
        Some(self.children.remove(pos))
    }

    /// Relabel a child in place. Returns false if no child has `old` as its name.
    pub fn rename_child(&mut self, old: &str, new: &str) -> bool {
        if old != new {
            self.children.retain(|c| c.name != new);
        }
        match self.child_mut(old) {
            Some(child) => {
                child.name = new.to_string();
                true
            }
            None => false,
        }
    }

    /// Path of the named child.
    pub fn child_path(&self, name: &str) -> String {
        path::join(&self.path, name)
    }
}
