//! Raw per-directory results of a recursive fetch, kept as a tree until
//! they are merged into the cache. Never persisted itself.

use std::collections::BTreeMap;

use vcsfs_core::path::{file_name, is_within, join};

use crate::record::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryContainer {
    path: String,
    name: String,
    records: Vec<Record>,
    children: BTreeMap<String, DirectoryContainer>,
}

impl DirectoryContainer {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        DirectoryContainer {
            name: file_name(&path).to_string(),
            path,
            records: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw listing records for this directory.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn set_records(&mut self, records: Vec<Record>) {
        self.records = records;
    }

    pub fn push_record(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn child(&self, name: &str) -> Option<&DirectoryContainer> {
        self.children.get(name)
    }

    pub fn children(&self) -> impl Iterator<Item = &DirectoryContainer> {
        self.children.values()
    }

    /// The named child container, created empty if missing.
    pub fn child_or_insert(&mut self, name: &str) -> &mut DirectoryContainer {
        let path = join(&self.path, name);
        self.children
            .entry(name.to_string())
            .or_insert_with(|| DirectoryContainer::new(path))
    }

    /// The container for a descendant `path`, creating intermediate
    /// containers. Returns `None` if `path` is not within this container.
    pub fn descendant_or_insert(&mut self, path: &str) -> Option<&mut DirectoryContainer> {
        if !is_within(path, &self.path) {
            return None;
        }
        let rest = path[self.path.len()..].trim_start_matches('/');
        let mut node = self;
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            node = node.child_or_insert(component);
        }
        Some(node)
    }

    /// Look up a descendant container by its full path.
    pub fn find(&self, path: &str) -> Option<&DirectoryContainer> {
        if !is_within(path, &self.path) {
            return None;
        }
        let rest = path[self.path.len()..].trim_start_matches('/');
        let mut node = self;
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            node = node.children.get(component)?;
        }
        Some(node)
    }

    /// All containers in depth-first pre-order: every parent precedes
    /// its children.
    pub fn walk(&self) -> Vec<&DirectoryContainer> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            // reversed so children come out in name order
            stack.extend(node.children.values().rev());
        }
        out
    }

    /// Number of containers in this tree, including the root.
    pub fn len(&self) -> usize {
        1 + self.children.values().map(DirectoryContainer::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.children.is_empty()
    }
}
