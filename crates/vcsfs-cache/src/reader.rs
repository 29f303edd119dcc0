//! Collaborators of the fetch dispatcher: the external listing reader,
//! view notification, and the recursive-refresh prompt.

use std::path::PathBuf;

use crate::container::DirectoryContainer;
use crate::record::Record;

/// A directory listing the dispatcher wants fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// VCS path of the directory
    pub path: String,
    /// Fetch the whole subtree rather than one directory
    pub recursive: bool,
    /// Local working directory of the filesystem
    pub root: PathBuf,
}

/// Result of running a listing reader.
#[derive(Debug, Clone)]
pub enum Listing {
    /// Records of a single directory
    Flat { records: Vec<Record>, success: bool },
    /// Records of every directory beneath the requested one
    Tree {
        root: DirectoryContainer,
        success: bool,
    },
}

impl Listing {
    pub fn success(&self) -> bool {
        match self {
            Listing::Flat { success, .. } | Listing::Tree { success, .. } => *success,
        }
    }

    pub fn failed() -> Self {
        Listing::Flat {
            records: Vec::new(),
            success: false,
        }
    }

    /// Flat records of the requested directory.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            Listing::Flat { records, .. } => records,
            Listing::Tree { root, .. } => root.records().to_vec(),
        }
    }

    /// Subtree rooted at `path`; a flat listing becomes a single node.
    pub fn into_tree(self, path: &str) -> DirectoryContainer {
        match self {
            Listing::Tree { root, .. } => root,
            Listing::Flat { records, .. } => {
                let mut root = DirectoryContainer::new(path);
                root.set_records(records);
                root
            }
        }
    }
}

/// One unit of work that runs the external VCS listing. Runs on its own
/// worker thread and may block on process I/O for as long as it needs.
pub trait ListingReader: Send {
    fn read(self: Box<Self>) -> Listing;
}

/// Produces listing readers. Returning `None` means the fetch was
/// declined (e.g. the user dismissed a prompt).
pub trait ReaderFactory: Send + Sync {
    fn create(&self, request: &FetchRequest) -> Option<Box<dyn ListingReader>>;
}

/// Informs presentation layers that structure or status beneath `path`
/// changed.
pub trait ViewNotifier: Send + Sync {
    fn notify_changed(&self, path: &str, recursive: bool);
}

impl<F> ViewNotifier for F
where
    F: Fn(&str, bool) + Send + Sync,
{
    fn notify_changed(&self, path: &str, recursive: bool) {
        self(path, recursive)
    }
}

/// Discards notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl ViewNotifier for NullNotifier {
    fn notify_changed(&self, _path: &str, _recursive: bool) {}
}

/// Asks whether the first listing of the root may fetch the whole tree.
pub trait RefreshPrompt: Send + Sync {
    fn confirm_recursive(&self, path: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConfirm;

impl RefreshPrompt for AlwaysConfirm {
    fn confirm_recursive(&self, _path: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverConfirm;

impl RefreshPrompt for NeverConfirm {
    fn confirm_recursive(&self, _path: &str) -> bool {
        false
    }
}
