//! vcsfs-cache: directory-listing cache and fetch coordinator for a
//! VCS-backed virtual filesystem
//!
//! Listings are served from memory, then from the on-disk record tree,
//! and only then fetched from the external VCS tool on a worker thread.
//! Entries that exist only on local disk are overlaid on every request.

pub mod cache;
pub mod container;
pub mod dispatch;
pub mod index;
pub mod overlay;
pub mod reader;
pub mod record;
pub mod store;
pub mod tree;

pub use cache::RecordStore;
pub use container::DirectoryContainer;
pub use dispatch::FetchDispatcher;
pub use index::CacheIndex;
pub use overlay::{FsScanner, GlobFilter, LocalItem, LocalOverlay, LocalScanner, NameFilter};
pub use reader::{
    AlwaysConfirm, FetchRequest, Listing, ListingReader, NeverConfirm, NullNotifier, ReaderFactory,
    RefreshPrompt, ViewNotifier,
};
pub use record::{build_dir_entry, ColumnParser, Record, RecordParser};
pub use store::CacheStore;
pub use tree::{Collaborators, VcsTree};
