pub mod config;
pub mod error;
pub mod path;
pub mod types;

pub use error::{VcsfsError, VcsfsResult};
pub use types::{DirEntry, Entry, EntryId, EntryKind};
