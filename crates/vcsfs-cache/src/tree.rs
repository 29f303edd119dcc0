//! `VcsTree`: one virtual filesystem instance's view of the VCS tree.
//!
//! Ties the two-tier cache, the local overlay, and the fetch dispatcher
//! together and applies structural edits made through the filesystem
//! (rename, delete, add) without fetching.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use vcsfs_core::config::{expand_tilde, VcsfsConfig};
use vcsfs_core::path::{normalize, split_parent};
use vcsfs_core::{DirEntry, Entry, VcsfsResult};

use crate::cache::RecordStore;
use crate::dispatch::FetchDispatcher;
use crate::overlay::{FsScanner, GlobFilter, LocalOverlay, LocalScanner, NameFilter};
use crate::reader::{NeverConfirm, NullNotifier, ReaderFactory, RefreshPrompt, ViewNotifier};
use crate::record::{ColumnParser, RecordParser};
use crate::store::CacheStore;

/// External collaborators of a `VcsTree`. Only the reader factory is
/// required; the rest default to headless implementations.
pub struct Collaborators {
    factory: Arc<dyn ReaderFactory>,
    notifier: Arc<dyn ViewNotifier>,
    prompt: Arc<dyn RefreshPrompt>,
    scanner: Arc<dyn LocalScanner>,
    parser: Option<Arc<dyn RecordParser>>,
    filter: Option<Arc<dyn NameFilter>>,
}

impl Collaborators {
    pub fn new(factory: Arc<dyn ReaderFactory>) -> Self {
        Collaborators {
            factory,
            notifier: Arc::new(NullNotifier),
            prompt: Arc::new(NeverConfirm),
            scanner: Arc::new(FsScanner),
            parser: None,
            filter: None,
        }
    }

    pub fn notifier(mut self, notifier: Arc<dyn ViewNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn RefreshPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn scanner(mut self, scanner: Arc<dyn LocalScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Override the record parser built from `[records]`.
    pub fn parser(mut self, parser: Arc<dyn RecordParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Override the name filter built from `[overlay]`.
    pub fn filter(mut self, filter: Arc<dyn NameFilter>) -> Self {
        self.filter = Some(filter);
        self
    }
}

pub struct VcsTree {
    store: Arc<CacheStore>,
    overlay: Arc<LocalOverlay>,
    dispatcher: Arc<FetchDispatcher>,
}

impl VcsTree {
    /// Build a filesystem instance. Worker threads for fetches are started
    /// on `runtime`'s blocking pool.
    pub fn new(config: &VcsfsConfig, collaborators: Collaborators, runtime: Handle) -> VcsfsResult<Self> {
        config.validate()?;

        let parser = collaborators
            .parser
            .unwrap_or_else(|| Arc::new(ColumnParser::new(config.records.clone())));
        let filter: Arc<dyn NameFilter> = match collaborators.filter {
            Some(filter) => filter,
            None => Arc::new(GlobFilter::from_config(&config.overlay, &config.cache.record_file)?),
        };

        let records = RecordStore::new(config.instance_dir(), config.cache.record_file.as_str());
        let store = Arc::new(CacheStore::new(records, parser));

        let root = expand_tilde(&config.root);
        let overlay = Arc::new(LocalOverlay::new(
            root.clone(),
            collaborators.scanner,
            filter,
            config.overlay.local_status.as_str(),
        ));

        let dispatcher = Arc::new(FetchDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&overlay),
            collaborators.factory,
            collaborators.notifier,
            collaborators.prompt,
            runtime,
            root,
            config.fetch.recursive_root_refresh,
        ));

        info!(
            instance = %config.cache.instance,
            cache = %store.records().root().display(),
            root = %overlay.root().display(),
            "vcs tree ready"
        );

        Ok(VcsTree {
            store,
            overlay,
            dispatcher,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn overlay(&self) -> &LocalOverlay {
        &self.overlay
    }

    pub fn dispatcher(&self) -> &Arc<FetchDispatcher> {
        &self.dispatcher
    }

    /// Listing of `path`, immediately. Schedules a fetch on a cache miss.
    pub fn request_listing(&self, path: &str, recursive: bool) -> DirEntry {
        self.dispatcher.request_listing(path, recursive)
    }

    /// Forget the cached listing of `path` and fetch it again.
    pub fn refresh(&self, path: &str, recursive: bool) -> DirEntry {
        let path = normalize(path);
        self.store.invalidate(&path);
        debug!(path = %path, recursive, "refreshing listing");
        self.dispatcher.request_listing(&path, recursive)
    }

    /// Rename a file or directory. Directories move their whole cached
    /// subtree; files are relabelled in their parent's listing.
    pub fn rename_entry(&self, old: &str, new: &str) -> bool {
        let (old, new) = (normalize(old), normalize(new));
        if old.is_empty() || new.is_empty() || old == new {
            return false;
        }

        if self.is_dir(&old) {
            let moved = self.store.rename_path(&old, &new);
            return moved > 0;
        }

        let renamed = self.store.lock().index.move_child(&old, &new);
        if renamed {
            let (old_parent, _) = split_parent(&old);
            let (new_parent, _) = split_parent(&new);
            self.store.drop_record(old_parent);
            if new_parent != old_parent {
                self.store.drop_record(new_parent);
            }
            debug!(old = %old, new = %new, "renamed file entry");
        }
        renamed
    }

    /// Remove a file or directory from its parent's listing. A directory's
    /// cached subtree goes with it.
    pub fn delete(&self, path: &str) -> bool {
        let path = normalize(path);
        if path.is_empty() {
            return false;
        }
        let removed = self.store.remove_entry(&path);
        if removed {
            self.store.drop_record(split_parent(&path).0);
            debug!(path = %path, "deleted entry");
        }
        removed
    }

    /// Record a file created through the filesystem.
    pub fn add_file(&self, path: &str) -> bool {
        let path = normalize(path);
        let (parent, name) = split_parent(&path);
        if name.is_empty() {
            return false;
        }
        let mut entry = Entry::file(name).with_status(self.overlay.local_status());
        entry.local = true;
        let added = self.store.insert_entry(parent, entry);
        self.store.drop_record(parent);
        debug!(path = %path, added, "added file");
        added
    }

    /// Record a folder created through the filesystem and give it a cache
    /// directory of its own.
    pub fn add_folder(&self, path: &str) -> bool {
        let path = normalize(path);
        let (parent, name) = split_parent(&path);
        if name.is_empty() {
            return false;
        }
        let status = self.overlay.local_status();
        let mut entry = Entry::dir(name).with_status(status);
        entry.local = true;
        let added = self.store.insert_entry(parent, entry);

        if let Err(e) = self.store.records().ensure_dir(&path) {
            warn!(path = %path, "failed to create cache directory: {e:#}");
        }
        {
            let mut state = self.store.lock();
            // an already cached VCS directory keeps its listing
            if !state.index.contains(&path) {
                state.index.merge(&path, DirEntry::new_local(path.as_str(), status));
            }
        }
        self.store.drop_record(parent);
        debug!(path = %path, added, "added folder");
        added
    }

    /// Status of a single file or directory from its parent's cached
    /// listing. Never fetches.
    pub fn entry(&self, path: &str) -> Option<Entry> {
        let path = normalize(path);
        let state = self.store.lock();
        if path.is_empty() {
            return state.index.get("").map(|d| d.meta.clone());
        }
        let (parent, name) = split_parent(&path);
        state
            .index
            .get(parent)
            .and_then(|d| d.child(name))
            .cloned()
            .or_else(|| state.index.get(&path).map(|d| d.meta.clone()))
    }

    /// Drop every cached listing of this instance, in memory and on disk.
    pub fn teardown(&self) {
        self.store.teardown();
        info!(cache = %self.store.records().root().display(), "cache torn down");
    }

    pub fn active_fetches(&self) -> usize {
        self.dispatcher.active_fetches()
    }

    pub fn pending_paths(&self) -> Vec<String> {
        self.dispatcher.pending_paths()
    }

    pub fn last_fetch_canceled(&self) -> bool {
        self.dispatcher.last_fetch_canceled()
    }

    fn is_dir(&self, path: &str) -> bool {
        let state = self.store.lock();
        if state.index.contains(path) {
            return true;
        }
        let (parent, name) = split_parent(path);
        state
            .index
            .get(parent)
            .and_then(|d| d.child(name))
            .is_some_and(Entry::is_dir)
    }
}
