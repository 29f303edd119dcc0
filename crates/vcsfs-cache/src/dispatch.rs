//! Fetch dispatcher: serves listing requests from the cache and schedules
//! fetches of fresh listings from the external VCS tool without blocking
//! the caller.
//!
//! Architecture:
//!   - Queue-driven fetches: a FIFO of pending non-recursive fetches with at
//!     most one in flight per cache instance, bounding load on the VCS tool.
//!   - Recursive fetches bypass the queue and start immediately.
//!   - Each started fetch runs its `ListingReader` on a dedicated blocking
//!     worker thread; completion persists, merges, notifies views, and
//!     starts the next queued fetch.
//!   - A failed or declined fetch drops the whole backlog. Nothing is
//!     retried automatically.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, warn};
use vcsfs_core::path::normalize;
use vcsfs_core::DirEntry;

use crate::container::DirectoryContainer;
use crate::overlay::LocalOverlay;
use crate::reader::{FetchRequest, ListingReader, ReaderFactory, RefreshPrompt, ViewNotifier};
use crate::record::{build_dir_entry, Record};
use crate::store::CacheStore;

/// Queue and counters of one cache instance, guarded by the cache mutex.
#[derive(Debug, Default)]
pub struct FetchState {
    /// Paths waiting for a queue-driven fetch, oldest first
    pending: VecDeque<String>,
    /// Paths queued, in flight, or under a running recursive fetch
    scheduled: HashSet<String>,
    /// Queue-driven fetches in flight (0 or 1)
    active: usize,
    last_canceled: bool,
    root_refreshed: bool,
    /// Bumped by teardown; fetches started under an older value are stale
    generation: u64,
}

impl FetchState {
    /// Pop the queue head if no queue-driven fetch is in flight, reserving
    /// the in-flight slot in the same critical section.
    fn reserve_next(&mut self) -> Option<String> {
        if self.active > 0 {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.active += 1;
        Some(next)
    }

    /// Drop every queued path. Returns how many were dropped.
    fn drop_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        for path in self.pending.drain(..) {
            self.scheduled.remove(&path);
        }
        dropped
    }

    /// Forget the backlog and start a new generation. Fetches already in
    /// flight stay scheduled until their stale completion arrives.
    pub(crate) fn clear(&mut self) {
        self.drop_pending();
        self.last_canceled = false;
        self.root_refreshed = false;
        self.generation += 1;
    }
}

pub struct FetchDispatcher {
    store: Arc<CacheStore>,
    overlay: Arc<LocalOverlay>,
    factory: Arc<dyn ReaderFactory>,
    notifier: Arc<dyn ViewNotifier>,
    prompt: Arc<dyn RefreshPrompt>,
    runtime: Handle,
    root: PathBuf,
    recursive_root_refresh: bool,
}

impl FetchDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<CacheStore>,
        overlay: Arc<LocalOverlay>,
        factory: Arc<dyn ReaderFactory>,
        notifier: Arc<dyn ViewNotifier>,
        prompt: Arc<dyn RefreshPrompt>,
        runtime: Handle,
        root: PathBuf,
        recursive_root_refresh: bool,
    ) -> Self {
        FetchDispatcher {
            store,
            overlay,
            factory,
            notifier,
            prompt,
            runtime,
            root,
            recursive_root_refresh,
        }
    }

    /// Return the listing of `path` immediately, scheduling a fetch when
    /// neither cache tier knows it.
    ///
    /// On a miss the result is an unloaded placeholder; views learn about
    /// the fetched listing through the `ViewNotifier`.
    pub fn request_listing(self: &Arc<Self>, path: &str, recursive: bool) -> DirEntry {
        let path = normalize(path);

        let hit = {
            let state = self.store.lock();
            state.fetch.scheduled.contains(&path)
                || state
                    .index
                    .get(&path)
                    .is_some_and(|d| d.loaded || d.being_loaded || d.is_local())
        };
        if hit {
            debug!(path = %path, "listing served from memory");
            return self.overlay_listing(&path);
        }

        if self.store.load(&path).is_some() {
            debug!(path = %path, "listing served from disk cache");
            return self.overlay_listing(&path);
        }

        self.announce_placeholder(&path);

        let recursive = recursive || self.take_root_refresh(&path);
        if recursive {
            self.start_recursive(&path);
        } else {
            self.enqueue(&path);
        }
        self.overlay_listing(&path)
    }

    /// Register an unloaded placeholder and let views see it exist.
    fn announce_placeholder(&self, path: &str) {
        {
            let mut state = self.store.lock();
            state.index.merge(path, DirEntry::new(path));
            if let Some(dir) = state.index.get_mut(path) {
                dir.being_loaded = true;
            }
        }
        self.notifier.notify_changed(path, false);
        if let Some(dir) = self.store.lock().index.get_mut(path) {
            dir.being_loaded = false;
        }
    }

    /// The first miss on the root may become a recursive fetch, if enabled
    /// and confirmed.
    fn take_root_refresh(&self, path: &str) -> bool {
        if !path.is_empty() || !self.recursive_root_refresh {
            return false;
        }
        {
            let mut state = self.store.lock();
            if state.fetch.root_refreshed {
                return false;
            }
            state.fetch.root_refreshed = true;
        }
        self.prompt.confirm_recursive(path)
    }

    /// Merge the local overlay into the cached listing and snapshot it.
    fn overlay_listing(&self, path: &str) -> DirEntry {
        let items = self.overlay.scan(path);
        let mut state = self.store.lock();
        self.overlay.apply(&mut state.index, path, &items);
        state
            .index
            .get(path)
            .cloned()
            .unwrap_or_else(|| DirEntry::new(path))
    }

    fn request(&self, path: &str, recursive: bool) -> FetchRequest {
        FetchRequest {
            path: path.to_string(),
            recursive,
            root: self.root.clone(),
        }
    }

    /// Queue a non-recursive fetch and start it if the queue is idle.
    fn enqueue(self: &Arc<Self>, path: &str) {
        let next = {
            let mut state = self.store.lock();
            if !state.fetch.scheduled.insert(path.to_string()) {
                debug!(path = %path, "fetch already scheduled");
                return;
            }
            state.fetch.pending.push_back(path.to_string());
            debug!(
                path = %path,
                pending = state.fetch.pending.len(),
                active = state.fetch.active,
                "queued listing fetch"
            );
            state.fetch.reserve_next()
        };
        if let Some(next) = next {
            self.dispatch(next);
        }
    }

    /// Start a queue-driven fetch whose slot is already reserved.
    fn dispatch(self: &Arc<Self>, path: String) {
        let request = self.request(&path, false);
        match self.factory.create(&request) {
            Some(reader) => {
                self.store.lock().fetch.last_canceled = false;
                debug!(path = %path, "starting listing fetch");
                self.spawn(request, reader);
            }
            None => {
                let dropped = {
                    let mut state = self.store.lock();
                    state.fetch.active = state.fetch.active.saturating_sub(1);
                    state.fetch.scheduled.remove(&path);
                    state.fetch.last_canceled = true;
                    state.fetch.drop_pending()
                };
                warn!(path = %path, dropped, "listing fetch declined; dropped pending fetches");
            }
        }
    }

    /// Start a queue-bypassing recursive fetch.
    fn start_recursive(self: &Arc<Self>, path: &str) {
        if !self.store.lock().fetch.scheduled.insert(path.to_string()) {
            debug!(path = %path, "recursive fetch already scheduled");
            return;
        }
        let request = self.request(path, true);
        match self.factory.create(&request) {
            Some(reader) => {
                self.store.lock().fetch.last_canceled = false;
                debug!(path = %path, "starting recursive listing fetch");
                self.spawn(request, reader);
            }
            None => {
                let dropped = {
                    let mut state = self.store.lock();
                    state.fetch.scheduled.remove(path);
                    state.fetch.last_canceled = true;
                    state.fetch.drop_pending()
                };
                warn!(path = %path, dropped, "recursive fetch declined; dropped pending fetches");
            }
        }
    }

    /// Run `reader` on a worker thread and route its result to the
    /// matching completion handler.
    fn spawn(self: &Arc<Self>, request: FetchRequest, reader: Box<dyn ListingReader>) {
        let this = Arc::clone(self);
        let generation = self.store.lock().fetch.generation;
        self.runtime.spawn_blocking(move || {
            let listing = reader.read();
            let success = listing.success();
            if request.recursive {
                let tree = listing.into_tree(&request.path);
                this.on_recursive_listing_complete(generation, &request.path, tree, success);
            } else {
                this.on_listing_complete(generation, &request.path, listing.into_records(), success);
            }
        });
    }

    /// Completion of a queue-driven fetch.
    ///
    /// A successful listing is persisted and merged. A failure leaves the
    /// placeholder unloaded and drops every other queued fetch. Either way
    /// views are notified and the next queued fetch starts. A result from
    /// before the last teardown is discarded.
    pub fn on_listing_complete(
        self: &Arc<Self>,
        generation: u64,
        path: &str,
        records: Vec<Record>,
        success: bool,
    ) {
        if self.is_stale(generation) {
            debug!(path = %path, "discarding listing fetched before teardown");
        } else if success {
            self.store.persist(path, &records);
            let dir = build_dir_entry(path, &records, self.store.parser());
            let entries = dir.children.len();
            self.store.merge(path, dir);
            info!(path = %path, entries, "listing fetched");
        } else {
            warn!(path = %path, "listing fetch failed");
        }

        self.notifier.notify_changed(path, false);

        let next = {
            let mut state = self.store.lock();
            state.fetch.active = state.fetch.active.saturating_sub(1);
            state.fetch.scheduled.remove(path);
            if !success {
                let dropped = state.fetch.drop_pending();
                if dropped > 0 {
                    warn!(path = %path, dropped, "dropped pending fetches after failure");
                }
            }
            state.fetch.reserve_next()
        };
        if let Some(next) = next {
            self.dispatch(next);
        }
    }

    /// Completion of a recursive fetch. Persists and merges every directory
    /// of the subtree parents first, re-applies the local overlay across it,
    /// and notifies views recursively. Does not touch the fetch queue.
    pub fn on_recursive_listing_complete(
        self: &Arc<Self>,
        generation: u64,
        path: &str,
        root: DirectoryContainer,
        success: bool,
    ) {
        if self.is_stale(generation) {
            debug!(path = %path, "discarding recursive listing fetched before teardown");
        } else if success {
            let nodes = root.walk();
            for node in &nodes {
                self.store.persist(node.path(), node.records());
                let dir = build_dir_entry(node.path(), node.records(), self.store.parser());
                self.store.merge(node.path(), dir);
            }

            let keys = self.store.lock().index.keys_under(path);
            let scans = self.overlay.scan_subtree(&keys);
            self.overlay
                .apply_subtree(&mut self.store.lock().index, &scans);
            info!(path = %path, directories = nodes.len(), "recursive listing fetched");
        } else {
            warn!(path = %path, "recursive listing fetch failed");
        }

        self.notifier.notify_changed(path, true);
        self.store.lock().fetch.scheduled.remove(path);
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.store.lock().fetch.generation != generation
    }

    /// Queue-driven fetches currently in flight.
    pub fn active_fetches(&self) -> usize {
        self.store.lock().fetch.active
    }

    /// Paths waiting in the fetch queue, oldest first.
    pub fn pending_paths(&self) -> Vec<String> {
        self.store.lock().fetch.pending.iter().cloned().collect()
    }

    /// True if the last attempt to start a fetch was declined.
    pub fn last_fetch_canceled(&self) -> bool {
        self.store.lock().fetch.last_canceled
    }

    /// True if `path` is queued or being fetched.
    pub fn is_scheduled(&self, path: &str) -> bool {
        self.store.lock().fetch.scheduled.contains(path)
    }
}
