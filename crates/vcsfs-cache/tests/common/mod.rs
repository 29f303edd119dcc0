//! Fake VCS collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::runtime::Handle;
use vcsfs_cache::{
    Collaborators, DirectoryContainer, FetchRequest, Listing, ListingReader, Record, ReaderFactory,
    RefreshPrompt, VcsTree,
};
use vcsfs_core::config::VcsfsConfig;

pub fn rec(fields: &[&str]) -> Record {
    fields.iter().map(|f| f.to_string()).collect()
}

/// Scripted stand-in for the external VCS listing tool.
#[derive(Default)]
pub struct FakeVcs {
    flat: Mutex<HashMap<String, (Vec<Record>, bool)>>,
    trees: Mutex<HashMap<String, DirectoryContainer>>,
    requests: Mutex<Vec<FetchRequest>>,
    gates: Mutex<HashMap<String, mpsc::Sender<()>>>,
    gated: AtomicBool,
    decline: AtomicBool,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Readers block until `release` is called for their path.
    pub fn gated() -> Arc<Self> {
        let vcs = Self::default();
        vcs.gated.store(true, Ordering::SeqCst);
        Arc::new(vcs)
    }

    pub fn respond(&self, path: &str, records: Vec<Record>) {
        self.flat.lock().unwrap().insert(path.to_string(), (records, true));
    }

    pub fn fail(&self, path: &str) {
        self.flat.lock().unwrap().insert(path.to_string(), (Vec::new(), false));
    }

    pub fn respond_tree(&self, path: &str, tree: DirectoryContainer) {
        self.trees.lock().unwrap().insert(path.to_string(), tree);
    }

    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    pub fn release(&self, path: &str) {
        let gate = self.gates.lock().unwrap().remove(path);
        gate.expect("no reader waiting on this path").send(()).unwrap();
    }

    /// Release every waiting reader and stop gating new ones.
    pub fn release_all(&self) {
        self.gated.store(false, Ordering::SeqCst);
        for (_, gate) in self.gates.lock().unwrap().drain() {
            let _ = gate.send(());
        }
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    pub fn was_requested(&self, path: &str) -> bool {
        self.requests().iter().any(|r| r.path == path)
    }

    /// Readers currently inside `read`.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of readers observed running at once.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ReaderFactory for FakeVcs {
    fn create(&self, request: &FetchRequest) -> Option<Box<dyn ListingReader>> {
        if self.decline.load(Ordering::SeqCst) {
            return None;
        }
        self.requests.lock().unwrap().push(request.clone());

        let listing = if request.recursive {
            let root = self
                .trees
                .lock()
                .unwrap()
                .get(&request.path)
                .cloned()
                .unwrap_or_else(|| DirectoryContainer::new(request.path.as_str()));
            Listing::Tree { root, success: true }
        } else {
            let (records, success) = self
                .flat
                .lock()
                .unwrap()
                .get(&request.path)
                .cloned()
                .unwrap_or((Vec::new(), true));
            Listing::Flat { records, success }
        };

        let gate = if self.gated.load(Ordering::SeqCst) {
            let (tx, rx) = mpsc::channel();
            self.gates.lock().unwrap().insert(request.path.clone(), tx);
            Some(rx)
        } else {
            None
        };

        Some(Box::new(FakeReader {
            listing,
            gate,
            running: Arc::clone(&self.running),
            peak: Arc::clone(&self.peak),
        }))
    }
}

struct FakeReader {
    listing: Listing,
    gate: Option<mpsc::Receiver<()>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ListingReader for FakeReader {
    fn read(self: Box<Self>) -> Listing {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            // bounded so a failed test cannot hang runtime shutdown
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.listing
    }
}

/// Counts prompts and answers with a fixed reply.
pub struct CountingPrompt {
    pub answer: bool,
    pub asked: AtomicUsize,
}

impl RefreshPrompt for CountingPrompt {
    fn confirm_recursive(&self, _path: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

pub type Events = Arc<Mutex<Vec<(String, bool)>>>;

pub struct Fixture {
    pub tmp: TempDir,
    pub config: VcsfsConfig,
    pub vcs: Arc<FakeVcs>,
    pub events: Events,
    pub tree: VcsTree,
}

impl Fixture {
    pub fn new(vcs: Arc<FakeVcs>) -> Self {
        Self::with(vcs, |_| {}, |c| c)
    }

    pub fn with(
        vcs: Arc<FakeVcs>,
        configure: impl FnOnce(&mut VcsfsConfig),
        collaborators: impl FnOnce(Collaborators) -> Collaborators,
    ) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path(), configure);
        Self::open(tmp, config, vcs, collaborators)
    }

    /// A second instance over the same cache and working directories, with
    /// a cold memory tier.
    pub fn reopen(self, vcs: Arc<FakeVcs>) -> Self {
        let Fixture { tmp, config, .. } = self;
        Self::open(tmp, config, vcs, |c| c)
    }

    fn open(
        tmp: TempDir,
        config: VcsfsConfig,
        vcs: Arc<FakeVcs>,
        collaborators: impl FnOnce(Collaborators) -> Collaborators,
    ) -> Self {
        let events: Events = Arc::default();
        let sink = Arc::clone(&events);
        let notifier = move |path: &str, recursive: bool| {
            sink.lock().unwrap().push((path.to_string(), recursive));
        };
        let collab = collaborators(
            Collaborators::new(Arc::clone(&vcs) as Arc<dyn ReaderFactory>).notifier(Arc::new(notifier)),
        );
        let tree = VcsTree::new(&config, collab, Handle::current()).unwrap();
        Fixture {
            tmp,
            config,
            vcs,
            events,
            tree,
        }
    }

    pub fn work_dir(&self) -> PathBuf {
        self.config.root.clone()
    }

    pub fn record_file(&self, path: &str) -> PathBuf {
        self.tree.store().records().file_for(path)
    }

    pub fn events(&self) -> Vec<(String, bool)> {
        self.events.lock().unwrap().clone()
    }

    pub fn notified(&self, path: &str, recursive: bool) -> usize {
        self.events()
            .iter()
            .filter(|(p, r)| p == path && *r == recursive)
            .count()
    }

    /// Wait until no fetch of `path` is queued or running.
    pub async fn settle(&self, path: &str) {
        let dispatcher = Arc::clone(self.tree.dispatcher());
        let path = path.to_string();
        wait_until(move || !dispatcher.is_scheduled(&path)).await;
    }
}

pub fn test_config(base: &Path, configure: impl FnOnce(&mut VcsfsConfig)) -> VcsfsConfig {
    let mut config = VcsfsConfig::default();
    config.root = base.join("work");
    config.cache.cache_dir = base.join("cache");
    config.cache.instance = "test".to_string();
    configure(&mut config);
    std::fs::create_dir_all(&config.root).unwrap();
    config
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
