//! vcsfs: browse a VCS working tree through the listing cache
//!
//! Commands:
//!   ls <path> [--recursive] [--json] [--wait]  - list a directory
//!   refresh <path> [--recursive]               - drop and refetch a listing
//!   config show                                - display current configuration
//!   clear                                      - delete this instance's cache

mod command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use vcsfs_cache::{
    Collaborators, ColumnParser, NeverConfirm, RecordParser, RefreshPrompt, VcsTree, ViewNotifier,
};
use vcsfs_core::config::VcsfsConfig;
use vcsfs_core::{DirEntry, Entry};

use crate::command::CommandReaderFactory;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vcsfs",
    version,
    about = "VCS-backed filesystem listing cache",
    long_about = "vcsfs: list a VCS working tree through a two-tier cache of the VCS tool's directory listings"
)]
struct Cli {
    /// Path to vcsfs.toml configuration file
    #[arg(long, short = 'c', env = "VCSFS_CONFIG", default_value = "vcsfs.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "VCSFS_LOG")]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "VCSFS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List a directory of the VCS tree
    Ls {
        /// VCS path of the directory (default: root)
        path: Option<String>,
        /// Fetch the whole subtree on a cache miss
        #[arg(long, short = 'r')]
        recursive: bool,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
        /// Wait for a scheduled fetch and print the fetched listing
        #[arg(long, short = 'w')]
        wait: bool,
        /// Seconds to wait for a fetch
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },

    /// Drop the cached listing of a directory and fetch it again
    Refresh {
        /// VCS path of the directory (default: root)
        path: Option<String>,
        /// Refetch the whole subtree
        #[arg(long, short = 'r')]
        recursive: bool,
        /// Seconds to wait for the fetch
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Delete every cached listing of this instance
    Clear,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = VcsfsConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !cli.config.exists() {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "vcsfs starting"
    );

    match cli.command {
        Commands::Ls { path, recursive, json, wait, timeout } => {
            let path = path.unwrap_or_default();
            cmd_ls(&config, &path, recursive, json, wait, Duration::from_secs(timeout)).await
        }
        Commands::Refresh { path, recursive, timeout } => {
            let path = path.unwrap_or_default();
            cmd_refresh(&config, &path, recursive, Duration::from_secs(timeout)).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Clear => cmd_clear(&config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Tree setup ────────────────────────────────────────────────────────────────

type Events = mpsc::UnboundedReceiver<(String, bool)>;

/// Forwards view notifications to the command waiting on a fetch.
struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(String, bool)>,
}

impl ViewNotifier for ChannelNotifier {
    fn notify_changed(&self, path: &str, recursive: bool) {
        debug!(path = %path, recursive, "listing changed");
        let _ = self.tx.send((path.to_string(), recursive));
    }
}

/// Asks on the terminal before the first root listing fetches the whole
/// tree. Declines when stdin is not a terminal.
struct TerminalPrompt;

impl RefreshPrompt for TerminalPrompt {
    fn confirm_recursive(&self, _path: &str) -> bool {
        if !std::io::stdin().is_terminal() {
            return false;
        }
        eprint!("Fetch the status of the whole tree now? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn open_tree(config: &VcsfsConfig) -> Result<(VcsTree, Events)> {
    let parser: Arc<dyn RecordParser> = Arc::new(ColumnParser::new(config.records.clone()));
    let factory = CommandReaderFactory::new(config.reader.clone(), Arc::clone(&parser));
    let (tx, rx) = mpsc::unbounded_channel();

    let prompt: Arc<dyn RefreshPrompt> = if config.fetch.recursive_root_refresh {
        Arc::new(TerminalPrompt)
    } else {
        Arc::new(NeverConfirm)
    };
    let collaborators = Collaborators::new(Arc::new(factory))
        .parser(parser)
        .notifier(Arc::new(ChannelNotifier { tx }))
        .prompt(prompt);

    let tree = VcsTree::new(config, collaborators, Handle::current())
        .context("opening listing cache")?;
    Ok((tree, rx))
}

/// Block until no fetch of `path` is scheduled, logging notifications as
/// they arrive.
async fn wait_for_fetch(tree: &VcsTree, path: &str, events: &mut Events, timeout: Duration) -> Result<()> {
    const POLL: Duration = Duration::from_millis(50);
    let deadline = tokio::time::Instant::now() + timeout;

    while tree.dispatcher().is_scheduled(path) {
        tokio::select! {
            Some((changed, recursive)) = events.recv() => {
                debug!(path = %changed, recursive, "view notified");
            }
            _ = tokio::time::sleep(POLL) => {}
            _ = tokio::time::sleep_until(deadline) => {
                anyhow::bail!("timed out after {}s waiting for the listing of {path:?}", timeout.as_secs());
            }
        }
    }
    Ok(())
}

// ── `vcsfs ls` ────────────────────────────────────────────────────────────────

async fn cmd_ls(
    config: &VcsfsConfig,
    path: &str,
    recursive: bool,
    json: bool,
    wait: bool,
    timeout: Duration,
) -> Result<()> {
    let (tree, mut events) = open_tree(config)?;
    let path = vcsfs_core::path::normalize(path);

    let mut listing = tree.request_listing(&path, recursive);
    if tree.last_fetch_canceled() {
        warn!(path = %path, "fetch was declined; showing cached state only");
    } else if wait && !listing.loaded && !listing.is_local() {
        wait_for_fetch(&tree, &path, &mut events, timeout).await?;
        listing = tree.request_listing(&path, false);
    }

    if json {
        let rendered = serde_json::to_string_pretty(&listing).context("serializing listing")?;
        println!("{rendered}");
    } else {
        print_listing(&listing);
    }
    Ok(())
}

fn print_listing(listing: &DirEntry) {
    let shown = if listing.path.is_empty() { "/" } else { listing.path.as_str() };
    if !listing.loaded && !listing.is_local() {
        println!("{shown}: (not loaded yet; rerun with --wait)");
    } else {
        println!("{shown}:");
    }

    let mut children: Vec<&Entry> = listing.children.iter().collect();
    children.sort_by(|a, b| b.is_dir().cmp(&a.is_dir()).then_with(|| a.name.cmp(&b.name)));
    for entry in children {
        println!("{}", format_entry(entry));
    }
}

fn format_entry(entry: &Entry) -> String {
    let marker = if entry.is_dir() { 'd' } else { '-' };
    let name = if entry.is_dir() {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    };
    let locker = if entry.locker.is_empty() {
        String::new()
    } else {
        format!("  [locked by {}]", entry.locker)
    };
    format!("{marker} {:<20} {:>10} {name}{locker}", entry.status, entry.size)
}

// ── `vcsfs refresh` ───────────────────────────────────────────────────────────

async fn cmd_refresh(config: &VcsfsConfig, path: &str, recursive: bool, timeout: Duration) -> Result<()> {
    let (tree, mut events) = open_tree(config)?;
    let path = vcsfs_core::path::normalize(path);

    tree.refresh(&path, recursive);
    if tree.last_fetch_canceled() {
        anyhow::bail!("refresh of {path:?} was declined");
    }
    wait_for_fetch(&tree, &path, &mut events, timeout).await?;

    let listing = tree.request_listing(&path, false);
    if !listing.loaded {
        anyhow::bail!("fetching {path:?} failed; see the log for the listing command's error");
    }
    info!(path = %path, entries = listing.children.len(), "refreshed");
    println!("refreshed {}: {} entries", if path.is_empty() { "/" } else { path.as_str() }, listing.children.len());
    Ok(())
}

// ── `vcsfs config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &VcsfsConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `vcsfs clear` ─────────────────────────────────────────────────────────────

fn cmd_clear(config: &VcsfsConfig) -> Result<()> {
    let (tree, _events) = open_tree(config)?;
    tree.teardown();
    println!("cleared {}", config.instance_dir().display());
    Ok(())
}
