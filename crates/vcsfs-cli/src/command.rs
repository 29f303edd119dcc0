//! Listing reader that runs an external VCS listing program.
//!
//! The program is invoked as `program args.. <path>` in the working
//! directory; every non-blank stdout line is one record whose fields are
//! separated by the configured delimiter. The root directory is passed as
//! `.`.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, warn};
use vcsfs_cache::{
    DirectoryContainer, FetchRequest, Listing, ListingReader, Record, ReaderFactory, RecordParser,
};
use vcsfs_core::config::ReaderConfig;
use vcsfs_core::path::join;
use vcsfs_core::{VcsfsError, VcsfsResult};

pub struct CommandReaderFactory {
    config: ReaderConfig,
    parser: Arc<dyn RecordParser>,
}

impl CommandReaderFactory {
    /// `parser` tells directory records apart when walking a subtree.
    pub fn new(config: ReaderConfig, parser: Arc<dyn RecordParser>) -> Self {
        CommandReaderFactory { config, parser }
    }
}

impl ReaderFactory for CommandReaderFactory {
    fn create(&self, request: &FetchRequest) -> Option<Box<dyn ListingReader>> {
        Some(Box::new(CommandReader {
            config: self.config.clone(),
            parser: Arc::clone(&self.parser),
            request: request.clone(),
        }))
    }
}

struct CommandReader {
    config: ReaderConfig,
    parser: Arc<dyn RecordParser>,
    request: FetchRequest,
}

impl ListingReader for CommandReader {
    fn read(self: Box<Self>) -> Listing {
        if self.request.recursive {
            let (root, success) = self.walk();
            return Listing::Tree { root, success };
        }
        match self.list(&self.request.path) {
            Ok(records) => Listing::Flat {
                records,
                success: true,
            },
            Err(e) => {
                warn!(path = %self.request.path, "listing command failed: {e}");
                Listing::failed()
            }
        }
    }
}

impl CommandReader {
    /// Run the listing program for one directory.
    fn list(&self, path: &str) -> VcsfsResult<Vec<Record>> {
        let target = if path.is_empty() { "." } else { path };
        debug!(program = %self.config.program, path = %target, "running listing command");

        let output = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(target)
            .current_dir(self.working_dir())
            .output()
            .map_err(|e| VcsfsError::Reader(format!("spawning {}: {e}", self.config.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcsfsError::Reader(format!(
                "{} {target} exited with {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(split_records(&stdout, &self.config.delimiter))
    }

    /// List the requested directory and every directory beneath it,
    /// depth-first. Stops at the first failing directory.
    fn walk(&self) -> (DirectoryContainer, bool) {
        let base = self.request.path.clone();
        let mut root = DirectoryContainer::new(base.as_str());
        let mut stack = vec![base];

        while let Some(dir) = stack.pop() {
            let records = match self.list(&dir) {
                Ok(records) => records,
                Err(e) => {
                    warn!(path = %dir, "recursive listing failed: {e}");
                    return (root, false);
                }
            };

            let mut subdirs: Vec<String> = records
                .iter()
                .filter_map(|r| self.parser.parse(r))
                .filter(|e| e.is_dir())
                .map(|e| join(&dir, &e.name))
                .collect();
            // popped in listing order
            subdirs.reverse();
            stack.extend(subdirs);

            if let Some(node) = root.descendant_or_insert(&dir) {
                node.set_records(records);
            }
        }
        debug!(path = %self.request.path, directories = root.len(), "recursive listing done");
        (root, true)
    }

    fn working_dir(&self) -> PathBuf {
        self.request.root.clone()
    }
}

/// Split program output into records. Blank lines are dropped and a
/// trailing delimiter does not produce an empty last field.
pub fn split_records(output: &str, delimiter: &str) -> Vec<Record> {
    output
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let body = l.strip_suffix(delimiter).unwrap_or(l);
            body.split(delimiter).map(|f| f.trim().to_string()).collect()
        })
        .collect()
}
