use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{VcsfsError, VcsfsResult};

/// Top-level configuration (loaded from vcsfs.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsfsConfig {
    /// Local working directory the VCS view mirrors
    pub root: PathBuf,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub overlay: OverlayConfig,
    pub records: RecordsConfig,
    pub reader: ReaderConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding every filesystem instance's record tree
    pub cache_dir: PathBuf,
    /// Per-filesystem subdirectory of `cache_dir`
    pub instance: String,
    /// Name of the record file written into each cached directory
    pub record_file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Offer a recursive refresh the first time the root is listed
    pub recursive_root_refresh: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Status assigned to entries found only on local disk
    pub local_status: String,
    /// Glob patterns for local names that never appear in listings
    pub ignore: Vec<String>,
    /// VCS metadata directories hidden from listings
    pub vcs_dirs: Vec<String>,
}

/// Column positions of each field in a listing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    pub name: usize,
    pub kind: Option<usize>,
    pub status: Option<usize>,
    pub locker: Option<usize>,
    pub size: Option<usize>,
    pub date: Option<usize>,
    pub time: Option<usize>,
    pub attr: Option<usize>,
    /// Values of the `kind` column that mark a directory
    pub dir_markers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// VCS listing program; the directory path is appended as the last argument
    pub program: String,
    pub args: Vec<String>,
    /// Field separator in the program's output
    pub delimiter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl VcsfsConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> VcsfsResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: VcsfsConfig = toml::from_str(&content)
            .map_err(|e| VcsfsError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the cache cannot work with.
    pub fn validate(&self) -> VcsfsResult<()> {
        if self.cache.record_file.is_empty() || self.cache.record_file.contains(['/', '\\']) {
            return Err(VcsfsError::Config(format!(
                "cache.record_file must be a plain file name, got {:?}",
                self.cache.record_file
            )));
        }
        if self.cache.instance.contains(['/', '\\']) {
            return Err(VcsfsError::Config(format!(
                "cache.instance must not contain separators, got {:?}",
                self.cache.instance
            )));
        }
        if self.reader.delimiter.is_empty() {
            return Err(VcsfsError::Config("reader.delimiter must not be empty".into()));
        }
        if self.overlay.ignore.iter().any(|p| p.is_empty()) {
            return Err(VcsfsError::Config("overlay.ignore contains an empty pattern".into()));
        }
        Ok(())
    }

    /// On-disk record root for this filesystem instance.
    pub fn instance_dir(&self) -> PathBuf {
        expand_tilde(&self.cache.cache_dir).join(&self.cache.instance)
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}

impl Default for VcsfsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            overlay: OverlayConfig::default(),
            records: RecordsConfig::default(),
            reader: ReaderConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("~/.cache/vcsfs"),
            instance: "default".into(),
            record_file: "list.txt".into(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            local_status: "Local".into(),
            ignore: Vec::new(),
            vcs_dirs: vec!["CVS".into(), ".svn".into(), ".git".into()],
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            name: 0,
            kind: Some(1),
            status: Some(2),
            locker: None,
            size: None,
            date: None,
            time: None,
            attr: None,
            dir_markers: vec!["dir".into()],
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            program: "cvs-list".into(),
            args: Vec::new(),
            delimiter: "|".into(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
root = "/work/project"

[cache]
cache_dir = "/var/cache/vcsfs"
instance = "project"
record_file = "listing.txt"

[fetch]
recursive_root_refresh = true

[overlay]
local_status = "Local only"
ignore = ["*.class", "target"]
vcs_dirs = ["CVS"]

[records]
name = 1
kind = 0
status = 2
locker = 3
dir_markers = ["D"]

[reader]
program = "svn-ls"
args = ["--porcelain"]
delimiter = ";"

[log]
level = "debug"
format = "json"
"#;
        let config: VcsfsConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.root, PathBuf::from("/work/project"));
        assert_eq!(config.cache.record_file, "listing.txt");
        assert!(config.fetch.recursive_root_refresh);
        assert_eq!(config.overlay.ignore, vec!["*.class", "target"]);
        assert_eq!(config.records.name, 1);
        assert_eq!(config.records.locker, Some(3));
        assert_eq!(config.records.dir_markers, vec!["D"]);
        assert_eq!(config.reader.delimiter, ";");
        assert_eq!(config.log.format, "json");
        assert_eq!(
            config.instance_dir(),
            PathBuf::from("/var/cache/vcsfs").join("project")
        );
    }

    #[test]
    fn test_parse_defaults() {
        let config: VcsfsConfig = toml::from_str("").unwrap();

        assert_eq!(config.cache.record_file, "list.txt");
        assert_eq!(config.cache.instance, "default");
        assert!(!config.fetch.recursive_root_refresh);
        assert_eq!(config.overlay.local_status, "Local");
        assert_eq!(config.records.kind, Some(1));
        assert_eq!(config.reader.delimiter, "|");
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_record_file_with_separator() {
        let mut config = VcsfsConfig::default();
        config.cache.record_file = "a/list.txt".into();
        assert!(matches!(config.validate(), Err(VcsfsError::Config(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VcsfsConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cache.record_file, "list.txt");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vcsfs.toml");
        std::fs::write(&path, "[cache]\ninstance = \"work\"\n").unwrap();
        let config = VcsfsConfig::load(&path).unwrap();
        assert_eq!(config.cache.instance, "work");
        assert_eq!(config.overlay.local_status, "Local");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = VcsfsConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: VcsfsConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.cache.cache_dir, parsed.cache.cache_dir);
        assert_eq!(config.records, parsed.records);
    }
}
