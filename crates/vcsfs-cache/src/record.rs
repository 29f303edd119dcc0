//! Flat listing records — the raw rows a VCS listing produces, and the
//! on-disk `list.txt` line format they are cached in.
//!
//! Line format (UTF-8, one record per line, Unix newlines):
//! ```text
//! Foo.java|file|Status=Up-to-date|
//! bar|dir|Status=Up-to-date|
//! ```
//!
//! Every field is followed by `|`. Literal `|` characters inside a field are
//! not escaped, so such a field splits into two on reload.

use vcsfs_core::config::RecordsConfig;
use vcsfs_core::{DirEntry, Entry, EntryKind};

/// Field delimiter of the record format
pub const FIELD_DELIMITER: char = '|';

/// One listing row: its fields in column order.
pub type Record = Vec<String>;

/// Serialize records to the record file format.
pub fn encode_records(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        for field in record {
            out.push_str(field);
            out.push(FIELD_DELIMITER);
        }
        out.push('\n');
    }
    out
}

/// Split one record line into its fields.
pub fn decode_line(line: &str) -> Record {
    let line = line.trim_end_matches(['\r', '\n']);
    let body = line.strip_suffix(FIELD_DELIMITER).unwrap_or(line);
    if body.is_empty() && line.is_empty() {
        return Vec::new();
    }
    body.split(FIELD_DELIMITER).map(str::to_string).collect()
}

/// Parse a whole record file. Blank lines are dropped.
pub fn decode_records(content: &str) -> Vec<Record> {
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(decode_line)
        .collect()
}

/// Converts one record into an entry. `None` marks a malformed record,
/// which callers skip without aborting the rest of the listing.
pub trait RecordParser: Send + Sync {
    fn parse(&self, fields: &[String]) -> Option<Entry>;
}

/// Record parser driven by a configurable column layout.
#[derive(Debug, Clone)]
pub struct ColumnParser {
    layout: RecordsConfig,
}

impl ColumnParser {
    pub fn new(layout: RecordsConfig) -> Self {
        ColumnParser { layout }
    }

    fn column<'a>(&self, fields: &'a [String], idx: Option<usize>) -> &'a str {
        idx.and_then(|i| fields.get(i)).map(String::as_str).unwrap_or("")
    }
}

impl Default for ColumnParser {
    fn default() -> Self {
        Self::new(RecordsConfig::default())
    }
}

impl RecordParser for ColumnParser {
    fn parse(&self, fields: &[String]) -> Option<Entry> {
        let raw_name = fields.get(self.layout.name)?.trim();
        let marked_dir = {
            let kind = self.column(fields, self.layout.kind).trim();
            !kind.is_empty() && self.layout.dir_markers.iter().any(|m| m == kind)
        };
        let (name, slash_dir) = match raw_name.strip_suffix('/') {
            Some(stripped) => (stripped, true),
            None => (raw_name, false),
        };
        if name.is_empty() || name.contains('/') {
            return None;
        }

        let kind = if marked_dir || slash_dir {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let mut entry = Entry::new(kind, name);
        entry.status = self.column(fields, self.layout.status).to_string();
        entry.locker = self.column(fields, self.layout.locker).to_string();
        entry.size = self.column(fields, self.layout.size).to_string();
        entry.date = self.column(fields, self.layout.date).to_string();
        entry.time = self.column(fields, self.layout.time).to_string();
        entry.attr = self.column(fields, self.layout.attr).to_string();
        Some(entry)
    }
}

/// Build a loaded directory entry for `path` from its listing records.
///
/// Malformed records are skipped; a later record with a duplicate name
/// replaces the earlier one.
pub fn build_dir_entry(path: &str, records: &[Record], parser: &dyn RecordParser) -> DirEntry {
    let mut dir = DirEntry::new(path);
    let mut skipped = 0usize;
    for record in records {
        match parser.parse(record) {
            Some(entry) => dir.upsert_child(entry),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(path = %path, skipped, "skipped malformed listing records");
    }
    dir.loaded = true;
    dir
}
