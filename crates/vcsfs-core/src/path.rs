//! Slash-separated paths relative to the VCS root.
//!
//! Every path in the cache uses `/` regardless of the host separator. The
//! VCS root is the empty string, so `join("", "src")` is `"src"`.

use std::path::{Path, PathBuf};

/// Normalize a caller-supplied path: `\` becomes `/`, leading/trailing and
/// repeated separators are dropped.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a directory path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Split a path into its parent directory and final component.
///
/// `"a/b/c"` → `("a/b", "c")`, `"a"` → `("", "a")`, `""` → `("", "")`.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("", path),
    }
}

/// Final component of a path (empty for the root).
pub fn file_name(path: &str) -> &str {
    split_parent(path).1
}

/// True if `path` equals `prefix` or lies beneath it.
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Move `path` from under `old` to under `new`. Returns `None` when `path`
/// is not within `old`.
pub fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    if !is_within(path, old) {
        return None;
    }
    let rest = path[old.len()..].trim_start_matches('/');
    Some(if rest.is_empty() {
        new.to_string()
    } else {
        join(new, rest)
    })
}

/// Map a slash path onto a host path under `base`.
pub fn to_host(base: &Path, path: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for component in path.split('/').filter(|c| !c.is_empty()) {
        out.push(component);
    }
    out
}
