//! Resolution of untrusted, possibly-virtual request paths against the
//! served root: sanitization, repository discovery and the split into
//! (commit reference, in-repo path).

use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use path_clean::PathClean;

/// Directory entries that mark a directory as a git repository. The
/// check is a case-insensitive superset test on the immediate listing.
pub const REPO_SIGNATURE: [&str; 4] = ["head", "info", "objects", "refs"];

/// Why a request path could not be resolved to a servable resource.
#[derive(Debug)]
pub enum PathError {
    /// The candidate path escapes the served root.
    Escape(String),
    /// The candidate path does not lead to anything viewable: a missing
    /// commit, a missing in-repo entry, an unsupported object type, a
    /// failed archive invocation.
    Unfit(String),
}

impl PathError {
    pub fn unfit(message: impl Into<String>) -> Self {
        Self::Unfit(message.into())
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Escape(msg) | Self::Unfit(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for PathError {}

/// Cleans a relative path candidate and evaluates it against `root`.
///
/// The path does not have to exist on disk, it only has to stay inside
/// `root` once `..`, `.` and duplicate separators are collapsed. The
/// returned path is relative, forward-slash delimited and carries no
/// leading separator.
pub fn sanitize(root: &Path, candidate: &str) -> Result<String, PathError> {
    let trimmed = candidate
        .trim_matches(|c| c == '/' || c == '\\')
        .replace('\\', "/");
    let full = root.join(&trimmed).clean();

    let suffix = full
        .strip_prefix(root)
        .map_err(|_| PathError::Escape(format!("path {candidate:?} is outside of the served root")))?;

    let mut relative = String::new();
    for component in suffix.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    PathError::unfit("path is not representable as unicode")
                })?;
                if !relative.is_empty() {
                    relative.push('/');
                }
                relative.push_str(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(PathError::Escape(format!(
                    "path {candidate:?} is outside of the served root"
                )))
            }
        }
    }

    Ok(relative)
}

/// Returns true when the directory's immediate listing satisfies the
/// repository signature.
pub fn is_repo_dir(path: &Path) -> bool {
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };

    let names: Vec<String> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_lowercase())
        .collect();

    REPO_SIGNATURE
        .iter()
        .all(|marker| names.iter().any(|name| name == marker))
}

/// Walks `relative` prefix-by-prefix from `root` looking for the first
/// prefix that is a repository directory.
///
/// Returns the absolute repository path (when found) and the unconsumed
/// remainder of the path. The walk also stops when a prefix turns out
/// not to be a directory; in that case the offending segment and
/// everything after it are returned as the remainder. The remainder is
/// purely virtual: no part of it needs to exist on disk.
pub fn locate_repo(root: &Path, relative: &str) -> (Option<PathBuf>, String) {
    let segments: Vec<&str> = if relative.is_empty() {
        Vec::new()
    } else {
        relative.split('/').collect()
    };

    let mut current = root.to_path_buf();
    let mut consumed = 0;

    loop {
        if current.is_dir() {
            if is_repo_dir(&current) {
                return (Some(current), segments[consumed..].join("/"));
            }
        } else {
            // mid-walk we hit a file or nothing at all; the rest of the
            // path, including this segment, is virtual
            return (None, segments[consumed.saturating_sub(1)..].join("/"));
        }

        match segments.get(consumed) {
            Some(segment) => {
                current.push(segment);
                consumed += 1;
            }
            None => return (None, String::new()),
        }
    }
}

/// Splits an unconsumed tail into (commit reference, in-repo path).
/// An empty tail selects `HEAD`.
pub fn split_reference(tail: &str) -> (&str, &str) {
    let tail = tail.trim_matches('/');
    if tail.is_empty() {
        return ("HEAD", "");
    }

    match tail.split_once('/') {
        Some((reference, rest)) => (reference, rest),
        None => (tail, ""),
    }
}
