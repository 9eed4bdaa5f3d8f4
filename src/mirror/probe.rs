//! Read-only inspection of a local mirror.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

use super::git::{self, GitError};
use crate::version::max_version;

/// Where a mirror stands relative to the index entry that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorState {
    /// No mirror directory.
    Absent,
    /// Directory exists but its history cannot be read.
    Invalid,
    /// Readable, but behind the declared versions.
    Stale,
    /// Readable and holds a tag at least as new as the newest declared version.
    Complete,
}

pub fn exists(mirror_dir: &Path) -> bool {
    mirror_dir.exists()
}

/// Tag names currently present in the mirror.
pub fn tags(mirror_dir: &Path) -> Result<BTreeSet<String>, GitError> {
    let repo = git::open_repository(mirror_dir)?;
    git::list_tags(&repo)
}

/// Does the newest local tag reach the newest declared version?
///
/// No tags at all, or no parseable version on either side, counts as
/// incomplete so the caller attempts a sync instead of skipping.
pub fn is_complete<T, D>(tags: T, declared: D) -> bool
where
    T: IntoIterator,
    T::Item: AsRef<str>,
    D: IntoIterator,
    D::Item: AsRef<str>,
{
    match (max_version(tags), max_version(declared)) {
        (Ok(local), Ok(wanted)) => local >= wanted,
        _ => false,
    }
}

/// Classify the mirror at `mirror_dir` against `declared` versions.
pub fn inspect(mirror_dir: &Path, declared: &BTreeSet<String>) -> MirrorState {
    if !exists(mirror_dir) {
        return MirrorState::Absent;
    }
    if !git::is_structurally_valid(mirror_dir) {
        return MirrorState::Invalid;
    }

    match tags(mirror_dir) {
        Ok(tags) if is_complete(&tags, declared) => MirrorState::Complete,
        Ok(_) => MirrorState::Stale,
        Err(e) => {
            log::debug!("reading tags in {} failed: {}", mirror_dir.display(), e);
            MirrorState::Stale
        }
    }
}

/// Is `info/refs` missing, or older than the mirror's ref store?
///
/// Compares against `packed-refs` and everything under `refs/`, so a refresh
/// that was skipped or failed on an earlier run is picked up later.
pub fn server_info_stale(mirror_dir: &Path) -> bool {
    let advertised = match modified(&mirror_dir.join("info").join("refs")) {
        Some(time) => time,
        None => return true,
    };

    let mut newest = modified(&mirror_dir.join("packed-refs"));
    let mut pending = vec![mirror_dir.join("refs")];
    while let Some(dir) = pending.pop() {
        newest = newest.max(modified(&dir));
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                newest = newest.max(modified(&path));
            }
        }
    }

    newest.is_some_and(|refs| refs > advertised)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
