//! Mirror root layout and the confined delete.
//!
//! ```text
//! <root>/
//! ├── all-packages                   # raw index snapshot
//! ├── index.html                     # generated listing
//! ├── .locks/
//! │   └── <owner>__<repo>.lock       # flock-based locking
//! └── <owner>/
//!     └── <repo>/                    # bare mirror
//!         ├── zipball/<version>      # release archive
//!         └── descriptions/<version> # manifest
//! ```
//!
//! Every recursive delete in the crate goes through [`MirrorPaths::remove_path`].

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::types::PackageName;

/// A delete target resolved outside the mirror root.
///
/// This is a logic defect, never bad input, and must abort the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("refusing to delete {}: not inside mirror root {}", target.display(), root.display())]
pub struct ConfinementViolation {
    pub target: PathBuf,
    pub root: PathBuf,
}

#[derive(Debug, Error)]
pub enum RemoveError {
    #[error(transparent)]
    Confinement(#[from] ConfinementViolation),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Manages all filesystem paths under the mirror root
#[derive(Debug, Clone)]
pub struct MirrorPaths {
    root: PathBuf,
}

impl MirrorPaths {
    /// Creates a new MirrorPaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/all-packages`
    pub fn index_snapshot(&self) -> PathBuf {
        self.root.join("all-packages")
    }

    /// `{root}/index.html`
    pub fn index_html(&self) -> PathBuf {
        self.root.join("index.html")
    }

    /// `{root}/.locks`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join(".locks")
    }

    /// `{root}/.locks/{owner}__{repo}.lock`
    pub fn lock_path(&self, name: &PackageName) -> PathBuf {
        self.locks_dir()
            .join(format!("{}__{}.lock", name.owner.as_str(), name.repo.as_str()))
    }

    /// `{root}/{owner}`
    pub fn owner_dir(&self, name: &PackageName) -> PathBuf {
        self.root.join(name.owner.as_str())
    }

    /// `{root}/{owner}/{repo}`
    pub fn mirror_dir(&self, name: &PackageName) -> PathBuf {
        self.owner_dir(name).join(name.repo.as_str())
    }

    /// `{root}/{owner}/{repo}/zipball`
    pub fn zipball_dir(&self, name: &PackageName) -> PathBuf {
        self.mirror_dir(name).join("zipball")
    }

    /// `{root}/{owner}/{repo}/zipball/{version}`
    pub fn zipball(&self, name: &PackageName, version: &str) -> PathBuf {
        self.zipball_dir(name).join(version)
    }

    /// `{root}/{owner}/{repo}/descriptions`
    pub fn descriptions_dir(&self, name: &PackageName) -> PathBuf {
        self.mirror_dir(name).join("descriptions")
    }

    /// `{root}/{owner}/{repo}/descriptions/{version}`
    pub fn description(&self, name: &PackageName, version: &str) -> PathBuf {
        self.descriptions_dir(name).join(version)
    }

    /// Check that `target` resolves to a strict descendant of the root.
    pub fn confine(&self, target: &Path) -> Result<PathBuf, RemoveError> {
        let root = resolve(&self.root)?;
        let resolved = resolve(target)?;

        if resolved != root && resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(ConfinementViolation {
                target: resolved,
                root,
            }
            .into())
        }
    }

    /// Delete a file or directory tree under the root.
    ///
    /// The confinement check runs before anything touches the disk. Returns
    /// `Ok(false)` when there was nothing to delete.
    pub fn remove_path(&self, target: &Path) -> Result<bool, RemoveError> {
        let resolved = self.confine(target)?;

        let metadata = match fs::symlink_metadata(&resolved) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            log::warn!("Deleting '{}'", resolved.display());
            fs::remove_dir_all(&resolved)?;
        } else {
            fs::remove_file(&resolved)?;
        }
        Ok(true)
    }
}

/// Absolute, symlink-free form of `path`, even when it does not exist.
///
/// The deepest existing ancestor is canonicalized and the rest is appended
/// lexically with `.` and `..` folded away.
fn resolve(path: &Path) -> io::Result<PathBuf> {
    let absolute = normalize(&std::path::absolute(path)?);

    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    loop {
        match fs::canonicalize(existing) {
            Ok(canonical) => {
                let mut resolved = canonical;
                for component in rest.iter().rev() {
                    resolved.push(component);
                }
                return Ok(normalize(&resolved));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        rest.push(name.to_os_string());
                    }
                    existing = parent;
                }
                None => return Ok(absolute),
            },
            Err(e) => return Err(e),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
