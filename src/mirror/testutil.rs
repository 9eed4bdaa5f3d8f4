//! Fixtures shared by the mirror tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use git2::{Oid, Repository, Signature, Time};

use super::GitCli;
use crate::http::RemoteProbe;

/// Whether the git CLI can be used; prints a skip notice otherwise.
pub fn git_available() -> bool {
    if GitCli::new().is_available() {
        true
    } else {
        eprintln!("skipping test: git binary not found");
        false
    }
}

/// A non-bare "upstream" repository built with libgit2.
///
/// Commits use a fixed signature and timestamp so ids are reproducible.
pub struct SourceRepo {
    repo: Repository,
    workdir: PathBuf,
}

impl SourceRepo {
    pub fn init(path: &Path) -> Self {
        fs::create_dir_all(path).unwrap();
        let repo = Repository::init(path).unwrap();
        Self {
            repo,
            workdir: path.to_path_buf(),
        }
    }

    fn signature() -> Signature<'static> {
        Signature::new("Fixture", "fixture@example.com", &Time::new(1_700_000_000, 0)).unwrap()
    }

    /// Write `files`, commit them on HEAD and add a lightweight tag.
    pub fn commit_and_tag(&self, files: &[(&str, &str)], tag: &str) -> Oid {
        let mut index = self.repo.index().unwrap();
        for (path, content) in files {
            let full = self.workdir.join(path);
            if let Some(parent) = full.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&full, content).unwrap();
            index.add_path(Path::new(path)).unwrap();
        }
        index.write().unwrap();

        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let sig = Self::signature();
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, tag, &tree, &parents)
            .unwrap();

        let object = self.repo.find_object(oid, None).unwrap();
        self.repo.tag_lightweight(tag, &object, false).unwrap();
        oid
    }

    /// Annotated tag on the current HEAD commit.
    pub fn annotated_tag(&self, tag: &str, message: &str) {
        let head = self.repo.head().unwrap().peel_to_commit().unwrap();
        self.repo
            .tag(tag, head.as_object(), &Self::signature(), message, false)
            .unwrap();
    }

    /// Lightweight tag pointing straight at a blob instead of a commit.
    pub fn blob_tag(&self, tag: &str, content: &str) {
        let oid = self.repo.blob(content.as_bytes()).unwrap();
        let object = self.repo.find_object(oid, None).unwrap();
        self.repo.tag_lightweight(tag, &object, false).unwrap();
    }

    pub fn delete_tag(&self, tag: &str) {
        self.repo.tag_delete(tag).unwrap();
    }
}

/// Probe with a fixed answer that counts how often it was asked.
pub struct StaticProbe {
    available: bool,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn reachable() -> Self {
        Self {
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            available: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RemoteProbe for StaticProbe {
    fn is_available(&self, _url: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.available
    }
}

/// `file://` base URL whose `{base}/{owner}/{repo}` is a directory under `dir`.
pub fn file_remote_base(dir: &Path) -> String {
    format!("file://{}", dir.display())
}
