//! Mirror synchronizer.
//!
//! Decides per package whether to clone, fetch, recover or leave a mirror
//! alone:
//!
//! | state    | remote      | action                          |
//! |----------|-------------|---------------------------------|
//! | Absent   | reachable   | clone                           |
//! | Absent   | unreachable | nothing                         |
//! | Invalid  | any         | confined delete, then as Absent |
//! | Stale    | reachable   | fetch with prune                |
//! | Stale    | unreachable | nothing                         |
//! | Complete | any         | nothing                         |

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::git::{GitCli, GitError};
use super::paths::{ConfinementViolation, MirrorPaths, RemoveError};
use super::probe::{self, MirrorState};
use crate::http::RemoteProbe;
use crate::types::PackageName;

#[derive(Error, Debug)]
pub enum SyncError {
    /// A delete target escaped the mirror root. Fatal for the whole run.
    #[error(transparent)]
    Confinement(#[from] ConfinementViolation),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RemoveError> for SyncError {
    fn from(err: RemoveError) -> Self {
        match err {
            RemoveError::Confinement(v) => SyncError::Confinement(v),
            RemoveError::Io(e) => SyncError::Io(e),
        }
    }
}

/// What a sync pass did to one mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Already complete; nothing touched.
    UpToDate,
    /// First clone.
    Cloned,
    /// Existing mirror fetched.
    Fetched,
    /// Corrupt mirror deleted and cloned again.
    Recovered,
    /// Remote not reachable this run. `mirrored` says whether an older
    /// mirror is still on disk.
    Unreachable { mirrored: bool },
    /// Corrupt mirror deleted, but the remote was not reachable to reclone.
    Discarded,
}

impl SyncOutcome {
    /// Did this pass change the repository's refs?
    pub fn changed_refs(self) -> bool {
        matches!(self, Self::Cloned | Self::Fetched | Self::Recovered)
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpToDate => write!(f, "up to date"),
            Self::Cloned => write!(f, "cloned"),
            Self::Fetched => write!(f, "fetched"),
            Self::Recovered => write!(f, "recovered from corruption"),
            Self::Unreachable { mirrored: true } => write!(f, "remote unreachable, kept mirror"),
            Self::Unreachable { mirrored: false } => write!(f, "remote unreachable"),
            Self::Discarded => write!(f, "corrupt mirror removed, remote unreachable"),
        }
    }
}

/// Brings one package's mirror up to date with its remote.
pub struct Synchronizer {
    paths: MirrorPaths,
    git: GitCli,
    probe: Arc<dyn RemoteProbe>,
    remote_base: String,
}

impl Synchronizer {
    pub fn new(
        paths: MirrorPaths,
        git: GitCli,
        probe: Arc<dyn RemoteProbe>,
        remote_base: impl Into<String>,
    ) -> Self {
        Self {
            paths,
            git,
            probe,
            remote_base: remote_base.into(),
        }
    }

    /// Run one state-machine step for `name`.
    ///
    /// Network unavailability is never an error here; only git/IO failures
    /// and confinement violations are.
    pub fn sync(
        &self,
        name: &PackageName,
        declared: &BTreeSet<String>,
    ) -> Result<SyncOutcome, SyncError> {
        let mirror_dir = self.paths.mirror_dir(name);
        let url = name.remote_url(&self.remote_base);

        match probe::inspect(&mirror_dir, declared) {
            MirrorState::Complete => {
                log::debug!("Package {} is not in need of an update", name);
                Ok(SyncOutcome::UpToDate)
            }
            MirrorState::Stale => {
                if !self.probe.is_available(&url) {
                    log::warn!("Package {} is behind but {} is unreachable", name, url);
                    return Ok(SyncOutcome::Unreachable { mirrored: true });
                }
                log::info!("Updating package {}...", name);
                self.git.fetch_prune(&mirror_dir)?;
                Ok(SyncOutcome::Fetched)
            }
            MirrorState::Absent => self.clone_fresh(name, &url),
            MirrorState::Invalid => {
                log::warn!(
                    "Invalid git repo in {}. Removing and trying again...",
                    mirror_dir.display()
                );
                self.paths.remove_path(&mirror_dir)?;
                match self.clone_fresh(name, &url)? {
                    SyncOutcome::Cloned => Ok(SyncOutcome::Recovered),
                    SyncOutcome::Unreachable { .. } => Ok(SyncOutcome::Discarded),
                    other => Ok(other),
                }
            }
        }
    }

    fn clone_fresh(&self, name: &PackageName, url: &str) -> Result<SyncOutcome, SyncError> {
        if !self.probe.is_available(url) {
            return Ok(SyncOutcome::Unreachable { mirrored: false });
        }

        log::info!("Initial mirror of package {}...", name);
        let mirror_dir = self.paths.mirror_dir(name);
        if let Err(err) = self.git.clone_mirror(url, &mirror_dir) {
            // Do not leave a half-written mirror for the next run to trip over.
            self.paths.remove_path(&mirror_dir)?;
            return Err(err.into());
        }
        Ok(SyncOutcome::Cloned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::git;
    use crate::mirror::testutil::{SourceRepo, StaticProbe, file_remote_base, git_available};
    use std::path::Path;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        dir: TempDir,
        remotes: std::path::PathBuf,
        paths: MirrorPaths,
        name: PackageName,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let remotes = dir.path().join("remotes");
            let paths = MirrorPaths::new(dir.path().join("mirror"));
            std::fs::create_dir_all(paths.root()).unwrap();
            Self {
                remotes,
                paths,
                name: "acme/widget".parse().unwrap(),
                dir,
            }
        }

        fn source(&self) -> SourceRepo {
            SourceRepo::init(&self.remotes.join("acme").join("widget"))
        }

        fn synchronizer(&self, probe: Arc<dyn RemoteProbe>) -> Synchronizer {
            Synchronizer::new(
                self.paths.clone(),
                GitCli::new(),
                probe,
                file_remote_base(&self.remotes),
            )
        }

        fn mirror(&self) -> std::path::PathBuf {
            self.paths.mirror_dir(&self.name)
        }
    }

    fn versions(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn tags_of(path: &Path) -> BTreeSet<String> {
        probe::tags(path).unwrap()
    }

    #[test]
    fn absent_and_unreachable_is_noop() {
        let fx = Fixture::new();
        let probe = Arc::new(StaticProbe::unreachable());
        let sync = fx.synchronizer(probe.clone());

        let outcome = sync.sync(&fx.name, &versions(&["1.0.0"])).unwrap();

        assert_eq!(outcome, SyncOutcome::Unreachable { mirrored: false });
        assert!(!fx.mirror().exists());
        assert_eq!(probe.calls(), 1);
    }

    #[test]
    fn absent_and_reachable_clones() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        fx.source().commit_and_tag(&[("elm.json", "{}")], "1.0.0");
        let sync = fx.synchronizer(Arc::new(StaticProbe::reachable()));

        let outcome = sync.sync(&fx.name, &versions(&["1.0.0"])).unwrap();

        assert_eq!(outcome, SyncOutcome::Cloned);
        assert!(git::is_structurally_valid(&fx.mirror()));
        assert_eq!(tags_of(&fx.mirror()), versions(&["1.0.0"]));
    }

    #[test]
    fn complete_mirror_is_left_alone_without_probing() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        fx.source().commit_and_tag(&[("elm.json", "{}")], "1.0.0");
        fx.synchronizer(Arc::new(StaticProbe::reachable()))
            .sync(&fx.name, &versions(&["1.0.0"]))
            .unwrap();

        let probe = Arc::new(StaticProbe::reachable());
        let outcome = fx
            .synchronizer(probe.clone())
            .sync(&fx.name, &versions(&["1.0.0"]))
            .unwrap();

        assert_eq!(outcome, SyncOutcome::UpToDate);
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn stale_mirror_is_fetched() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        let source = fx.source();
        source.commit_and_tag(&[("elm.json", "{}")], "1.0.0");
        let sync = fx.synchronizer(Arc::new(StaticProbe::reachable()));
        sync.sync(&fx.name, &versions(&["1.0.0"])).unwrap();

        source.commit_and_tag(&[("elm.json", "{\"x\":1}")], "1.1.0");
        let outcome = sync.sync(&fx.name, &versions(&["1.0.0", "1.1.0"])).unwrap();

        assert_eq!(outcome, SyncOutcome::Fetched);
        assert_eq!(tags_of(&fx.mirror()), versions(&["1.0.0", "1.1.0"]));
    }

    #[test]
    fn stale_and_unreachable_keeps_mirror() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        fx.source().commit_and_tag(&[("elm.json", "{}")], "1.0.0");
        fx.synchronizer(Arc::new(StaticProbe::reachable()))
            .sync(&fx.name, &versions(&["1.0.0"]))
            .unwrap();

        let outcome = fx
            .synchronizer(Arc::new(StaticProbe::unreachable()))
            .sync(&fx.name, &versions(&["1.0.0", "2.0.0"]))
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Unreachable { mirrored: true });
        assert!(git::is_structurally_valid(&fx.mirror()));
    }

    #[test]
    fn invalid_mirror_is_recovered() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        fx.source().commit_and_tag(&[("elm.json", "{}")], "1.0.0");
        std::fs::create_dir_all(fx.mirror()).unwrap();
        std::fs::write(fx.mirror().join("HEAD"), b"garbage").unwrap();

        let outcome = fx
            .synchronizer(Arc::new(StaticProbe::reachable()))
            .sync(&fx.name, &versions(&["1.0.0"]))
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Recovered);
        assert!(git::is_structurally_valid(&fx.mirror()));
    }

    #[test]
    fn invalid_mirror_with_unreachable_remote_is_discarded() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.mirror()).unwrap();
        std::fs::write(fx.mirror().join("HEAD"), b"garbage").unwrap();

        let outcome = fx
            .synchronizer(Arc::new(StaticProbe::unreachable()))
            .sync(&fx.name, &versions(&["1.0.0"]))
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Discarded);
        assert!(!fx.mirror().exists());
    }

    #[test]
    #[cfg(unix)]
    fn invalid_mirror_escaping_root_is_fatal() {
        let fx = Fixture::new();
        let outside = fx.dir.path().join("precious");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("HEAD"), b"garbage").unwrap();
        std::fs::create_dir_all(fx.paths.owner_dir(&fx.name)).unwrap();
        std::os::unix::fs::symlink(&outside, fx.mirror()).unwrap();

        let result = fx
            .synchronizer(Arc::new(StaticProbe::reachable()))
            .sync(&fx.name, &versions(&["1.0.0"]));

        assert!(matches!(result, Err(SyncError::Confinement(_))));
        assert!(outside.join("HEAD").exists());
    }

    #[test]
    fn failed_clone_leaves_no_directory() {
        if !git_available() {
            return;
        }
        let fx = Fixture::new();
        // Reachable according to the probe, but nothing to clone.
        let outcome = fx
            .synchronizer(Arc::new(StaticProbe::reachable()))
            .sync(&fx.name, &versions(&["1.0.0"]));

        assert!(matches!(outcome, Err(SyncError::Git(GitError::CloneError(_)))));
        assert!(!fx.mirror().exists());
    }
}
