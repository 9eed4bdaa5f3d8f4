//! The strictly ordered per-package pipeline:
//! validate, lock, synchronize, extract, refresh ref advertisement.

use std::sync::Arc;
use std::time::Duration;

use super::report::{Operation, PackageOutcome};
use crate::http::RemoteProbe;
use crate::index::PackageRecord;
use crate::mirror::lock::DEFAULT_LOCK_TIMEOUT;
use crate::mirror::probe;
use crate::mirror::{
    ArtifactReport, ConfinementViolation, ExtractError, Extractor, GitCli, GitError, MirrorPaths,
    PackageLock, SyncError, SyncOutcome, Synchronizer,
};
use crate::types::PackageName;

pub struct Pipeline {
    paths: MirrorPaths,
    git: GitCli,
    synchronizer: Synchronizer,
    extractor: Extractor,
    lock_timeout: Duration,
}

impl Pipeline {
    pub fn new(paths: MirrorPaths, probe: Arc<dyn RemoteProbe>, remote_base: &str) -> Self {
        let git = GitCli::new();
        Self {
            synchronizer: Synchronizer::new(paths.clone(), git.clone(), probe, remote_base),
            extractor: Extractor::new(paths.clone(), git.clone()),
            paths,
            git,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn paths(&self) -> &MirrorPaths {
        &self.paths
    }

    /// Run every step for one index entry.
    ///
    /// Only a confinement violation is returned as an error; everything else
    /// becomes a [`PackageOutcome`].
    pub fn mirror_package(
        &self,
        record: &PackageRecord,
    ) -> Result<PackageOutcome, ConfinementViolation> {
        let name = match record.package_name() {
            Ok(name) => name,
            Err(e) => {
                log::warn!("Skipping invalid package name {:?}: {}", record.name, e);
                return Ok(PackageOutcome::SkippedInvalidName {
                    reason: e.to_string(),
                });
            }
        };

        let _lock = match self.lock(&name) {
            Ok(lock) => lock,
            Err(e) => return Ok(failed(&name, Operation::Lock, e)),
        };

        let sync = match self.synchronizer.sync(&name, &record.versions) {
            Ok(sync) => sync,
            Err(SyncError::Confinement(violation)) => return Err(violation),
            Err(SyncError::Git(e)) => return Ok(failed(&name, git_operation(&e), e)),
            Err(e) => return Ok(failed(&name, Operation::Sync, e)),
        };

        if matches!(
            sync,
            SyncOutcome::Unreachable { mirrored: false } | SyncOutcome::Discarded
        ) {
            return Ok(PackageOutcome::Synced {
                sync,
                artifacts: ArtifactReport::default(),
            });
        }

        let extracted = match self.extractor.extract(&name, &record.versions) {
            Err(ExtractError::Confinement(violation)) => return Err(violation),
            other => other,
        };

        // The advertisement follows the refs, so it is refreshed whether or
        // not every artifact could be written.
        let mirror_dir = self.paths.mirror_dir(&name);
        let refreshed = if sync.changed_refs() || probe::server_info_stale(&mirror_dir) {
            self.git.update_server_info(&mirror_dir)
        } else {
            Ok(())
        };

        let artifacts = match extracted {
            Ok(artifacts) => artifacts,
            Err(e) => {
                if let Err(refresh) = refreshed {
                    log::error!("Error refreshing ref advertisement for {}: {}", name, refresh);
                }
                return Ok(failed(&name, Operation::Extract, e));
            }
        };
        if let Err(e) = refreshed {
            return Ok(failed(&name, Operation::ServerInfo, e));
        }

        Ok(PackageOutcome::Synced { sync, artifacts })
    }

    fn lock(&self, name: &PackageName) -> std::io::Result<PackageLock> {
        let lock_path = self.paths.lock_path(name);
        if let Some(lock) = PackageLock::try_acquire(&lock_path)? {
            return Ok(lock);
        }
        log::info!("Waiting for another worker to finish with {}", name);
        PackageLock::acquire(&lock_path, self.lock_timeout)
    }
}

fn git_operation(err: &GitError) -> Operation {
    match err {
        GitError::CloneError(_) => Operation::Clone,
        GitError::FetchError(_) => Operation::Fetch,
        _ => Operation::Sync,
    }
}

fn failed(name: &PackageName, operation: Operation, err: impl std::fmt::Display) -> PackageOutcome {
    log::error!("Error mirroring {} during {}: {}", name, operation, err);
    PackageOutcome::Failed {
        operation,
        detail: err.to_string(),
    }
}
