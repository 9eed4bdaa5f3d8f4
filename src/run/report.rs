//! Per-package outcomes and the run summary.

use std::fmt;

use crate::mirror::{ArtifactReport, SyncOutcome};

/// Pipeline step that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Lock,
    Clone,
    Fetch,
    Sync,
    Extract,
    ServerInfo,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Lock => "lock",
            Operation::Clone => "clone",
            Operation::Fetch => "fetch",
            Operation::Sync => "sync",
            Operation::Extract => "extract",
            Operation::ServerInfo => "update-server-info",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    /// The pipeline ran to the end. `sync` may still say the remote was
    /// unreachable; artifacts were then derived from the existing mirror.
    Synced {
        sync: SyncOutcome,
        artifacts: ArtifactReport,
    },
    SkippedInvalidName { reason: String },
    Failed { operation: Operation, detail: String },
}

impl fmt::Display for PackageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageOutcome::Synced { sync, artifacts } => {
                write!(
                    f,
                    "{}, {} manifests and {} archives written",
                    sync, artifacts.manifests_written, artifacts.archives_written
                )?;
                if !artifacts.skipped.is_empty() {
                    write!(f, ", skipped versions {}", artifacts.skipped.join(", "))?;
                }
                Ok(())
            }
            PackageOutcome::SkippedInvalidName { reason } => {
                write!(f, "skipped, invalid name: {}", reason)
            }
            PackageOutcome::Failed { operation, detail } => {
                write!(f, "{} failed: {}", operation, detail)
            }
        }
    }
}

/// Outcome of one index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReport {
    /// Name as it appeared in the index.
    pub name: String,
    pub outcome: PackageOutcome,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub synced: usize,
    pub skipped: usize,
    pub unreachable: usize,
    pub failed: usize,
    pub recovered: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} skipped, {} unreachable, {} failed, {} recovered",
            self.synced, self.skipped, self.unreachable, self.failed, self.recovered
        )
    }
}

/// Everything a run did, in completion order.
#[derive(Debug, Default, Clone)]
pub struct RunReport {
    pub packages: Vec<PackageReport>,
    /// Set when a stop signal kept some packages from being started.
    pub cancelled: bool,
}

impl RunReport {
    pub fn outcome(&self, name: &str) -> Option<&PackageOutcome> {
        self.packages
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.outcome)
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for package in &self.packages {
            match &package.outcome {
                PackageOutcome::Synced { sync, .. } => match sync {
                    SyncOutcome::Unreachable { .. } | SyncOutcome::Discarded => {
                        summary.unreachable += 1
                    }
                    SyncOutcome::Recovered => {
                        summary.synced += 1;
                        summary.recovered += 1;
                    }
                    _ => summary.synced += 1,
                },
                PackageOutcome::SkippedInvalidName { .. } => summary.skipped += 1,
                PackageOutcome::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}
