//! Local mirrors and the artifacts derived from them.

pub mod atomic;
pub mod extract;
pub mod git;
pub mod lock;
pub mod paths;
pub mod probe;
pub mod sync;

#[cfg(test)]
pub mod testutil;

pub use extract::{ArtifactReport, ExtractError, Extractor};
pub use git::{GitCli, GitError};
pub use lock::PackageLock;
pub use paths::{ConfinementViolation, MirrorPaths, RemoveError};
pub use probe::MirrorState;
pub use sync::{SyncError, SyncOutcome, Synchronizer};
