use std::path::PathBuf;

use crate::http::RetryPolicy;

pub const DEFAULT_ROOT: &str = "/var/tmp/elmirror";
pub const DEFAULT_INDEX_URL: &str = "https://package.elm-lang.org/all-packages";
pub const DEFAULT_REMOTE_BASE: &str = "https://github.com";
pub const DEFAULT_JOBS: usize = 4;

/// Where the package list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    /// Fetched over HTTP and snapshotted under the mirror root.
    Remote(String),
    /// Read from a local file, for offline and deterministic runs.
    File(PathBuf),
}

/// Settings for one sync run.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub root: PathBuf,
    pub index: IndexSource,
    /// Repository URLs are `{remote_base}/{owner}/{repo}`.
    pub remote_base: String,
    pub jobs: usize,
    pub retry: RetryPolicy,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            index: IndexSource::Remote(DEFAULT_INDEX_URL.to_string()),
            remote_base: DEFAULT_REMOTE_BASE.to_string(),
            jobs: DEFAULT_JOBS,
            retry: RetryPolicy::default(),
        }
    }
}

impl MirrorConfig {
    /// Worker count, never zero.
    pub fn workers(&self) -> usize {
        self.jobs.max(1)
    }
}
