//! One mirror pass over the whole package index.

mod pipeline;
pub mod report;
mod worker;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use thiserror::Error;

use crate::config::{IndexSource, MirrorConfig};
use crate::http::{HttpClient, RemoteProbe};
use crate::index::{self, IndexError, PackageRecord};
use crate::mirror::{ConfinementViolation, GitCli, MirrorPaths};
use crate::site;

pub use pipeline::Pipeline;
pub use report::{Operation, PackageOutcome, PackageReport, RunReport, RunSummary};
pub use worker::run_packages;

/// Errors that end a run. Per-package problems never show up here.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("internal error: {0}")]
    Confinement(#[from] ConfinementViolation),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error("git binary not found on PATH")]
    GitUnavailable,
    #[error("cannot create mirror root {path}: {source}")]
    Root {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Load the index named by `config` and mirror every package in it.
pub fn sync(config: &MirrorConfig, stop: &AtomicBool) -> Result<RunReport, RunError> {
    if !GitCli::new().is_available() {
        return Err(RunError::GitUnavailable);
    }

    let paths = ensure_root(config)?;
    let client = Arc::new(HttpClient::new(config.retry));

    let records = match &config.index {
        IndexSource::Remote(url) => index::fetch_index(&client, url, &paths)?,
        IndexSource::File(path) => {
            log::info!("Using package index from {}", path.display());
            index::load_index_file(path)?
        }
    };

    mirror_records(config, records, client, stop)
}

/// Mirror already loaded `records`, probing remotes with `probe`.
pub fn mirror_records(
    config: &MirrorConfig,
    records: Vec<PackageRecord>,
    probe: Arc<dyn RemoteProbe>,
    stop: &AtomicBool,
) -> Result<RunReport, RunError> {
    let paths = ensure_root(config)?;
    let pipeline = Pipeline::new(paths, probe, &config.remote_base);
    mirror_all(&pipeline, records, config.workers(), stop)
}

fn ensure_root(config: &MirrorConfig) -> Result<MirrorPaths, RunError> {
    std::fs::create_dir_all(&config.root).map_err(|source| RunError::Root {
        path: config.root.display().to_string(),
        source,
    })?;
    Ok(MirrorPaths::new(&config.root))
}

/// Mirror `records`, then regenerate the listing page.
///
/// The listing is written even when the run was stopped early, since it
/// only reflects what is on disk.
pub fn mirror_all(
    pipeline: &Pipeline,
    records: Vec<PackageRecord>,
    workers: usize,
    stop: &AtomicBool,
) -> Result<RunReport, RunError> {
    log::info!("Mirroring {} packages with {} workers", records.len(), workers.max(1));
    let report = run_packages(pipeline, records, workers, stop)?;

    match site::write_index_html(pipeline.paths()) {
        Ok(count) => log::debug!("Listed {} packages in index.html", count),
        Err(e) => log::error!("Failed to write index.html: {}", e),
    }

    if report.cancelled {
        log::warn!("Run stopped early");
    }
    log::info!("{}", report.summary());
    Ok(report)
}
