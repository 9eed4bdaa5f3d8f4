//! Release artifacts derived from a mirror's tags.
//!
//! For every version that is both declared in the index and tagged in the
//! mirror, two write-once files are produced:
//!
//! - `descriptions/<version>`: the package descriptor at that tag, re-serialized
//! - `zipball/<version>`: `git archive` of the tag under `{owner}-{repo}-{short}/`
//!
//! Neither is ever regenerated once it exists with content.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use git2::Repository;
use thiserror::Error;

use super::atomic::{is_temp_name, temp_sibling, write_atomic};
use super::git::{self, GitCli, GitError};
use super::paths::{ConfinementViolation, MirrorPaths, RemoveError};
use crate::types::PackageName;
use crate::version::Version;

/// Descriptor file names, newest schema first.
pub const DESCRIPTOR_FILES: [&str; 2] = ["elm.json", "elm-package.json"];

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error(transparent)]
    Confinement(#[from] ConfinementViolation),
    #[error("git error: {0}")]
    Git(#[from] GitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<RemoveError> for ExtractError {
    fn from(err: RemoveError) -> Self {
        match err {
            RemoveError::Confinement(v) => ExtractError::Confinement(v),
            RemoveError::Io(e) => ExtractError::Io(e),
        }
    }
}

/// Counts of what one extraction pass did for a package.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArtifactReport {
    pub manifests_written: usize,
    pub archives_written: usize,
    /// Versions whose tag does not name a commit or whose descriptor was
    /// missing or unparseable.
    pub skipped: Vec<String>,
}

impl ArtifactReport {
    pub fn wrote_anything(&self) -> bool {
        self.manifests_written > 0 || self.archives_written > 0
    }
}

pub struct Extractor {
    paths: MirrorPaths,
    git: GitCli,
}

impl Extractor {
    pub fn new(paths: MirrorPaths, git: GitCli) -> Self {
        Self { paths, git }
    }

    /// Derive artifacts for every declared version that the mirror has a tag for.
    ///
    /// Per-version problems (a tag that does not point at a commit, a missing
    /// or unparseable descriptor) are recorded in the report and do not stop
    /// the remaining versions. Other git and IO failures abort the package.
    pub fn extract(
        &self,
        name: &PackageName,
        declared: &BTreeSet<String>,
    ) -> Result<ArtifactReport, ExtractError> {
        let mirror_dir = self.paths.mirror_dir(name);
        let repo = git::open_repository(&mirror_dir)?;
        let tags = git::list_tags(&repo)?;

        self.sweep_temp_files(&self.paths.descriptions_dir(name))?;
        self.sweep_temp_files(&self.paths.zipball_dir(name))?;

        let mut report = ArtifactReport::default();
        for version in publishable(declared, &tags) {
            let short = match git::short_revision(&repo, version) {
                Ok(short) => short,
                Err(e) => {
                    log::warn!("Skipping {} {}: tag does not name a commit: {}", name, version, e);
                    report.skipped.push(version.to_string());
                    continue;
                }
            };
            let Some(manifest) = read_manifest(&repo, name, version)? else {
                report.skipped.push(version.to_string());
                continue;
            };

            if self.write_manifest(name, version, &manifest)? {
                report.manifests_written += 1;
            }
            if self.write_archive(name, version, &short)? {
                report.archives_written += 1;
            }
        }

        Ok(report)
    }

    /// Remove temp files left in `dir` by a process that died mid-write.
    /// The package lock guarantees nobody else is writing there.
    fn sweep_temp_files(&self, dir: &Path) -> Result<(), ExtractError> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if is_temp_name(&entry.file_name().to_string_lossy()) {
                log::debug!("Removing stale {}", entry.path().display());
                self.paths.remove_path(&entry.path())?;
            }
        }
        Ok(())
    }

    /// Returns true if a new manifest was written.
    fn write_manifest(
        &self,
        name: &PackageName,
        version: &str,
        manifest: &serde_json::Value,
    ) -> Result<bool, ExtractError> {
        let dest = self.paths.description(name, version);
        if dest.exists() {
            return Ok(false);
        }

        let bytes = serde_json::to_vec(manifest).map_err(io::Error::other)?;
        write_atomic(&dest, &bytes)?;
        log::debug!("Wrote manifest for {} {}", name, version);
        Ok(true)
    }

    /// Returns true if a new archive was written.
    fn write_archive(
        &self,
        name: &PackageName,
        version: &str,
        short: &str,
    ) -> Result<bool, ExtractError> {
        let dest = self.paths.zipball(name, version);
        if is_non_empty(&dest) {
            return Ok(false);
        }

        let prefix = format!("{}-{}/", name.dashed(), short);
        log::info!("Creating zipball for {} {}", name, version);

        fs::create_dir_all(self.paths.zipball_dir(name))?;
        let temp = temp_sibling(&dest);
        let archived = self
            .git
            .archive_zip(&self.paths.mirror_dir(name), version, &prefix, &temp)
            .map_err(ExtractError::from)
            .and_then(|()| fs::rename(&temp, &dest).map_err(ExtractError::from));

        if let Err(err) = archived {
            self.paths.remove_path(&temp)?;
            return Err(err);
        }
        Ok(true)
    }
}

/// Declared versions that are tagged locally and parse as a version, so
/// they are also safe to use as a file name.
fn publishable<'a>(
    declared: &'a BTreeSet<String>,
    tags: &'a BTreeSet<String>,
) -> impl Iterator<Item = &'a str> {
    declared
        .intersection(tags)
        .map(String::as_str)
        .filter(|v| Version::parse(v).is_some())
}

/// The descriptor at `version` as JSON, or None if no descriptor is present
/// or it does not parse.
fn read_manifest(
    repo: &Repository,
    name: &PackageName,
    version: &str,
) -> Result<Option<serde_json::Value>, GitError> {
    for file in DESCRIPTOR_FILES {
        let Some(blob) = git::read_blob_at_tag(repo, version, file)? else {
            continue;
        };
        return match serde_json::from_slice(&blob) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("Skipping {} {}: {} is not valid JSON: {}", name, version, file, e);
                Ok(None)
            }
        };
    }

    log::warn!("Skipping {} {}: no package descriptor at tag", name, version);
    Ok(None)
}

fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
