//! Git operations using a hybrid CLI + libgit2 approach.
//!
//! **CLI (with hardening) for operations that touch the network or write:**
//! - `clone_mirror` - `clone --mirror`, all refs, no working tree
//! - `fetch_prune` - `fetch --prune`, drops refs deleted upstream
//! - `archive_zip` - `archive --format=zip` of a tag
//! - `update_server_info` - refresh `info/refs` for dumb-HTTP serving
//!
//! **libgit2 for read-only inspection:**
//! - `is_structurally_valid` - can the history be read at all
//! - `list_tags` - tag names present locally
//! - `read_blob_at_tag` - file contents at a tag
//! - `short_revision` - abbreviated commit id behind a tag

use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use git2::{ErrorCode, Repository};
use thiserror::Error;

/// Errors returned by git operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// libgit2 reported an error.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Repository path does not contain a git repo.
    #[error("repository not found at {0}")]
    NotFound(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git data: {0}")]
    ParseError(String),
    /// Clone failed.
    #[error("clone failed: {0}")]
    CloneError(String),
    /// Fetch failed.
    #[error("fetch failed: {0}")]
    FetchError(String),
    /// Archive creation failed.
    #[error("archive failed: {0}")]
    ArchiveError(String),
    /// update-server-info failed.
    #[error("update-server-info failed: {0}")]
    ServerInfoError(String),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Validate that a tag name or URL argument does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal, and invalid in ref names anyway)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
fn validate_arg(value: &str, name: &str) -> Result<(), GitError> {
    if value.is_empty() {
        return Err(GitError::InvalidInput(format!("{} cannot be empty", name)));
    }
    if value.contains("..") {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain '..'",
            name
        )));
    }
    if value.starts_with('-') {
        return Err(GitError::InvalidInput(format!(
            "{} cannot start with '-'",
            name
        )));
    }
    if value.bytes().any(|b| b < 0x20 || b == 0x7f) {
        return Err(GitError::InvalidInput(format!(
            "{} cannot contain null or control characters",
            name
        )));
    }
    Ok(())
}

fn path_str<'a>(path: &'a Path, what: &str) -> Result<&'a str, GitError> {
    path.to_str()
        .ok_or_else(|| GitError::ParseError(format!("{} path is not valid UTF-8", what)))
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Git CLI wrapper with security hardening.
#[derive(Debug, Clone)]
pub struct GitCli {
    git_path: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    /// Create a new GitCli instance using the system git.
    pub fn new() -> Self {
        Self {
            git_path: "git".into(),
        }
    }

    /// Whether a usable git binary is on the PATH.
    pub fn is_available(&self) -> bool {
        Command::new(&self.git_path)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    /// Create a hardened Command with security settings.
    ///
    /// Applies:
    /// - `GIT_LFS_SKIP_SMUDGE=1` - skip LFS file downloads
    /// - `GIT_TERMINAL_PROMPT=0` - disable interactive prompts
    /// - `core.hooksPath=` - disable hooks execution
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.git_path);
        cmd.env("GIT_LFS_SKIP_SMUDGE", "1");
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.args(["-c", "core.hooksPath="]);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Hardened command operating on the bare repository at `git_dir`.
    fn command_in(&self, git_dir: &Path) -> Result<Command, GitError> {
        let mut cmd = self.command();
        cmd.arg(format!("--git-dir={}", path_str(git_dir, "repository")?));
        Ok(cmd)
    }

    /// Clone `url` as a mirror (all refs, no working tree) into `dest`.
    ///
    /// The caller owns cleanup of a half-created `dest` on failure, since
    /// deleting directories is reserved for the confined delete.
    pub fn clone_mirror(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        validate_arg(url, "url")?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let output = self
            .command()
            .args(["clone", "--quiet", "--mirror", "--"])
            .arg(url)
            .arg(path_str(dest, "destination")?)
            .output()?;

        if !output.status.success() {
            return Err(GitError::CloneError(stderr_of(&output)));
        }

        Ok(())
    }

    /// Fetch every ref from origin, pruning refs deleted upstream.
    pub fn fetch_prune(&self, git_dir: &Path) -> Result<(), GitError> {
        let output = self
            .command_in(git_dir)?
            .args(["fetch", "--quiet", "--prune", "origin"])
            .output()?;

        if !output.status.success() {
            return Err(GitError::FetchError(stderr_of(&output)));
        }

        Ok(())
    }

    /// Write a zip of the tree at `refs/tags/{tag}` to `output`, with every
    /// entry nested under `prefix` (which must end in `/`).
    ///
    /// `git archive` stamps entries with the commit time, so the same tag
    /// always produces the same bytes.
    pub fn archive_zip(
        &self,
        git_dir: &Path,
        tag: &str,
        prefix: &str,
        output_path: &Path,
    ) -> Result<(), GitError> {
        validate_arg(tag, "tag")?;
        validate_arg(prefix, "prefix")?;

        let output = self
            .command_in(git_dir)?
            .arg("archive")
            .arg("--format=zip")
            .arg(format!("--prefix={}", prefix))
            .arg(format!("--output={}", path_str(output_path, "archive")?))
            .arg(format!("refs/tags/{}", tag))
            .output()?;

        if !output.status.success() {
            return Err(GitError::ArchiveError(stderr_of(&output)));
        }

        Ok(())
    }

    /// Regenerate `info/refs` and `objects/info/packs`.
    pub fn update_server_info(&self, git_dir: &Path) -> Result<(), GitError> {
        let output = self
            .command_in(git_dir)?
            .arg("update-server-info")
            .output()?;

        if !output.status.success() {
            return Err(GitError::ServerInfoError(stderr_of(&output)));
        }

        Ok(())
    }
}

/// Open an existing repository at the given path.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::open(path).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            GitError::NotFound(path.display().to_string())
        } else {
            GitError::Git(e)
        }
    })?;
    Ok(repo)
}

/// Can the most recent commit be read? Any failure means "no".
pub fn is_structurally_valid(path: &Path) -> bool {
    let repo = match open_repository(path) {
        Ok(repo) => repo,
        Err(_) => return false,
    };
    repo.head().and_then(|head| head.peel_to_commit()).is_ok()
}

/// All tag names in the repository.
pub fn list_tags(repo: &Repository) -> Result<BTreeSet<String>, GitError> {
    let names = repo.tag_names(None)?;
    Ok(names.iter().flatten().map(str::to_string).collect())
}

/// Contents of `file` in the tree at `refs/tags/{tag}`, or None if the
/// tree has no such entry.
pub fn read_blob_at_tag(
    repo: &Repository,
    tag: &str,
    file: &str,
) -> Result<Option<Vec<u8>>, GitError> {
    let tree = repo
        .revparse_single(&format!("refs/tags/{}", tag))?
        .peel_to_tree()?;

    let entry = match tree.get_path(Path::new(file)) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match entry.to_object(repo)?.into_blob() {
        Ok(blob) => Ok(Some(blob.content().to_vec())),
        // A directory named like the file.
        Err(_) => Ok(None),
    }
}

/// Abbreviated id of the commit a tag points at (annotated tags are peeled).
pub fn short_revision(repo: &Repository, tag: &str) -> Result<String, GitError> {
    let commit = repo
        .revparse_single(&format!("refs/tags/{}", tag))?
        .peel_to_commit()?;
    let short = commit.as_object().short_id()?;
    short
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GitError::ParseError(format!("short id for tag {} is not UTF-8", tag)))
}
