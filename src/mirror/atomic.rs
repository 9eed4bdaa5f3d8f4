//! Write-then-rename for artifacts.
//!
//! A reader (or a later run) sees either no artifact or a complete one, never
//! a truncated file left behind by a killed process.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter for unique temp file names
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Hidden sibling of `dest`: `.{name}.tmp.{pid}.{counter}`.
///
/// Temp files live next to their destination so the final rename never
/// crosses a filesystem boundary.
pub fn temp_sibling(dest: &Path) -> PathBuf {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.tmp.{}.{}", name, std::process::id(), counter))
}

/// Does `file_name` look like a name produced by [`temp_sibling`]?
pub fn is_temp_name(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.contains(".tmp.")
}

/// Atomically replace `dest` with `contents`.
pub fn write_atomic(dest: &Path, contents: &[u8]) -> io::Result<()> {
    write_atomic_with(dest, contents, temp_sibling)
}

fn write_atomic_with(
    dest: &Path,
    contents: &[u8],
    mut next_temp: impl FnMut(&Path) -> PathBuf,
) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    loop {
        let temp_path = next_temp(dest);
        // Retry if the temp path already exists (e.g., from a prior crash).
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        };

        let written = file
            .write_all(contents)
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::rename(&temp_path, dest));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn temp_sibling_is_hidden_and_unique() {
        let dest = Path::new("root/acme/widget/zipball/1.0.0");
        let a = temp_sibling(dest);
        let b = temp_sibling(dest);

        assert_ne!(a, b);
        assert_eq!(a.parent(), dest.parent());
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".1.0.0.tmp."), "{name}");
    }

    #[test]
    fn write_atomic_creates_parents_and_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("descriptions").join("1.0.0");

        write_atomic(&dest, b"{}").unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"{}");
    }

    #[test]
    fn write_atomic_replaces_and_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("index.html");

        write_atomic(&dest, b"old").unwrap();
        write_atomic(&dest, b"new").unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"new");
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn write_atomic_skips_stale_temp_path() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("all-packages");
        let stale = temp_sibling(&dest);
        fs::write(&stale, b"partial").unwrap();

        let mut names = vec![temp_sibling(&dest), stale.clone()];
        write_atomic_with(&dest, b"[]", |_| names.pop().unwrap()).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"[]");
        assert_eq!(fs::read(&stale).unwrap(), b"partial");
    }

    #[test]
    fn temp_names_are_recognized() {
        let temp = temp_sibling(Path::new("zipball/1.0.0"));
        assert!(is_temp_name(&temp.file_name().unwrap().to_string_lossy()));
        assert!(!is_temp_name("1.0.0"));
        assert!(!is_temp_name(".hidden"));
    }
}
