use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Default lock timeout (5 minutes); a clone of a large repo can take a while.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Exclusive lock on one package's mirror subtree.
///
/// Held for the whole clone/fetch/extract pipeline so that duplicate index
/// entries, or two overlapping runs, never work on the same mirror at once.
/// Released when dropped.
#[derive(Debug)]
pub struct PackageLock {
    file: File,
}

impl PackageLock {
    /// Acquire the lock, polling with exponential backoff until `timeout`.
    ///
    /// Returns an error with `ErrorKind::TimedOut` if the lock is still held
    /// when the timeout expires.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;

        let start = Instant::now();
        let mut sleep_duration = Duration::from_millis(10);
        let max_sleep = Duration::from_millis(500);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Self::locked(file),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "lock {} still held after {:?}",
                                lock_path.display(),
                                timeout
                            ),
                        ));
                    }
                    std::thread::sleep(sleep_duration);
                    sleep_duration = (sleep_duration * 2).min(max_sleep);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Try to acquire the lock without blocking.
    /// Returns None if another holder has it.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Self::locked(file).map(Some),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Record the holder's pid so a stuck lock can be traced to a process.
    fn locked(mut file: File) -> io::Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file })
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
