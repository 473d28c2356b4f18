//! Exclusive advisory lock on the state directory.
//!
//! Single mode relies entirely on this lock plus atomic renames for
//! concurrent safety across processes. The byte-range advisory primitive
//! on POSIX and the mandatory-region lock on Windows are both covered by
//! `fs2`'s `FileExt`.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{CoreError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Held for the full load → mutate → save cycle; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Acquire the exclusive lock, polling until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) => {
                    if Instant::now() >= deadline {
                        return Err(CoreError::LockTimeout(format!(
                            "could not acquire {} within {:.1}s: {e}",
                            path.display(),
                            timeout.as_secs_f64()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".lock");

        let first = StoreLock::acquire(&path, Duration::from_millis(200)).unwrap();
        let second = StoreLock::acquire(&path, Duration::from_millis(150));
        assert!(matches!(second, Err(CoreError::LockTimeout(_))));

        drop(first);
        StoreLock::acquire(&path, Duration::from_millis(200)).unwrap();
    }
}
