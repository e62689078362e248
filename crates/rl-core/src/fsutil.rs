//! Small filesystem helpers shared by the file-backed stores.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Write `content` to `path` atomically (temp file, fsync, rename).
///
/// Readers see either the old document or the new one, never a prefix.
pub fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("document.json");
    let tmp_path = path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

/// Advisory exclusive lock on a per-record lock file.
///
/// Held for the duration of a read-check-write sequence so conditional
/// writes from separate processes serialize per record.
#[derive(Debug)]
pub struct RecordLock {
    file: File,
}

/// Outcome of a lock attempt.
#[derive(Debug)]
pub enum LockError {
    /// Still held by someone else after all retries.
    Busy,
    Io(io::Error),
}

impl RecordLock {
    /// Try to take the lock, retrying `attempts` times with `backoff` sleeps.
    pub fn acquire(path: &Path, attempts: u32, backoff: Duration) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(LockError::Io)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false) // advisory only; contents unused
            .open(path)
            .map_err(LockError::Io)?;

        for attempt in 0..attempts.max(1) {
            match try_lock(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if attempt + 1 < attempts {
                        thread::sleep(backoff);
                    }
                }
                Err(err) => return Err(LockError::Io(err)),
            }
        }
        Err(LockError::Busy)
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    // LOCK_EX | LOCK_NB: exclusive, fail fast when held
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> io::Result<()> {
    Ok(())
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        // The lock file stays on disk. Unlinking it would let a waiter lock
        // an orphaned inode while a newcomer locks a fresh file.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_atomic(&path, b"{\"v\":1}").unwrap();
        write_atomic(&path, b"{\"v\":2}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"v\":2}");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rs-1.lock");
        let held = RecordLock::acquire(&path, 1, Duration::from_millis(1)).unwrap();
        assert!(matches!(
            RecordLock::acquire(&path, 2, Duration::from_millis(1)),
            Err(LockError::Busy)
        ));
        drop(held);
        assert!(RecordLock::acquire(&path, 1, Duration::from_millis(1)).is_ok());
        assert!(path.exists());
    }
}
