//! Advisory root lock.
//!
//! Generation allocation, the `current` swap, and the state-file rewrite
//! happen under one exclusive flock on the root. Acquisition waits briefly
//! for a sibling invocation to finish before surfacing `LockHeld`.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another pygr invocation holds the root lock")]
    LockHeld,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct RootLock {
    file: File,
}

impl RootLock {
    /// Acquire the lock, polling for up to `wait`.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        let deadline = Instant::now() + wait;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(_) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Err(_) => return Err(LockError::LockHeld),
            }
        }
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
