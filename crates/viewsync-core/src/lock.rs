//! Advisory locking around history file writes.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

use crate::error::ErrorCode;

const FIRST_BACKOFF: Duration = Duration::from_millis(5);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum LockError {
    /// Another writer kept the history lock past the configured wait.
    #[error(
        "{}: history lock {} still held after {:?}",
        ErrorCode::LockContention.code(),
        .path.display(),
        .waited
    )]
    Contended { path: PathBuf, waited: Duration },

    #[error("{}: cannot open history lock: {0}", ErrorCode::StorageWriteFailed.code())]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Contended { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StorageWriteFailed,
        }
    }

    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}

/// Exclusive lock on a history key, held while its payload is written and
/// renamed into place. Released on drop.
#[derive(Debug)]
pub struct StorageLock {
    file: File,
    path: PathBuf,
}

impl StorageLock {
    /// Lock `path`, creating it and its directory if needed. Retries with a
    /// growing pause until `wait` has elapsed.
    ///
    /// # Errors
    ///
    /// [`LockError::Contended`] when another writer still holds the lock
    /// after `wait`; [`LockError::Io`] when the lock file cannot be opened.
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self, LockError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        let mut pause = FIRST_BACKOFF;
        while file.try_lock_exclusive().is_err() {
            let waited = started.elapsed();
            if waited >= wait {
                return Err(LockError::Contended {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            thread::sleep(pause.min(wait.saturating_sub(waited)));
            pause = (pause * 2).min(MAX_BACKOFF);
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StorageLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
