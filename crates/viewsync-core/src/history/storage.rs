//! Physical storage backends for persisted history.
//!
//! A backend maps one string key to one string payload, the way browser
//! session storage does. Quota failures are reported as
//! [`StorageError::QuotaExceeded`] so the history store can trim and retry.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::error::ErrorCode;
use crate::lock::{LockError, StorageLock};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised while reading or writing persisted history.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend refused the write because it would exceed its size budget.
    #[error("storage quota exceeded for '{key}': needed {needed} bytes, {available} available")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    /// I/O error talking to the backend.
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// Lock acquisition failed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// History could not be encoded.
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    /// `true` for failures that trimming history may resolve.
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::QuotaExceeded { .. } => ErrorCode::StorageQuotaExceeded,
            Self::Io(_) => ErrorCode::StorageWriteFailed,
            Self::Lock(err) => err.code(),
            Self::Encode(_) => ErrorCode::InternalUnexpected,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Key/value backend holding serialized history.
pub trait StateStorage {
    /// Read the payload stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the payload stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] when the payload does not fit,
    /// or another variant for backend failures.
    fn write(&mut self, key: &str, payload: &str) -> Result<(), StorageError>;

    /// Delete `key`. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be modified.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;

    /// All keys currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be listed.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// A failure queued on a [`MemoryStorage`] for the next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFault {
    Quota,
    Io,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    faults: VecDeque<InjectedFault>,
    writes: usize,
}

/// In-process storage shared by every clone, like a browser tab's session
/// storage.
///
/// Clones alias the same entries, so two history stores built from clones
/// of one `MemoryStorage` see each other's writes.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes once all payloads together exceed `bytes`.
    #[must_use]
    pub fn with_quota(bytes: usize) -> Self {
        let storage = Self::default();
        storage.inner.borrow_mut().quota_bytes = Some(bytes);
        storage
    }

    /// Fail the next write with `fault`. Faults queue in order.
    pub fn inject(&self, fault: InjectedFault) {
        self.inner.borrow_mut().faults.push_back(fault);
    }

    /// Number of write attempts seen, including failed ones.
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.inner.borrow().writes
    }

    /// Raw payload for `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.borrow().entries.get(key).cloned()
    }

    /// Overwrite `key` without quota checks or fault injection.
    pub fn put_raw(&self, key: &str, payload: &str) {
        self.inner
            .borrow_mut()
            .entries
            .insert(key.to_string(), payload.to_string());
    }
}

impl StateStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.inner.borrow().entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, payload: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.borrow_mut();
        inner.writes += 1;

        match inner.faults.pop_front() {
            Some(InjectedFault::Quota) => {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: payload.len(),
                    available: 0,
                });
            }
            Some(InjectedFault::Io) => {
                return Err(StorageError::Io(io::Error::other("injected write failure")));
            }
            None => {}
        }

        if let Some(quota) = inner.quota_bytes {
            let others: usize = inner
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            let available = quota.saturating_sub(others);
            if payload.len() > available {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: payload.len(),
                    available,
                });
            }
        }

        inner.entries.insert(key.to_string(), payload.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.inner.borrow_mut().entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.inner.borrow().entries.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

const HISTORY_EXTENSION: &str = "json";
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// One JSON file per key inside a directory.
///
/// Writes land in a temp file that is renamed over the target while an
/// exclusive advisory lock is held, so readers never see a torn payload.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    max_bytes: Option<u64>,
    lock_timeout: Duration,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Reject payloads larger than `bytes` with a quota error.
    #[must_use]
    pub const fn with_max_bytes(mut self, bytes: u64) -> Self {
        self.max_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path used for `key`.
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{HISTORY_EXTENSION}", sanitize_key(key)))
    }

    fn lock_path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.lock", sanitize_key(key)))
    }
}

/// Map a key onto a portable file stem.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn map_write_error(err: io::Error, key: &str, needed: usize) -> StorageError {
    if err.kind() == io::ErrorKind::StorageFull {
        StorageError::QuotaExceeded {
            key: key.to_string(),
            needed,
            available: 0,
        }
    } else {
        StorageError::Io(err)
    }
}

impl StateStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn write(&mut self, key: &str, payload: &str) -> Result<(), StorageError> {
        if let Some(max) = self.max_bytes {
            if payload.len() as u64 > max {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed: payload.len(),
                    available: usize::try_from(max).unwrap_or(usize::MAX),
                });
            }
        }

        fs::create_dir_all(&self.dir)?;
        let _lock = StorageLock::acquire(&self.lock_path_for(key), self.lock_timeout)?;

        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        let result = (|| -> io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(payload.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
            fs::rename(&tmp, &target)
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp);
            return Err(map_write_error(err, key, payload.len()));
        }

        tracing::trace!(path = %target.display(), bytes = payload.len(), "history written");
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        let _lock = StorageLock::acquire(&self.lock_path_for(key), self.lock_timeout)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(HISTORY_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
