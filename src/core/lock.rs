//! core::lock
//!
//! Exclusive lock on the local mirror directory.
//!
//! # Architecture
//!
//! Several gitward processes may share one mirror directory. The mirror lock
//! serializes their access to its object store and refs for the duration of
//! a single control repository call. It is not a lock on the control
//! repository itself: concurrent writers on other machines are detected at
//! push time.
//!
//! # Storage
//!
//! - `<mirror_dir>/gitward.lock` - Lock file with OS-level exclusive lock
//!
//! # Invariants
//!
//! - Lock is released on drop (RAII pattern)
//! - [`MirrorLock::acquire`] blocks until the lock is free
//!
//! # Example
//!
//! ```no_run
//! use gitward::core::lock::MirrorLock;
//! use std::path::Path;
//!
//! let lock = MirrorLock::acquire(Path::new("/var/cache/gitward/mirror")).unwrap();
//! assert!(lock.is_held());
//! // ... fetch, commit, push ...
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Name of the lock file inside the mirror directory.
pub const LOCK_FILE: &str = "gitward.lock";

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),
}

/// An exclusive lock on a mirror directory.
#[derive(Debug)]
pub struct MirrorLock {
    path: PathBuf,
    /// `Some` while the lock is held.
    file: Option<File>,
}

impl MirrorLock {
    /// Acquire the lock, waiting for other holders to release it.
    ///
    /// Creates the mirror directory if needed.
    ///
    /// # Errors
    ///
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(mirror_dir: &Path) -> Result<Self, LockError> {
        let (path, file) = Self::open(mirror_dir)?;
        file.lock_exclusive()
            .map_err(|e| LockError::AcquireFailed(e.to_string()))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    fn open(mirror_dir: &Path) -> Result<(PathBuf, File), LockError> {
        fs::create_dir_all(mirror_dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", mirror_dir.display(), e))
        })?;

        let path = mirror_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;
        Ok((path, file))
    }

    /// Check if this guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        // Best-effort release; closing the handle releases it anyway
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
