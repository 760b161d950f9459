//! Exclusive access probing for database files.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// An exclusive advisory lock on a file.
///
/// Held while a database file is moved aside; released on drop.
#[derive(Debug)]
pub struct ExclusiveGuard {
    path: PathBuf,
    file: File,
}

impl ExclusiveGuard {
    /// Tries to take an exclusive lock without blocking.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if any handle still holds the file, or an I/O error
    /// if it cannot be opened (for example because it does not exist).
    pub fn try_acquire(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.to_path_buf(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Returns the locked path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock and closes the checking handle.
    pub fn release(self) -> StorageResult<()> {
        self.file.unlock()?;
        Ok(())
    }
}

/// Returns true if no open handle holds a lock on `path`.
///
/// # Errors
///
/// Fails only if the file cannot be opened at all.
pub fn can_lock_exclusive(path: &Path) -> StorageResult<bool> {
    match ExclusiveGuard::try_acquire(path) {
        Ok(guard) => {
            guard.release()?;
            Ok(true)
        }
        Err(StorageError::Locked { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}
