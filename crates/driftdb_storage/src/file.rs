//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// While open, the backend holds a shared advisory lock on its file. Any
/// number of backends may share a file, but an exclusive lock check (see
/// [`crate::can_lock_exclusive`]) fails until every one of them is closed or
/// dropped.
///
/// # Example
///
/// ```no_run
/// use driftdb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("app.drift")).unwrap();
/// backend.append(b"frame").unwrap();
/// backend.sync().unwrap();
/// backend.close().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: Mutex<Option<OpenFile>>,
}

#[derive(Debug)]
struct OpenFile {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the file at `path` and takes a shared lock on it.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another party holds an exclusive lock, or an I/O
    /// error if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_shared().is_err() {
            return Err(StorageError::Locked {
                path: path.to_path_buf(),
            });
        }

        let size = file.metadata()?.len();
        tracing::trace!(path = %path.display(), size, "opened file backend");

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(Some(OpenFile { file, size })),
        })
    }

    /// Like [`FileBackend::open`], creating missing parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true until [`StorageBackend::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().is_some()
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut state = self.state.lock();
        let open = state.as_mut().ok_or(StorageError::Closed)?;

        let end = offset.saturating_add(len as u64);
        if end > open.size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: open.size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        open.file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        open.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut state = self.state.lock();
        let open = state.as_mut().ok_or(StorageError::Closed)?;

        let offset = open.size;
        if data.is_empty() {
            return Ok(offset);
        }
        open.file.seek(SeekFrom::End(0))?;
        open.file.write_all(data)?;
        open.size += data.len() as u64;
        Ok(offset)
    }

    fn size(&self) -> StorageResult<u64> {
        let state = self.state.lock();
        state.as_ref().map(|open| open.size).ok_or(StorageError::Closed)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut state = self.state.lock();
        let open = state.as_mut().ok_or(StorageError::Closed)?;
        open.file.flush()?;
        open.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> StorageResult<()> {
        let mut state = self.state.lock();
        let open = state.as_mut().ok_or(StorageError::Closed)?;
        // a failed append may have left bytes past `size` on disk
        if len > open.size {
            return Ok(());
        }

        open.file.set_len(len)?;
        open.file.sync_all()?;
        open.size = len;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if let Some(open) = self.state.lock().take() {
            open.file.sync_all()?;
            open.file.unlock()?;
            tracing::trace!(path = %self.path.display(), "closed file backend");
        }
        Ok(())
    }
}
