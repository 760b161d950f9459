//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level byte store holding one DriftDB database file.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `truncate` only ever shortens; the underlying file (and any lock held
///   on it) stays the same
/// - after `close`, every operation fails with `StorageError::Closed`
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ReadPastEnd` if the range extends beyond the current size.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Returns the current size in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all written data durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Cuts the contents back to `len` bytes.
    ///
    /// Used to drop a torn tail, either found on open or left behind by a
    /// failed append. Truncating to the current size drops whatever a failed
    /// append wrote past it; truncating beyond it is a no-op.
    fn truncate(&mut self, len: u64) -> StorageResult<()>;

    /// Releases the backend and any lock it holds.
    ///
    /// Closing twice is a no-op.
    fn close(&mut self) -> StorageResult<()>;

    /// Reads the whole contents.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }
}
