//! # DriftDB Storage
//!
//! Byte storage backends for DriftDB database files.
//!
//! Backends are **opaque byte stores**: they append, read and truncate bytes
//! and know nothing about the log frames DriftDB writes into them.
//!
//! A [`FileBackend`] holds a *shared* advisory lock on its file for as long
//! as it is open. Every open database handle therefore shows up as a lock
//! holder, and [`can_lock_exclusive`] can tell whether a file is still in use
//! before it is moved aside during a manual client reset.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral databases
//! - [`FileBackend`] - For persistent, lock-tracked database files
//!
//! ## Example
//!
//! ```rust
//! use driftdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod lock;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use lock::{can_lock_exclusive, ExclusiveGuard};
pub use memory::InMemoryBackend;
