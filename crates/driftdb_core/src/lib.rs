//! # DriftDB Core
//!
//! Embedded object store for DriftDB.
//!
//! This crate provides:
//! - [`Database`], a handle on one local database file
//! - A framed, checksummed commit log replayed on open
//! - Change history that separates unsynced local writes from server writes
//! - [`FrozenView`] snapshots and [`MutableView`] write handles
//! - [`Database::rebase`], the primitive a client reset uses to swap the
//!   local contents for a fresh server baseline
//!
//! ## Example
//!
//! ```rust
//! use driftdb_core::{Database, ObjectId, ReadView};
//!
//! let db = Database::open_in_memory().unwrap();
//! db.transaction(|txn| {
//!     txn.put("Dog", ObjectId::new(), b"rex".to_vec())?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! let snapshot = db.frozen().unwrap();
//! assert_eq!(snapshot.count("Dog"), 1);
//! assert_eq!(db.unsynced_changesets().unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changeset;
mod config;
mod database;
mod error;
mod log;
mod naming;
mod object;
mod state;
mod view;

pub use changeset::{Baseline, Changeset, Operation, Origin, ServerChangeset, StoredObject};
pub use config::Config;
pub use database::{Database, RebaseReport};
pub use error::{CoreError, CoreResult};
pub use naming::{recovery_path_for, RECOVERY_DIR};
pub use object::ObjectId;
pub use view::{FrozenView, MutableView, ReadView};

/// Crate version, reported by tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
