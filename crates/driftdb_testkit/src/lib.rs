//! # DriftDB Testkit
//!
//! Test utilities for DriftDB.
//!
//! This crate provides:
//! - Database fixtures backed by temporary directories
//! - A [`TestEnvironment`] pairing databases with a loopback sync server
//! - [`HookRecorder`], a channel that strategy hooks report into
//! - [`LogCapture`], an in-memory log sink for asserting on log lines
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use driftdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         db.transaction(|txn| txn.put("Dog", ObjectId::new(), vec![1])).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logs;
pub mod recorder;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logs::*;
    pub use crate::recorder::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logs::*;
pub use recorder::*;
