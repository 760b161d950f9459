//! # DriftDB Sync
//!
//! Sync sessions and client reset handling for DriftDB.
//!
//! This crate provides:
//! - [`SyncSession`], the connection lifecycle of one local database
//! - Error classification: ordinary errors go to the session's error
//!   handler, reset-class errors start a client reset
//! - The client reset engine ([`reset`]) with four strategies
//! - [`SyncTransport`] plus an in-process [`LoopbackServer`]
//! - Retry with exponential backoff
//!
//! ## Client resets
//!
//! When the server can no longer reconcile a client's history it reports an
//! error code in the `300..=399` range. The session then runs one reset
//! episode using the configured [`ResetStrategy`]:
//!
//! - [`Manual`]: hand the error to the application
//! - [`DiscardUnsynced`]: drop unsynced writes and continue from the
//!   server state
//! - [`RecoverUnsynced`]: replay unsynced writes on top of the server state
//! - [`RecoverOrDiscard`]: try to recover, discard if that fails
//!
//! Exactly one terminal hook runs per episode. Whatever cannot be handled
//! automatically ends in the fallback hook with a
//! [`ClientResetRequiredError`]; once every handle on the database is
//! closed, [`ClientResetRequiredError::execute_client_reset`] moves the
//! local file aside.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod loopback;
pub mod reset;
mod session;
mod subscription;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use error::{format_sync_message, ErrorCategory, ErrorCode, SyncError, SyncResult};
pub use loopback::{LoopbackServer, LoopbackTransport};
pub use reset::{
    move_to_recovery, ClientResetRequiredError, DiscardUnsynced, HookError, HookResult,
    IntegrationEngine, Manual, RebaseIntegrator, RecoverOrDiscard, RecoverUnsynced,
    RecoveryFailure, ResetContext, ResetExecutor, ResetOutcome, ResetReport, ResetState,
    ResetStrategy,
};
pub use session::{
    ConnectionListener, ConnectionState, ErrorEvent, ErrorHandler, SessionState, SyncSession,
};
pub use subscription::{SubscriptionSet, SubscriptionSetState};
pub use transport::{BaselineResponse, SyncTransport, UploadReceipt};
