use crate::error::{format_sync_message, ErrorCode, SyncError};
use crate::reset::context::ResetContext;
use crate::reset::strategy::HookError;
use driftdb_core::CoreError;
use driftdb_storage::{ExclusiveGuard, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Message of the error passed to the fallback hook when a strategy hook
/// failed or panicked.
pub const USER_CALLBACK_FAILED_MESSAGE: &str =
    "fatal error occurred during client reset: user-provided callback failed";

/// Server-side description used for automatic reset failures.
pub const AUTO_RESET_FAILED_MESSAGE: &str = "Automatic recovery from client reset failed";

/// Why the integration primitive could not rebase the local database.
#[derive(Debug, Error)]
pub enum RecoveryFailure {
    /// The server refused to take replayed unsynced changes.
    #[error("server does not allow recovery of unsynced changes")]
    RecoveryDisallowed,

    /// An unsynced write targets a class outside the subscriptions.
    #[error("unsynced write to class `{class}` is outside the active subscriptions")]
    UnsubscribedWrite {
        /// The offending class.
        class: String,
    },

    /// The baseline could not be fetched.
    #[error("could not fetch server baseline: {0}")]
    Transport(#[source] SyncError),

    /// Local database error.
    #[error("database error: {0}")]
    Database(#[from] CoreError),
}

/// A strategy hook panicked.
#[derive(Debug, Error)]
#[error("callback panicked: {message}")]
pub struct CallbackPanicked {
    /// The panic payload, if it was a string.
    pub message: String,
}

/// The error handed to a fallback hook: automatic handling did not finish
/// and the application has to reset the local file itself.
///
/// Neither path is touched until [`ClientResetRequiredError::execute_client_reset`]
/// is called.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ClientResetRequiredError {
    message: String,
    error_code: ErrorCode,
    original_path: PathBuf,
    recovery_path: PathBuf,
    #[source]
    cause: Option<HookError>,
}

impl ClientResetRequiredError {
    /// The error as reported by the server, for strategies that never try
    /// automatic handling.
    pub(crate) fn from_context(mut ctx: ResetContext) -> Self {
        let cause = ctx.take_cause();
        Self::build(
            format_sync_message(ctx.error_code(), ctx.message()),
            ctx.error_code(),
            ctx,
            cause,
        )
    }

    /// Automatic recovery was impossible.
    pub(crate) fn auto_reset_failed(ctx: ResetContext, cause: Option<HookError>) -> Self {
        let code = ErrorCode::AutoClientResetFailure;
        Self::build(
            format_sync_message(code, AUTO_RESET_FAILED_MESSAGE),
            code,
            ctx,
            cause,
        )
    }

    /// A strategy hook returned an error or panicked.
    pub(crate) fn user_callback_failed(ctx: ResetContext, cause: HookError) -> Self {
        Self::build(
            USER_CALLBACK_FAILED_MESSAGE.to_string(),
            ErrorCode::AutoClientResetFailure,
            ctx,
            Some(cause),
        )
    }

    fn build(
        message: String,
        error_code: ErrorCode,
        ctx: ResetContext,
        cause: Option<HookError>,
    ) -> Self {
        Self {
            message,
            error_code,
            original_path: ctx.original_path().to_path_buf(),
            recovery_path: ctx.recovery_path().to_path_buf(),
            cause,
        }
    }

    /// Human readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error that made automatic handling fail, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// The error code describing why a manual reset is needed.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// Path of the local database file.
    #[must_use]
    pub fn original_file_path(&self) -> &Path {
        &self.original_path
    }

    /// Path the local file is moved to by [`Self::execute_client_reset`].
    #[must_use]
    pub fn recovery_file_path(&self) -> &Path {
        &self.recovery_path
    }

    /// Moves the local file to the recovery path so the next open starts
    /// from scratch.
    ///
    /// Every handle on the file must be closed first. Returns `false`, and
    /// leaves both paths untouched, if one is still open or the move fails.
    pub fn execute_client_reset(&self) -> bool {
        move_to_recovery(&self.original_path, &self.recovery_path)
    }
}

/// Moves the database file at `original` to `recovery`, holding an
/// exclusive lock on it for the move.
///
/// Returns `false`, leaving both paths untouched, if any handle still has
/// the file open or the move fails.
pub fn move_to_recovery(original: &Path, recovery: &Path) -> bool {
    let guard = match ExclusiveGuard::try_acquire(original) {
        Ok(guard) => guard,
        Err(StorageError::Locked { .. }) => {
            tracing::warn!(
                path = %original.display(),
                "cannot execute client reset: database is still open"
            );
            return false;
        }
        Err(e) => {
            tracing::warn!(
                path = %original.display(),
                error = %e,
                "cannot execute client reset"
            );
            return false;
        }
    };

    if let Some(parent) = recovery.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            tracing::warn!(path = %parent.display(), error = %e, "cannot create recovery directory");
            return false;
        }
    }

    let moved = fs::rename(original, recovery);
    drop(guard);
    match moved {
        Ok(()) => {
            tracing::info!(
                original = %original.display(),
                recovery = %recovery.display(),
                "client reset executed"
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                path = %original.display(),
                error = %e,
                "cannot execute client reset"
            );
            false
        }
    }
}
