use crate::error::ErrorCode;
use crate::reset::strategy::HookError;
use crate::session::ErrorEvent;
use std::path::{Path, PathBuf};

/// Everything one reset episode needs to know about the error that started
/// it.
///
/// Built once per reset-class error and consumed by
/// [`crate::reset::ResetExecutor::run`].
#[derive(Debug)]
pub struct ResetContext {
    original_path: PathBuf,
    recovery_path: PathBuf,
    error_code: ErrorCode,
    message: String,
    cause: Option<HookError>,
}

impl ResetContext {
    /// Creates a context.
    pub fn new(
        original_path: impl Into<PathBuf>,
        recovery_path: impl Into<PathBuf>,
        error_code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            original_path: original_path.into(),
            recovery_path: recovery_path.into(),
            error_code,
            message: message.into(),
            cause: None,
        }
    }

    /// Builds a context from an error delivered to a session.
    #[must_use]
    pub fn from_event(event: ErrorEvent) -> Self {
        Self::new(
            event.original_path,
            event.recovery_path,
            event.code,
            event.message,
        )
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<HookError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Path of the local database file.
    #[must_use]
    pub fn original_path(&self) -> &Path {
        &self.original_path
    }

    /// Path the local file moves to when the reset is executed manually.
    #[must_use]
    pub fn recovery_path(&self) -> &Path {
        &self.recovery_path
    }

    /// The error code that started the reset.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// The server's description of the error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn take_cause(&mut self) -> Option<HookError> {
        self.cause.take()
    }
}
