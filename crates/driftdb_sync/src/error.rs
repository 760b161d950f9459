//! Error types for sync sessions.

use driftdb_core::CoreError;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Broad class of a server error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transport level problems (`100..=199`).
    Connection,
    /// Per-session problems the server reports (`200..=299`).
    Session,
    /// The client must reset its local file (`300..=399`).
    Client,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Connection => "Connection",
            ErrorCategory::Session => "Session",
            ErrorCategory::Client => "Client",
        };
        f.write_str(name)
    }
}

/// Error codes a sync server can report.
///
/// Codes in `300..=399` require a client reset; everything else is an
/// ordinary error delivered to the session's error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The connection was closed by the server.
    ConnectionClosed,
    /// Unspecified connection failure.
    OtherError,
    /// The server sent a message the client does not understand.
    UnknownMessage,
    /// A message could not be parsed.
    BadSyntax,
    /// Client and server speak different protocol versions.
    WrongProtocolVersion,

    /// The session was closed by the server.
    SessionClosed,
    /// Unspecified session failure.
    OtherSessionError,
    /// The access token expired.
    TokenExpired,
    /// Authentication failed.
    BadAuthentication,
    /// The user may not access this file.
    PermissionDenied,
    /// An uploaded changeset was rejected.
    BadChangeset,
    /// A subscription query was rejected.
    BadQuery,
    /// The server reverted a write the client was not allowed to make.
    CompensatingWrite,

    /// Client and server histories diverged.
    DivergingHistories,
    /// The server version the client refers to does not exist.
    BadServerVersion,
    /// The server does not know the client's file identity.
    BadClientFileIdent,
    /// The client was offline longer than the server keeps history.
    ClientFileExpired,
    /// The server-side file was deleted.
    ServerFileDeleted,
    /// A schema change cannot be merged.
    InvalidSchemaChange,
    /// Permissions changed so that local data is no longer valid.
    ServerPermissionsChanged,
    /// The server already determined that an automatic reset is impossible.
    AutoClientResetFailure,

    /// A code this client does not know by name.
    Unknown(u16),
}

const NAMED_CODES: [ErrorCode; 21] = [
    ErrorCode::ConnectionClosed,
    ErrorCode::OtherError,
    ErrorCode::UnknownMessage,
    ErrorCode::BadSyntax,
    ErrorCode::WrongProtocolVersion,
    ErrorCode::SessionClosed,
    ErrorCode::OtherSessionError,
    ErrorCode::TokenExpired,
    ErrorCode::BadAuthentication,
    ErrorCode::PermissionDenied,
    ErrorCode::BadChangeset,
    ErrorCode::BadQuery,
    ErrorCode::CompensatingWrite,
    ErrorCode::DivergingHistories,
    ErrorCode::BadServerVersion,
    ErrorCode::BadClientFileIdent,
    ErrorCode::ClientFileExpired,
    ErrorCode::ServerFileDeleted,
    ErrorCode::InvalidSchemaChange,
    ErrorCode::ServerPermissionsChanged,
    ErrorCode::AutoClientResetFailure,
];

impl ErrorCode {
    /// Looks up a numeric code.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        NAMED_CODES
            .iter()
            .copied()
            .find(|named| named.code() == code)
            .unwrap_or(ErrorCode::Unknown(code))
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            ErrorCode::ConnectionClosed => 100,
            ErrorCode::OtherError => 101,
            ErrorCode::UnknownMessage => 102,
            ErrorCode::BadSyntax => 103,
            ErrorCode::WrongProtocolVersion => 104,
            ErrorCode::SessionClosed => 200,
            ErrorCode::OtherSessionError => 201,
            ErrorCode::TokenExpired => 202,
            ErrorCode::BadAuthentication => 203,
            ErrorCode::PermissionDenied => 204,
            ErrorCode::BadChangeset => 205,
            ErrorCode::BadQuery => 206,
            ErrorCode::CompensatingWrite => 207,
            ErrorCode::DivergingHistories => 300,
            ErrorCode::BadServerVersion => 301,
            ErrorCode::BadClientFileIdent => 302,
            ErrorCode::ClientFileExpired => 303,
            ErrorCode::ServerFileDeleted => 304,
            ErrorCode::InvalidSchemaChange => 305,
            ErrorCode::ServerPermissionsChanged => 306,
            ErrorCode::AutoClientResetFailure => 307,
            ErrorCode::Unknown(code) => code,
        }
    }

    /// Returns the symbolic name used in error messages.
    #[must_use]
    pub fn name(self) -> String {
        match self {
            ErrorCode::Unknown(_) => "Unknown".to_string(),
            named => format!("{named:?}"),
        }
    }

    /// Returns the category of the code, classifying unknown codes by range.
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self.code() {
            300..=399 => ErrorCategory::Client,
            200..=299 => ErrorCategory::Session,
            _ => ErrorCategory::Connection,
        }
    }

    /// Returns true if the code requires a client reset.
    #[must_use]
    pub const fn is_reset_class(self) -> bool {
        matches!(self.category(), ErrorCategory::Client)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

/// Formats a server error as `[Category][Name(code)] message.`
#[must_use]
pub fn format_sync_message(code: ErrorCode, message: &str) -> String {
    let message = message.trim_end();
    let period = if message.ends_with('.') { "" } else { "." };
    format!("[{}][{}] {}{}", code.category(), code, message, period)
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server reported an error code.
    #[error("{}", format_sync_message(*code, message))]
    Server {
        /// Code reported by the server.
        code: ErrorCode,
        /// Server-provided description.
        message: String,
    },

    /// Database error during sync.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// A transfer did not finish within `SyncConfig::timeout`.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The operation is not allowed in the current context.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An argument was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The session was closed.
    #[error("sync session is closed")]
    SessionClosed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a server error.
    pub fn server(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Server {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns the server error code, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SyncError::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if the error requires a client reset.
    pub fn is_reset_required(&self) -> bool {
        self.code().is_some_and(ErrorCode::is_reset_class)
    }
}
