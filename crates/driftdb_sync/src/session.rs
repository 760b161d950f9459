//! Sync sessions.
//!
//! A [`SyncSession`] connects one local database to the server. All
//! transfers, error routing and client reset episodes run on a background
//! worker thread fed by a command channel; the public handle only sends
//! commands and waits for replies.

use crate::config::{RetryConfig, SyncConfig};
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::reset::{IntegrationEngine, RebaseIntegrator, ResetContext, ResetExecutor, ResetReport};
use crate::subscription::SubscriptionSetState;
use crate::transport::SyncTransport;
use driftdb_core::{CoreError, Database};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transfers run.
    Active,
    /// Transfers and error delivery are held until [`SyncSession::resume`].
    Paused,
    /// The session was closed.
    Inactive,
}

/// Connection state as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; the session is paused or closed.
    Disconnected,
    /// Active, waiting for the transport to come up.
    Connecting,
    /// Active and connected.
    Connected,
}

/// Receives ordinary sync errors.
pub type ErrorHandler = Arc<dyn Fn(&SyncSession, &SyncError) + Send + Sync>;

/// Receives connection state changes as `(old, new)`.
pub type ConnectionListener = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// A server error as delivered to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Code reported by the server.
    pub code: ErrorCode,
    /// Server-provided description.
    pub message: String,
    /// Whether the code requires a client reset.
    pub is_reset_class: bool,
    /// Path of the local database file.
    pub original_path: PathBuf,
    /// Where a manual reset would move the local file.
    pub recovery_path: PathBuf,
}

impl ErrorEvent {
    /// Builds an event for `db`. In-memory databases get empty paths.
    pub fn new(code: ErrorCode, message: impl Into<String>, db: &Database) -> Self {
        Self {
            code,
            message: message.into(),
            is_reset_class: code.is_reset_class(),
            original_path: db.path().map(Path::to_path_buf).unwrap_or_default(),
            recovery_path: db.recovery_path().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Upload,
    Download,
}

enum Command {
    Transfer {
        kind: Transfer,
        reply: Sender<SyncResult<()>>,
    },
    Sync,
    Error(ErrorEvent),
    Resume,
    Shutdown,
}

struct SessionInner {
    db: Database,
    config: SyncConfig,
    transport: Arc<dyn SyncTransport>,
    executor: ResetExecutor,
    state: RwLock<SessionState>,
    error_handler: RwLock<Option<ErrorHandler>>,
    connection_listeners: RwLock<Vec<ConnectionListener>>,
    /// Last state reported to the listeners.
    connection: Mutex<ConnectionState>,
    commands: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    last_reset: Mutex<Option<ResetReport>>,
}

/// Connection lifecycle for one local database.
///
/// Cloning gives another handle on the same session. Handles passed into
/// error handlers and reset hooks are *restricted*: they may pause, resume
/// and read state, but waiting for transfers or reading the configuration
/// fails with [`SyncError::IllegalState`].
#[derive(Clone)]
pub struct SyncSession {
    inner: Arc<SessionInner>,
    restricted: bool,
}

const RESTRICTED_MESSAGE: &str = "operation is not allowed inside an error handler";

impl SyncSession {
    /// Starts a session that resets through a [`RebaseIntegrator`].
    ///
    /// # Errors
    ///
    /// Fails if the database is closed or the worker cannot be spawned.
    pub fn start(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let engine = Arc::new(RebaseIntegrator::new(
            Arc::clone(&transport),
            config.client_id,
            config.subscriptions.clone(),
        ));
        Self::start_with_engine(db, transport, config, engine)
    }

    /// Starts a session with a custom integration engine.
    ///
    /// # Errors
    ///
    /// Fails if the database is closed or the worker cannot be spawned.
    pub fn start_with_engine(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
        engine: Arc<dyn IntegrationEngine>,
    ) -> SyncResult<Self> {
        if !db.is_open() {
            return Err(SyncError::Database(CoreError::DatabaseClosed));
        }

        let (tx, rx) = mpsc::channel();
        let executor = ResetExecutor::new(db.clone(), Arc::clone(&config.strategy), engine);
        let dispatch = config.log_dispatch.clone();
        let client = config.client_id;
        let connection = if transport.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Connecting
        };

        let inner = Arc::new(SessionInner {
            db,
            config,
            transport,
            executor,
            state: RwLock::new(SessionState::Active),
            error_handler: RwLock::new(None),
            connection_listeners: RwLock::new(Vec::new()),
            connection: Mutex::new(connection),
            commands: Mutex::new(Some(tx)),
            worker: Mutex::new(None),
            last_reset: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("driftdb-sync".into())
            .spawn(move || {
                let _log = dispatch.as_ref().map(tracing::dispatcher::set_default);
                worker_loop(&weak, &rx);
            })
            .map_err(|e| SyncError::IllegalState(format!("cannot spawn sync worker: {e}")))?;
        *inner.worker.lock() = Some(handle);

        let session = Self {
            inner,
            restricted: false,
        };
        session.log(|| tracing::debug!(%client, "sync session started"));
        session.send(Command::Sync)?;
        Ok(session)
    }

    pub(crate) fn restricted(&self) -> SyncSession {
        SyncSession {
            inner: Arc::clone(&self.inner),
            restricted: true,
        }
    }

    /// Returns true for handles passed into handlers and hooks.
    #[must_use]
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        match self.state() {
            SessionState::Active if self.inner.transport.is_connected() => {
                ConnectionState::Connected
            }
            SessionState::Active => ConnectionState::Connecting,
            SessionState::Paused | SessionState::Inactive => ConnectionState::Disconnected,
        }
    }

    /// The database this session syncs.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Stops transfers until [`SyncSession::resume`]. Pausing a paused or
    /// closed session does nothing.
    pub fn pause(&self) {
        let mut state = self.inner.state.write();
        if *state == SessionState::Active {
            *state = SessionState::Paused;
            drop(state);
            self.log(|| tracing::debug!("sync session paused"));
            self.notify_connection();
        }
    }

    /// Resumes a paused session, delivering errors that arrived meanwhile.
    /// Resuming an active or closed session does nothing.
    pub fn resume(&self) {
        {
            let mut state = self.inner.state.write();
            if *state != SessionState::Paused {
                return;
            }
            *state = SessionState::Active;
        }
        self.log(|| tracing::debug!("sync session resumed"));
        self.notify_connection();
        if self.send(Command::Resume).is_err() {
            self.log(|| tracing::warn!("sync worker is gone; cannot resume"));
        }
    }

    /// Sets the handler for ordinary sync errors.
    ///
    /// Errors that require a client reset never reach it; they go to the
    /// configured reset strategy.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&SyncSession, &SyncError) + Send + Sync + 'static,
    {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
    }

    /// Registers a listener for connection state changes.
    ///
    /// Listeners run on the thread that caused the change: the caller of
    /// [`SyncSession::pause`], [`SyncSession::resume`] or
    /// [`SyncSession::close`], or the sync worker when a transfer finds the
    /// transport gone or back. A panicking listener is logged and skipped.
    pub fn add_connection_listener<F>(&self, listener: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.inner.connection_listeners.write().push(Arc::new(listener));
    }

    /// Uploads every unsynced local change.
    ///
    /// Returns `Ok(true)` when done and `Ok(false)` if `timeout` elapsed
    /// first, for example because the session is paused.
    ///
    /// # Errors
    ///
    /// Returns the transfer error, `InvalidArgument` for a zero timeout,
    /// `IllegalState` on a restricted handle and `SessionClosed` after
    /// [`SyncSession::close`].
    pub fn upload_all_local_changes(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_for(Transfer::Upload, timeout)
    }

    /// Downloads every server change not yet integrated.
    ///
    /// Same return values and errors as
    /// [`SyncSession::upload_all_local_changes`].
    pub fn download_all_server_changes(&self, timeout: Duration) -> SyncResult<bool> {
        self.wait_for(Transfer::Download, timeout)
    }

    /// The configuration this session was started with.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` on a restricted handle.
    pub fn configuration(&self) -> SyncResult<SyncConfig> {
        self.check_unrestricted()?;
        Ok(self.inner.config.clone())
    }

    /// Delivers a server error as if the transport had reported it.
    ///
    /// A reset-class error arriving while a reset is running is dropped.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` after [`SyncSession::close`].
    pub fn simulate_error(&self, code: ErrorCode, message: impl Into<String>) -> SyncResult<()> {
        let event = ErrorEvent::new(code, message, &self.inner.db);
        if event.is_reset_class && self.inner.executor.is_running() {
            self.log(|| {
                tracing::warn!(
                    code = code.code(),
                    "client reset already in progress; dropping reset error"
                );
            });
            return Ok(());
        }
        self.send(Command::Error(event))
    }

    /// Report of the most recent client reset episode.
    #[must_use]
    pub fn last_reset_report(&self) -> Option<ResetReport> {
        self.inner.last_reset.lock().clone()
    }

    /// Stops the worker and closes the transport. Idempotent.
    ///
    /// The database stays open.
    pub fn close(&self) -> SyncResult<()> {
        {
            let mut state = self.inner.state.write();
            if *state == SessionState::Inactive {
                return Ok(());
            }
            *state = SessionState::Inactive;
        }

        if let Some(commands) = self.inner.commands.lock().take() {
            // the worker may already be gone
            let _ = commands.send(Command::Shutdown);
        }
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            // when closed from a hook, the worker exits once the hook returns
            let on_worker = handle.thread().id() == thread::current().id();
            if !on_worker && handle.join().is_err() {
                self.log(|| tracing::error!("sync worker panicked"));
            }
        }

        self.inner.transport.close()?;
        self.log(|| tracing::debug!("sync session closed"));
        self.notify_connection();
        Ok(())
    }

    fn notify_connection(&self) {
        let (old, new) = {
            let mut last = self.inner.connection.lock();
            let new = self.connection_state();
            (std::mem::replace(&mut *last, new), new)
        };
        if old == new {
            return;
        }

        self.log(|| tracing::debug!(?old, ?new, "connection state changed"));
        let listeners = self.inner.connection_listeners.read().clone();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(old, new))).is_err() {
                self.log(|| tracing::error!("connection listener panicked"));
            }
        }
    }

    fn check_unrestricted(&self) -> SyncResult<()> {
        if self.restricted {
            Err(SyncError::IllegalState(RESTRICTED_MESSAGE.into()))
        } else {
            Ok(())
        }
    }

    fn send(&self, command: Command) -> SyncResult<()> {
        let commands = self.inner.commands.lock();
        let sender = commands.as_ref().ok_or(SyncError::SessionClosed)?;
        sender.send(command).map_err(|_| SyncError::SessionClosed)
    }

    fn wait_for(&self, kind: Transfer, timeout: Duration) -> SyncResult<bool> {
        self.check_unrestricted()?;
        if timeout.is_zero() {
            return Err(SyncError::InvalidArgument(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.state() == SessionState::Inactive {
            return Err(SyncError::SessionClosed);
        }

        let (reply, response) = mpsc::channel();
        self.send(Command::Transfer { kind, reply })?;
        match response.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::SessionClosed),
        }
    }

    /// Runs `f` with the session's log dispatch as default, if one is set.
    fn log<F: FnOnce()>(&self, f: F) {
        match &self.inner.config.log_dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    // ------------------------------------------------------------------
    // Worker side
    // ------------------------------------------------------------------

    fn dispatch(&self, event: ErrorEvent) {
        if event.is_reset_class {
            let ctx = ResetContext::from_event(event);
            if let Some(report) = self.inner.executor.run(self, ctx) {
                *self.inner.last_reset.lock() = Some(report);
            }
        } else {
            if event.code == ErrorCode::BadQuery {
                self.inner
                    .config
                    .subscriptions
                    .set_state(SubscriptionSetState::Error);
            }
            let error = SyncError::server(event.code, event.message);
            self.report_error(&error);
        }
    }

    fn report_error(&self, error: &SyncError) {
        let handler = self.inner.error_handler.read().clone();
        match handler {
            Some(handler) => {
                let session = self.restricted();
                if panic::catch_unwind(AssertUnwindSafe(|| handler(&session, error))).is_err() {
                    tracing::error!("sync error handler panicked");
                }
            }
            None => tracing::warn!(error = %error, "sync error"),
        }
    }

    fn transfer(&self, kind: Transfer) -> SyncResult<()> {
        let config = &self.inner.config;
        let result = with_retry(&config.retry, config.timeout, || match kind {
            Transfer::Upload => self.upload_once(),
            Transfer::Download => self.download_once(),
        });
        self.notify_connection();
        if let Err(SyncError::Server { code, message }) = &result {
            self.dispatch(ErrorEvent::new(*code, message.clone(), &self.inner.db));
        }
        result
    }

    fn upload_once(&self) -> SyncResult<()> {
        let unsynced = self.inner.db.unsynced_changesets()?;
        if unsynced.is_empty() {
            return Ok(());
        }

        let receipt = self
            .inner
            .transport
            .upload(self.inner.config.client_id, &unsynced)?;
        self.inner.db.mark_uploaded(receipt.acknowledged_up_to)?;
        tracing::debug!(
            changesets = unsynced.len(),
            server_version = receipt.server_version,
            "uploaded local changes"
        );
        Ok(())
    }

    fn download_once(&self) -> SyncResult<()> {
        let since = self.inner.db.server_version();
        let classes = self.inner.config.subscriptions.classes();
        let changesets = self.inner.transport.download(
            self.inner.config.client_id,
            since,
            classes.as_deref(),
        )?;
        let applied = self.inner.db.apply_server_changesets(&changesets)?;
        self.inner
            .config
            .subscriptions
            .set_state(SubscriptionSetState::Complete);
        if applied > 0 {
            tracing::debug!(applied, "integrated server changes");
        }
        Ok(())
    }

    fn sync_cycle(&self) {
        let result = self
            .transfer(Transfer::Download)
            .and_then(|()| self.transfer(Transfer::Upload));
        match result {
            Ok(()) | Err(SyncError::Server { .. }) => {}
            Err(e) => self.report_error(&e),
        }
    }
}

impl fmt::Debug for SyncSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSession")
            .field("client_id", &self.inner.config.client_id)
            .field("state", &self.state())
            .field("restricted", &self.restricted)
            .finish()
    }
}

fn worker_loop(weak: &Weak<SessionInner>, commands: &Receiver<Command>) {
    let mut deferred: Vec<ErrorEvent> = Vec::new();
    let mut parked: Vec<(Transfer, Sender<SyncResult<()>>)> = Vec::new();

    while let Ok(command) = commands.recv() {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let session = SyncSession {
            inner,
            restricted: true,
        };

        match command {
            Command::Shutdown => break,
            Command::Error(event) => match session.state() {
                SessionState::Active => session.dispatch(event),
                SessionState::Paused => deferred.push(event),
                SessionState::Inactive => log_dropped(&event),
            },
            Command::Transfer { kind, reply } => match session.state() {
                SessionState::Active => {
                    // the waiter may have timed out already
                    let _ = reply.send(session.transfer(kind));
                }
                SessionState::Paused => parked.push((kind, reply)),
                SessionState::Inactive => {
                    let _ = reply.send(Err(SyncError::SessionClosed));
                }
            },
            Command::Sync => {
                if session.state() == SessionState::Active {
                    session.sync_cycle();
                }
            }
            Command::Resume => {
                if session.state() != SessionState::Active {
                    continue;
                }
                for event in deferred.drain(..) {
                    session.dispatch(event);
                }
                for (kind, reply) in parked.drain(..) {
                    let _ = reply.send(session.transfer(kind));
                }
                session.sync_cycle();
            }
        }
    }

    for event in &deferred {
        log_dropped(event);
    }
    for (_, reply) in parked {
        let _ = reply.send(Err(SyncError::SessionClosed));
    }
    tracing::debug!("sync worker stopped");
}

fn log_dropped(event: &ErrorEvent) {
    if event.is_reset_class {
        tracing::warn!(code = event.code.code(), "dropping reset error: session closed");
    } else {
        tracing::debug!(code = event.code.code(), "dropping sync error: session closed");
    }
}

/// Runs `op`, retrying retryable errors with backoff. Gives up with
/// `Timeout` once the next attempt would start after `timeout`.
fn with_retry<T, F>(retry: &RetryConfig, timeout: Duration, mut op: F) -> SyncResult<T>
where
    F: FnMut() -> SyncResult<T>,
{
    let deadline = Instant::now().checked_add(timeout);
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
                    tracing::debug!(attempt, error = %e, "transfer timed out");
                    return Err(SyncError::Timeout);
                }
                tracing::debug!(attempt, ?delay, error = %e, "retrying transfer");
                thread::sleep(delay);
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const LONG: Duration = Duration::from_secs(60);

    #[test]
    fn retry_stops_on_fatal_error() {
        let calls = Cell::new(0);
        let result: SyncResult<()> = with_retry(&RetryConfig::new(5), LONG, || {
            calls.set(calls.get() + 1);
            Err(SyncError::transport_fatal("bad certificate"))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retry_until_success() {
        let calls = Cell::new(0);
        let retry = RetryConfig::new(3).with_initial_delay(Duration::from_millis(1));
        let result = with_retry(&retry, LONG, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SyncError::transport_retryable("flaky"))
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let retry = RetryConfig::new(2).with_initial_delay(Duration::from_millis(1));
        let result: SyncResult<()> = with_retry(&retry, LONG, || {
            calls.set(calls.get() + 1);
            Err(SyncError::NotConnected)
        });
        assert!(matches!(result, Err(SyncError::NotConnected)));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_gives_up_at_timeout() {
        let calls = Cell::new(0);
        let retry = RetryConfig::new(10)
            .with_initial_delay(Duration::from_millis(40))
            .with_backoff_multiplier(1.0)
            .with_jitter(false);
        let result: SyncResult<()> = with_retry(&retry, Duration::from_millis(100), || {
            calls.set(calls.get() + 1);
            Err(SyncError::transport_retryable("flaky"))
        });
        assert!(matches!(result, Err(SyncError::Timeout)));
        assert!(calls.get() >= 2 && calls.get() < 10);
    }

    #[test]
    fn error_event_paths() {
        let db = Database::open_in_memory().unwrap();
        let event = ErrorEvent::new(ErrorCode::BadQuery, "bad", &db);
        assert!(!event.is_reset_class);
        assert_eq!(event.original_path, PathBuf::new());

        let event = ErrorEvent::new(ErrorCode::ClientFileExpired, "old", &db);
        assert!(event.is_reset_class);
    }
}
