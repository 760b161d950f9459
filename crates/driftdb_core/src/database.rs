//! Database facade and log replay.

use crate::changeset::{Baseline, Changeset, Origin, ServerChangeset};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::log::{decode_frames, encode_frame, LogEntry};
use crate::naming::recovery_path_for;
use crate::object::ObjectId;
use crate::state::ObjectState;
use crate::view::{FrozenView, MutableView};
use driftdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Summary of a [`Database::rebase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebaseReport {
    /// Server version of the baseline the database now sits on.
    pub server_version: u64,
    /// Objects taken over from the baseline.
    pub baseline_objects: usize,
    /// Unsynced changesets replayed on top of the baseline.
    pub replayed: usize,
    /// Unsynced changesets that were dropped.
    pub discarded: usize,
}

/// Commit bookkeeping rebuilt from the log.
#[derive(Debug, Default)]
struct History {
    changesets: Vec<Changeset>,
    last_version: u64,
    uploaded_up_to: u64,
    server_version: u64,
}

impl History {
    fn apply(&mut self, entry: LogEntry, state: &mut ObjectState) {
        match entry {
            LogEntry::Commit(changeset) => self.push(changeset, state),
            LogEntry::Uploaded { up_to } => {
                self.uploaded_up_to = self.uploaded_up_to.max(up_to);
            }
            LogEntry::Baseline {
                baseline,
                local_version,
                replay,
            } => {
                *state = ObjectState::from_objects(&baseline.objects);
                self.changesets.clear();
                self.last_version = local_version;
                self.uploaded_up_to = local_version;
                self.server_version = baseline.server_version;
                for changeset in replay {
                    self.push(changeset, state);
                }
            }
        }
    }

    fn push(&mut self, changeset: Changeset, state: &mut ObjectState) {
        for operation in &changeset.operations {
            state.apply(operation);
        }
        if let Origin::Server { server_version } = changeset.origin {
            self.server_version = self.server_version.max(server_version);
        }
        self.last_version = self.last_version.max(changeset.version);
        self.changesets.push(changeset);
    }

    fn unsynced(&self) -> impl Iterator<Item = &Changeset> {
        let uploaded = self.uploaded_up_to;
        self.changesets
            .iter()
            .filter(move |c| c.is_local() && c.version > uploaded)
    }
}

/// Serializes writers and refuses to be taken twice by one thread, so a
/// transaction opened from inside another fails instead of hanging.
#[derive(Default)]
struct WriteLock {
    lock: Mutex<()>,
    owner: Mutex<Option<ThreadId>>,
}

struct WriteGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _guard: MutexGuard<'a, ()>,
}

impl WriteLock {
    fn acquire(&self) -> CoreResult<WriteGuard<'_>> {
        let me = thread::current().id();
        if *self.owner.lock() == Some(me) {
            return Err(CoreError::invalid_operation(
                "a write transaction is already open on this thread",
            ));
        }
        let guard = self.lock.lock();
        *self.owner.lock() = Some(me);
        Ok(WriteGuard {
            owner: &self.owner,
            _guard: guard,
        })
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock() = None;
    }
}

struct DatabaseInner {
    path: Option<PathBuf>,
    config: Config,
    backend: Mutex<Option<Box<dyn StorageBackend>>>,
    state: RwLock<Arc<ObjectState>>,
    history: RwLock<History>,
    /// Serializes writers; readers only take `state`.
    write_lock: WriteLock,
}

/// A handle on one local database.
///
/// Handles are cheap to clone and share the same underlying file. A handle
/// opened from a path keeps a shared lock on that file until
/// [`Database::close`] is called or the last clone is dropped.
///
/// # Example
///
/// ```rust,ignore
/// use driftdb_core::{Database, ObjectId};
/// use std::path::Path;
///
/// let db = Database::open(Path::new("app.drift"))?;
/// db.transaction(|txn| txn.put("Dog", ObjectId::new(), b"rex".to_vec()))?;
/// db.close()?;
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Database {
    /// Opens or creates the database file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or its log is corrupted.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the database file at `path` with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the file is missing and
    /// `create_if_missing` is false, a storage error if the file cannot be
    /// opened, or a corruption error if the log does not replay.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        if !path.exists() && !config.create_if_missing {
            return Err(CoreError::invalid_operation(format!(
                "database file does not exist: {}",
                path.display()
            )));
        }

        let backend = FileBackend::open_with_create_dirs(path)?;
        let db = Self::open_with_backend(Box::new(backend), Some(path.to_path_buf()), config)?;
        tracing::debug!(path = %path.display(), "opened database");
        Ok(db)
    }

    /// Opens a database with no file behind it.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other openers.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), None, Config::default())
    }

    fn open_with_backend(
        mut backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
        config: Config,
    ) -> CoreResult<Self> {
        let bytes = backend.read_all()?;
        let (entries, consumed) = decode_frames(&bytes)?;
        if consumed < bytes.len() {
            backend.truncate(consumed as u64)?;
        }

        let mut state = ObjectState::default();
        let mut history = History::default();
        for entry in entries {
            history.apply(entry, &mut state);
        }

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                path,
                config,
                backend: Mutex::new(Some(backend)),
                state: RwLock::new(Arc::new(state)),
                history: RwLock::new(history),
                write_lock: WriteLock::default(),
            }),
        })
    }

    /// Path of the database file, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Returns the database configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns a fresh path a client reset would move this file to.
    #[must_use]
    pub fn recovery_path(&self) -> Option<PathBuf> {
        self.path().map(recovery_path_for)
    }

    /// Closes the database for every clone of this handle and releases the
    /// file lock. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let _writer = self.inner.write_lock.acquire()?;
        let mut backend = self.inner.backend.lock();
        if let Some(mut open) = backend.take() {
            open.sync()?;
            open.close()?;
            tracing::debug!(path = ?self.inner.path, "closed database");
        }
        Ok(())
    }

    /// Returns true until [`Database::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.backend.lock().is_some()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Runs `f` in a write transaction.
    ///
    /// If the function returns `Ok`, its writes are committed as one local
    /// changeset. If it returns `Err`, nothing is written. Opening a
    /// transaction while this thread already holds one returns
    /// `InvalidOperation`.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut MutableView<'_>) -> CoreResult<T>,
    {
        self.write(f)
    }

    /// Like [`Database::transaction`], for closures with their own error
    /// type.
    pub fn write<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut MutableView<'_>) -> Result<T, E>,
        E: From<CoreError>,
    {
        let _writer = self.inner.write_lock.acquire()?;
        self.ensure_open()?;

        let base: Arc<ObjectState> = self.inner.state.read().clone();
        let mut view = MutableView::new(&base);
        let value = f(&mut view)?;
        let operations = view.into_operations();
        if operations.is_empty() {
            return Ok(value);
        }

        let version = self.inner.history.read().last_version + 1;
        self.commit(Changeset {
            version,
            origin: Origin::Local,
            operations,
        })?;
        Ok(value)
    }

    /// Appends a changeset to the log and publishes it. Caller holds the
    /// write lock.
    fn commit(&self, changeset: Changeset) -> CoreResult<()> {
        let entry = LogEntry::Commit(changeset);
        self.append(&entry, self.inner.config.sync_on_commit)?;

        let mut state = ObjectState::clone(&self.inner.state.read());
        self.inner.history.write().apply(entry, &mut state);
        *self.inner.state.write() = Arc::new(state);
        Ok(())
    }

    /// Appends one frame. A failed write is cut back off the log so the
    /// file never holds a frame the in-memory state does not.
    fn append(&self, entry: &LogEntry, sync: bool) -> CoreResult<()> {
        let frame = encode_frame(entry)?;
        let mut backend = self.inner.backend.lock();
        let backend = backend.as_mut().ok_or(CoreError::DatabaseClosed)?;

        let start = backend.size()?;
        let written = backend
            .append(&frame)
            .and_then(|_| if sync { backend.sync() } else { Ok(()) });
        if let Err(e) = written {
            if let Err(undo) = backend.truncate(start) {
                tracing::error!(
                    offset = start,
                    error = %undo,
                    "failed to drop partially written frame"
                );
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Returns the payload of an object.
    pub fn get(&self, class: &str, id: ObjectId) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.inner.state.read().get(class, &id).cloned())
    }

    /// Returns the number of objects in a class.
    pub fn count(&self, class: &str) -> CoreResult<usize> {
        self.ensure_open()?;
        Ok(self.inner.state.read().count(class))
    }

    /// Returns every object of a class, ordered by id.
    pub fn list(&self, class: &str) -> CoreResult<Vec<(ObjectId, Vec<u8>)>> {
        self.ensure_open()?;
        Ok(self.inner.state.read().list(class))
    }

    /// Returns the names of the non-empty classes.
    pub fn classes(&self) -> CoreResult<Vec<String>> {
        self.ensure_open()?;
        Ok(self.inner.state.read().classes())
    }

    /// Takes a frozen snapshot of the current state.
    pub fn frozen(&self) -> CoreResult<FrozenView> {
        self.ensure_open()?;
        let state: Arc<ObjectState> = self.inner.state.read().clone();
        let history = self.inner.history.read();
        Ok(FrozenView::new(
            state,
            history.last_version,
            history.server_version,
        ))
    }

    /// Local changesets not yet acknowledged by the server, oldest first.
    pub fn unsynced_changesets(&self) -> CoreResult<Vec<Changeset>> {
        self.ensure_open()?;
        Ok(self.inner.history.read().unsynced().cloned().collect())
    }

    /// Records that local changesets up to `up_to` reached the server.
    pub fn mark_uploaded(&self, up_to: u64) -> CoreResult<()> {
        let _writer = self.inner.write_lock.acquire()?;
        self.ensure_open()?;
        if up_to <= self.inner.history.read().uploaded_up_to {
            return Ok(());
        }

        let entry = LogEntry::Uploaded { up_to };
        self.append(&entry, self.inner.config.sync_on_commit)?;
        let mut state = ObjectState::clone(&self.inner.state.read());
        self.inner.history.write().apply(entry, &mut state);
        Ok(())
    }

    /// Integrates changesets downloaded from the server.
    ///
    /// Changesets at or below the current server version are skipped.
    /// Returns how many were applied.
    pub fn apply_server_changesets(&self, changesets: &[ServerChangeset]) -> CoreResult<usize> {
        let _writer = self.inner.write_lock.acquire()?;
        self.ensure_open()?;

        let mut applied = 0;
        for server in changesets {
            let (current, version) = {
                let history = self.inner.history.read();
                (history.server_version, history.last_version + 1)
            };
            if server.server_version <= current {
                continue;
            }
            self.commit(Changeset {
                version,
                origin: Origin::Server {
                    server_version: server.server_version,
                },
                operations: server.operations.clone(),
            })?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Highest server version integrated so far.
    #[must_use]
    pub fn server_version(&self) -> u64 {
        self.inner.history.read().server_version
    }

    /// Local version of the most recent commit.
    #[must_use]
    pub fn last_version(&self) -> u64 {
        self.inner.history.read().last_version
    }

    /// Replaces the local contents with `baseline`, then replays `replay` on
    /// top as new unsynced local changesets.
    ///
    /// Every unsynced changeset not in `replay` is dropped. The rebase is
    /// appended to the log as a single frame and synced before the
    /// in-memory state changes; if the write fails the database is left as
    /// it was.
    pub fn rebase(&self, baseline: Baseline, replay: &[Changeset]) -> CoreResult<RebaseReport> {
        let _writer = self.inner.write_lock.acquire()?;
        self.ensure_open()?;

        let (local_version, unsynced) = {
            let history = self.inner.history.read();
            (history.last_version, history.unsynced().count())
        };

        let report = RebaseReport {
            server_version: baseline.server_version,
            baseline_objects: baseline.objects.len(),
            replayed: replay.len(),
            discarded: unsynced.saturating_sub(replay.len()),
        };

        let replay = (local_version + 1..)
            .zip(replay)
            .map(|(version, changeset)| Changeset {
                version,
                origin: Origin::Local,
                operations: changeset.operations.clone(),
            })
            .collect();
        let entry = LogEntry::Baseline {
            baseline,
            local_version,
            replay,
        };
        self.append(&entry, true)?;

        let mut state = ObjectState::default();
        self.inner.history.write().apply(entry, &mut state);
        *self.inner.state.write() = Arc::new(state);

        tracing::debug!(
            server_version = report.server_version,
            replayed = report.replayed,
            discarded = report.discarded,
            "rebased database"
        );
        Ok(report)
    }
}
