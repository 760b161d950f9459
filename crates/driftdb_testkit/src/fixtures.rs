//! Test fixtures and database helpers.

use driftdb_core::{Database, ObjectId};
use driftdb_sync::{LoopbackServer, RetryConfig, SyncConfig, SyncSession};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
    path: Option<PathBuf>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory().expect("Failed to open in-memory database"),
            _temp_dir: None,
            path: None,
        }
    }

    /// Creates a new file-based test database.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.drift");
        let db = Database::open(&path).expect("Failed to open file database");

        Self {
            db,
            _temp_dir: Some(temp_dir),
            path: Some(path),
        }
    }

    /// Returns the database path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary file-based database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&Database, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db
        .path()
        .expect("File database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}

/// Writes `count` objects of `class`, one transaction each.
pub fn write_objects(db: &Database, class: &str, count: usize) -> Vec<ObjectId> {
    (0..count)
        .map(|i| {
            let id = ObjectId::new();
            db.transaction(|txn| txn.put(class, id, format!("object-{i}").into_bytes()))
                .expect("Failed to write object");
            id
        })
        .collect()
}

/// A temporary directory of databases sharing one loopback server.
pub struct TestEnvironment {
    dir: TempDir,
    server: LoopbackServer,
}

impl TestEnvironment {
    /// Default timeout for waits in tests.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates an empty environment.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
            server: LoopbackServer::new(),
        }
    }

    /// The shared server.
    pub fn server(&self) -> &LoopbackServer {
        &self.server
    }

    /// Path of the database file called `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.drift"))
    }

    /// Opens (or creates) the database called `name`.
    pub fn open(&self, name: &str) -> Database {
        Database::open(&self.path(name)).expect("Failed to open database")
    }

    /// A sync configuration suited to tests: no retries, short timeout.
    pub fn config(&self) -> SyncConfig {
        SyncConfig::new()
            .with_retry(RetryConfig::no_retry())
            .with_timeout(Self::TIMEOUT)
    }

    /// Starts a session for `db` against the shared server.
    pub fn start_session(&self, db: &Database, config: SyncConfig) -> SyncSession {
        SyncSession::start(db.clone(), Arc::new(self.server.transport()), config)
            .expect("Failed to start sync session")
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}
