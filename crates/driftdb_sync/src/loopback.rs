//! In-process sync server.

use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::transport::{BaselineResponse, SyncTransport, UploadReceipt};
use driftdb_core::{Baseline, Changeset, ObjectId, Operation, ServerChangeset, StoredObject};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct ServerState {
    objects: BTreeMap<(String, ObjectId), Vec<u8>>,
    history: Vec<(Uuid, ServerChangeset)>,
    version: u64,
    pending_resets: HashMap<Uuid, ErrorCode>,
}

impl ServerState {
    fn integrate(&mut self, client: Uuid, operations: Vec<Operation>) -> u64 {
        for operation in &operations {
            match operation {
                Operation::Put { class, id, payload } => {
                    self.objects.insert((class.clone(), *id), payload.clone());
                }
                Operation::Delete { class, id } => {
                    self.objects.remove(&(class.clone(), *id));
                }
            }
        }
        self.version += 1;
        self.history.push((
            client,
            ServerChangeset {
                server_version: self.version,
                operations,
            },
        ));
        self.version
    }
}

#[derive(Debug)]
struct ServerInner {
    state: Mutex<ServerState>,
    online: AtomicBool,
    recovery_allowed: AtomicBool,
}

/// A sync server living in the same process.
///
/// Keeps one object set and a linear history. Clones share the server.
/// Clients talk to it through [`LoopbackServer::transport`].
#[derive(Debug, Clone)]
pub struct LoopbackServer {
    inner: Arc<ServerInner>,
}

impl LoopbackServer {
    /// Creates an empty, online server that allows recovery.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                state: Mutex::new(ServerState::default()),
                online: AtomicBool::new(true),
                recovery_allowed: AtomicBool::new(true),
            }),
        }
    }

    /// Opens a new client connection.
    #[must_use]
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport {
            server: self.clone(),
            open: AtomicBool::new(true),
        }
    }

    /// Makes the next transfer from `client` fail with `code`.
    pub fn trigger_client_reset(&self, client: Uuid, code: ErrorCode) {
        tracing::debug!(%client, code = code.code(), "scheduling client reset");
        self.inner.state.lock().pending_resets.insert(client, code);
    }

    /// Controls whether baselines permit replaying unsynced changes.
    pub fn set_recovery_allowed(&self, allowed: bool) {
        self.inner.recovery_allowed.store(allowed, Ordering::SeqCst);
    }

    /// Simulates the server going offline or coming back.
    pub fn set_connected(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    /// Writes an object as if another client had uploaded it.
    pub fn insert(&self, class: &str, id: ObjectId, payload: Vec<u8>) -> u64 {
        self.inner.state.lock().integrate(
            Uuid::nil(),
            vec![Operation::Put {
                class: class.to_string(),
                id,
                payload,
            }],
        )
    }

    /// Current server version.
    #[must_use]
    pub fn server_version(&self) -> u64 {
        self.inner.state.lock().version
    }

    /// Number of objects of `class` on the server.
    #[must_use]
    pub fn count(&self, class: &str) -> usize {
        self.inner
            .state
            .lock()
            .objects
            .keys()
            .filter(|(c, _)| c == class)
            .count()
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.inner.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("server unreachable"))
        }
    }

    fn take_reset(&self, client: Uuid) -> SyncResult<()> {
        match self.inner.state.lock().pending_resets.remove(&client) {
            Some(code) => Err(SyncError::server(code, "client reset required")),
            None => Ok(()),
        }
    }
}

impl Default for LoopbackServer {
    fn default() -> Self {
        Self::new()
    }
}

/// One client's connection to a [`LoopbackServer`].
#[derive(Debug)]
pub struct LoopbackTransport {
    server: LoopbackServer,
    open: AtomicBool,
}

impl LoopbackTransport {
    fn check(&self, client: Uuid) -> SyncResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        self.server.check_online()?;
        self.server.take_reset(client)
    }
}

fn check_query(classes: Option<&[String]>) -> SyncResult<()> {
    match classes {
        Some(classes) if classes.iter().any(String::is_empty) => Err(SyncError::server(
            ErrorCode::BadQuery,
            "subscription names an empty class",
        )),
        _ => Ok(()),
    }
}

fn subscribed(classes: Option<&[String]>, class: &str) -> bool {
    classes.map_or(true, |wanted| wanted.iter().any(|c| c == class))
}

impl SyncTransport for LoopbackTransport {
    fn upload(&self, client: Uuid, changesets: &[Changeset]) -> SyncResult<UploadReceipt> {
        self.check(client)?;

        let mut state = self.server.inner.state.lock();
        let mut acknowledged_up_to = 0;
        for changeset in changesets {
            state.integrate(client, changeset.operations.clone());
            acknowledged_up_to = acknowledged_up_to.max(changeset.version);
        }
        Ok(UploadReceipt {
            acknowledged_up_to,
            server_version: state.version,
        })
    }

    fn download(
        &self,
        client: Uuid,
        since: u64,
        classes: Option<&[String]>,
    ) -> SyncResult<Vec<ServerChangeset>> {
        self.check(client)?;
        check_query(classes)?;

        let state = self.server.inner.state.lock();
        Ok(state
            .history
            .iter()
            .filter(|(origin, changeset)| *origin != client && changeset.server_version > since)
            .map(|(_, changeset)| ServerChangeset {
                server_version: changeset.server_version,
                operations: changeset
                    .operations
                    .iter()
                    .filter(|operation| subscribed(classes, operation.class()))
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    fn fetch_baseline(
        &self,
        _client: Uuid,
        classes: Option<&[String]>,
    ) -> SyncResult<BaselineResponse> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        self.server.check_online()?;
        check_query(classes)?;

        let state = self.server.inner.state.lock();
        let objects = state
            .objects
            .iter()
            .filter(|((class, _), _)| subscribed(classes, class))
            .map(|((class, id), payload)| StoredObject {
                class: class.clone(),
                id: *id,
                payload: payload.clone(),
            })
            .collect();

        Ok(BaselineResponse {
            baseline: Baseline {
                server_version: state.version,
                objects,
            },
            recovery_allowed: self.server.inner.recovery_allowed.load(Ordering::SeqCst),
        })
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.server.inner.online.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}
