//! Operations, changesets and server baselines.

use crate::object::ObjectId;
use serde::{Deserialize, Serialize};

/// A single write against one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Insert or overwrite an object.
    Put {
        /// Class (table) name.
        class: String,
        /// Object key.
        id: ObjectId,
        /// Opaque payload.
        payload: Vec<u8>,
    },
    /// Remove an object. Deleting a missing object is a no-op.
    Delete {
        /// Class (table) name.
        class: String,
        /// Object key.
        id: ObjectId,
    },
}

impl Operation {
    /// Returns the class this operation writes to.
    #[must_use]
    pub fn class(&self) -> &str {
        match self {
            Operation::Put { class, .. } | Operation::Delete { class, .. } => class,
        }
    }

    /// Returns the object this operation writes to.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        match self {
            Operation::Put { id, .. } | Operation::Delete { id, .. } => *id,
        }
    }
}

/// Where a committed changeset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Written by this client; unsynced until acknowledged by an upload.
    Local,
    /// Integrated from the server at the given server version.
    Server {
        /// Server history version the changeset was downloaded at.
        server_version: u64,
    },
}

/// The operations of one committed write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    /// Local commit version, strictly increasing per database.
    pub version: u64,
    /// Where the changeset came from.
    pub origin: Origin,
    /// Operations in commit order.
    pub operations: Vec<Operation>,
}

impl Changeset {
    /// Returns true if this changeset was written locally.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.origin == Origin::Local
    }
}

/// A changeset as the server hands it out on download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerChangeset {
    /// Server history version this changeset produced.
    pub server_version: u64,
    /// Operations in commit order.
    pub operations: Vec<Operation>,
}

/// One object as stored in a baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Class (table) name.
    pub class: String,
    /// Object key.
    pub id: ObjectId,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// A fresh copy of the server state a client rebases onto after a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Server history version the snapshot was taken at.
    pub server_version: u64,
    /// Every object visible to the client at that version.
    pub objects: Vec<StoredObject>,
}
