//! Transport layer abstraction for sync operations.

use crate::error::SyncResult;
use driftdb_core::{Baseline, Changeset, ServerChangeset};
use uuid::Uuid;

/// Server acknowledgement of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Highest local version the server accepted.
    pub acknowledged_up_to: u64,
    /// Server version after integrating the upload.
    pub server_version: u64,
}

/// A server snapshot handed out for a client reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineResponse {
    /// Objects visible to the client.
    pub baseline: Baseline,
    /// Whether the server accepts replayed unsynced changes on top of it.
    pub recovery_allowed: bool,
}

/// A sync transport handles communication with the sync server.
///
/// Failures the server reports carry an [`crate::ErrorCode`] inside
/// [`crate::SyncError::Server`]; codes in the reset range make the session
/// start a client reset.
pub trait SyncTransport: Send + Sync {
    /// Uploads local changesets.
    fn upload(&self, client: Uuid, changesets: &[Changeset]) -> SyncResult<UploadReceipt>;

    /// Downloads changesets made by other clients after `since`.
    ///
    /// With `classes` set, operations on other classes are left out. Every
    /// changeset is still returned, possibly empty, so the client's server
    /// version advances past it.
    fn download(
        &self,
        client: Uuid,
        since: u64,
        classes: Option<&[String]>,
    ) -> SyncResult<Vec<ServerChangeset>>;

    /// Fetches a fresh snapshot restricted to `classes` (`None` for all).
    fn fetch_baseline(
        &self,
        client: Uuid,
        classes: Option<&[String]>,
    ) -> SyncResult<BaselineResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}
