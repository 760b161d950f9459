//! The primitive that rebases a local database onto the server state.

use crate::reset::context::ResetContext;
use crate::reset::error::RecoveryFailure;
use crate::subscription::SubscriptionSet;
use crate::transport::{BaselineResponse, SyncTransport};
use driftdb_core::{Database, RebaseReport};
use std::sync::Arc;
use uuid::Uuid;

/// Brings a diverged local database back in line with the server.
///
/// Both operations leave the database untouched when they fail.
pub trait IntegrationEngine: Send + Sync {
    /// Rebases onto the server state and replays unsynced local changes.
    fn attempt_recovery(
        &self,
        db: &Database,
        ctx: &ResetContext,
    ) -> Result<RebaseReport, RecoveryFailure>;

    /// Rebases onto the server state and drops unsynced local changes.
    fn discard_local(&self, db: &Database, ctx: &ResetContext)
        -> Result<RebaseReport, RecoveryFailure>;
}

/// Fetches a baseline through the transport and rebases with
/// [`Database::rebase`].
///
/// Recovery replays every unsynced changeset as is. It is refused when the
/// server disallows it or when a changeset writes to a class this client
/// does not subscribe to.
pub struct RebaseIntegrator {
    transport: Arc<dyn SyncTransport>,
    client_id: Uuid,
    subscriptions: SubscriptionSet,
}

impl RebaseIntegrator {
    /// Creates an integrator for one client.
    pub fn new(
        transport: Arc<dyn SyncTransport>,
        client_id: Uuid,
        subscriptions: SubscriptionSet,
    ) -> Self {
        Self {
            transport,
            client_id,
            subscriptions,
        }
    }

    fn baseline(&self) -> Result<BaselineResponse, RecoveryFailure> {
        let classes = self.subscriptions.classes();
        self.transport
            .fetch_baseline(self.client_id, classes.as_deref())
            .map_err(RecoveryFailure::Transport)
    }
}

impl IntegrationEngine for RebaseIntegrator {
    fn attempt_recovery(
        &self,
        db: &Database,
        ctx: &ResetContext,
    ) -> Result<RebaseReport, RecoveryFailure> {
        let response = self.baseline()?;
        if !response.recovery_allowed {
            return Err(RecoveryFailure::RecoveryDisallowed);
        }

        let unsynced = db.unsynced_changesets()?;
        if let Some(operation) = unsynced
            .iter()
            .flat_map(|changeset| &changeset.operations)
            .find(|operation| !self.subscriptions.contains(operation.class()))
        {
            return Err(RecoveryFailure::UnsubscribedWrite {
                class: operation.class().to_string(),
            });
        }

        tracing::debug!(
            code = ctx.error_code().code(),
            changesets = unsynced.len(),
            "replaying unsynced changes onto server baseline"
        );
        Ok(db.rebase(response.baseline, &unsynced)?)
    }

    fn discard_local(
        &self,
        db: &Database,
        ctx: &ResetContext,
    ) -> Result<RebaseReport, RecoveryFailure> {
        let response = self.baseline()?;
        tracing::debug!(code = ctx.error_code().code(), "discarding unsynced changes");
        Ok(db.rebase(response.baseline, &[])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::loopback::LoopbackServer;
    use driftdb_core::ObjectId;

    fn setup(subscriptions: SubscriptionSet) -> (LoopbackServer, RebaseIntegrator, Database) {
        let server = LoopbackServer::new();
        let integrator =
            RebaseIntegrator::new(Arc::new(server.transport()), Uuid::new_v4(), subscriptions);
        let db = Database::open_in_memory().unwrap();
        (server, integrator, db)
    }

    fn ctx() -> ResetContext {
        ResetContext::new("", "", ErrorCode::ClientFileExpired, "expired")
    }

    #[test]
    fn recovery_replays_unsynced() {
        let (server, integrator, db) = setup(SubscriptionSet::all());
        server.insert("Cat", ObjectId::new(), vec![1]);
        db.transaction(|txn| txn.put("Dog", ObjectId::new(), vec![2]))
            .unwrap();

        let report = integrator.attempt_recovery(&db, &ctx()).unwrap();
        assert_eq!(report.replayed, 1);
        assert_eq!(db.count("Dog").unwrap(), 1);
        assert_eq!(db.count("Cat").unwrap(), 1);
        assert_eq!(db.unsynced_changesets().unwrap().len(), 1);
    }

    #[test]
    fn recovery_refused_by_server() {
        let (server, integrator, db) = setup(SubscriptionSet::all());
        server.set_recovery_allowed(false);
        db.transaction(|txn| txn.put("Dog", ObjectId::new(), vec![2]))
            .unwrap();

        let result = integrator.attempt_recovery(&db, &ctx());
        assert!(matches!(result, Err(RecoveryFailure::RecoveryDisallowed)));
        assert_eq!(db.count("Dog").unwrap(), 1);
    }

    #[test]
    fn recovery_refused_for_unsubscribed_class() {
        let (_server, integrator, db) = setup(SubscriptionSet::of(["Cat"]));
        db.transaction(|txn| txn.put("Dog", ObjectId::new(), vec![2]))
            .unwrap();

        let result = integrator.attempt_recovery(&db, &ctx());
        assert!(
            matches!(result, Err(RecoveryFailure::UnsubscribedWrite { ref class }) if class == "Dog")
        );
    }

    #[test]
    fn discard_drops_unsynced() {
        let (server, integrator, db) = setup(SubscriptionSet::all());
        server.insert("Cat", ObjectId::new(), vec![1]);
        db.transaction(|txn| txn.put("Dog", ObjectId::new(), vec![2]))
            .unwrap();

        let report = integrator.discard_local(&db, &ctx()).unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(db.count("Dog").unwrap(), 0);
        assert_eq!(db.count("Cat").unwrap(), 1);
        assert!(db.unsynced_changesets().unwrap().is_empty());
    }

    #[test]
    fn offline_server_fails_both() {
        let (server, integrator, db) = setup(SubscriptionSet::all());
        server.set_connected(false);

        assert!(matches!(
            integrator.discard_local(&db, &ctx()),
            Err(RecoveryFailure::Transport(_))
        ));
    }
}
