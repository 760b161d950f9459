//! Session lifecycle, transfers and error routing.

use driftdb_core::{ObjectId, ReadView};
use driftdb_sync::{
    ConnectionState, ErrorCode, RetryConfig, SessionState, SubscriptionSet,
    SubscriptionSetState, SyncError, SyncSession,
};
use driftdb_testkit::{write_objects, HookRecorder, LogCapture, TestEnvironment};
use std::time::Duration;

const TIMEOUT: Duration = TestEnvironment::TIMEOUT;
const SHORT: Duration = Duration::from_millis(100);

fn start(env: &TestEnvironment, name: &str) -> SyncSession {
    let db = env.open(name);
    let session = env.start_session(&db, env.config());
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());
    session
}

#[test]
fn upload_and_download_between_clients() {
    let env = TestEnvironment::new();
    let alice = start(&env, "alice");
    let bob = start(&env, "bob");

    write_objects(alice.database(), "Dog", 3);
    assert!(alice.upload_all_local_changes(TIMEOUT).unwrap());
    assert_eq!(env.server().count("Dog"), 3);
    assert!(alice.database().unsynced_changesets().unwrap().is_empty());

    assert!(bob.download_all_server_changes(TIMEOUT).unwrap());
    assert_eq!(bob.database().count("Dog").unwrap(), 3);
    assert_eq!(
        bob.database().server_version(),
        env.server().server_version()
    );

    alice.close().unwrap();
    bob.close().unwrap();
}

#[test]
fn own_changes_are_not_downloaded_twice() {
    let env = TestEnvironment::new();
    let session = start(&env, "echo");
    let id = ObjectId::new();
    session
        .database()
        .transaction(|txn| txn.put("Dog", id, b"rex".to_vec()))
        .unwrap();

    assert!(session.upload_all_local_changes(TIMEOUT).unwrap());
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());

    assert_eq!(session.database().count("Dog").unwrap(), 1);
    assert_eq!(
        session.database().get("Dog", id).unwrap(),
        Some(b"rex".to_vec())
    );
    session.close().unwrap();
}

#[test]
fn pause_and_resume_are_idempotent() {
    let env = TestEnvironment::new();
    let session = start(&env, "pause");
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    session.pause();
    session.pause();
    assert_eq!(session.state(), SessionState::Paused);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);

    session.resume();
    session.resume();
    assert_eq!(session.state(), SessionState::Active);
    session.close().unwrap();
}

#[test]
fn paused_session_holds_transfers() {
    let env = TestEnvironment::new();
    let session = start(&env, "held");
    session.pause();
    write_objects(session.database(), "Dog", 1);

    assert!(!session.upload_all_local_changes(SHORT).unwrap());
    assert_eq!(env.server().count("Dog"), 0);

    session.resume();
    assert!(session.upload_all_local_changes(TIMEOUT).unwrap());
    assert_eq!(env.server().count("Dog"), 1);
    session.close().unwrap();
}

#[test]
fn zero_timeout_is_rejected() {
    let env = TestEnvironment::new();
    let session = start(&env, "zero");
    assert!(matches!(
        session.upload_all_local_changes(Duration::ZERO),
        Err(SyncError::InvalidArgument(_))
    ));
    assert!(matches!(
        session.download_all_server_changes(Duration::ZERO),
        Err(SyncError::InvalidArgument(_))
    ));
    session.close().unwrap();
}

#[test]
fn closed_session_rejects_work() {
    let env = TestEnvironment::new();
    let session = start(&env, "closed");
    session.close().unwrap();
    session.close().unwrap();

    assert_eq!(session.state(), SessionState::Inactive);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(matches!(
        session.upload_all_local_changes(TIMEOUT),
        Err(SyncError::SessionClosed)
    ));
    assert!(matches!(
        session.simulate_error(ErrorCode::PermissionDenied, "x"),
        Err(SyncError::SessionClosed)
    ));

    // pause and resume on a closed session do nothing
    session.pause();
    session.resume();
    assert_eq!(session.state(), SessionState::Inactive);

    // the database outlives the session
    assert!(session.database().is_open());
}

#[test]
fn closed_database_cannot_start_session() {
    let env = TestEnvironment::new();
    let db = env.open("closed-db");
    db.close().unwrap();
    let result = SyncSession::start(db, std::sync::Arc::new(env.server().transport()), env.config());
    assert!(matches!(result, Err(SyncError::Database(_))));
}

#[test]
fn offline_server_is_retryable() {
    let env = TestEnvironment::new();
    let session = start(&env, "offline");
    env.server().set_connected(false);
    write_objects(session.database(), "Dog", 1);

    let err = session.upload_all_local_changes(TIMEOUT).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.connection_state(), ConnectionState::Connecting);

    env.server().set_connected(true);
    assert!(session.upload_all_local_changes(TIMEOUT).unwrap());
    session.close().unwrap();
}

#[test]
fn retries_ride_out_short_outages() {
    let env = TestEnvironment::new();
    let db = env.open("retry");
    let retry = RetryConfig::new(50)
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(20))
        .with_jitter(false);
    let session = env.start_session(&db, env.config().with_retry(retry));
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());

    env.server().set_connected(false);
    write_objects(&db, "Dog", 1);
    let server = env.server().clone();
    let reconnect = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        server.set_connected(true);
    });

    assert!(session.upload_all_local_changes(TIMEOUT).unwrap());
    reconnect.join().unwrap();
    assert_eq!(env.server().count("Dog"), 1);
    session.close().unwrap();
}

#[test]
fn ordinary_errors_reach_handler_with_restricted_session() {
    let env = TestEnvironment::new();
    let session = start(&env, "handler");
    let recorder = HookRecorder::new();
    let hook = recorder.clone();
    session.set_error_handler(move |session, error| {
        hook.record((
            session.is_restricted(),
            error.code(),
            matches!(
                session.upload_all_local_changes(TIMEOUT),
                Err(SyncError::IllegalState(_))
            ),
        ));
    });

    session.simulate_error(ErrorCode::TokenExpired, "token expired").unwrap();
    assert_eq!(
        recorder.receive_or_fail(TIMEOUT),
        (true, Some(ErrorCode::TokenExpired), true)
    );
    assert!(session.last_reset_report().is_none());
    session.close().unwrap();
}

#[test]
fn errors_while_paused_are_delivered_on_resume() {
    let env = TestEnvironment::new();
    let session = start(&env, "deferred");
    let recorder = HookRecorder::new();
    let hook = recorder.clone();
    session.set_error_handler(move |_, error| hook.record(error.code()));

    session.pause();
    session.simulate_error(ErrorCode::BadQuery, "bad query").unwrap();
    recorder.assert_silent(SHORT);

    session.resume();
    assert_eq!(
        recorder.receive_or_fail(TIMEOUT),
        Some(ErrorCode::BadQuery)
    );
    session.close().unwrap();
}

#[test]
fn panicking_error_handler_does_not_stop_worker() {
    let env = TestEnvironment::new();
    let session = start(&env, "handler-panics");
    session.set_error_handler(|_, _| panic!("handler exploded"));

    session.simulate_error(ErrorCode::OtherSessionError, "x").unwrap();
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());
    session.close().unwrap();
}

#[test]
fn unhandled_errors_are_logged() {
    let env = TestEnvironment::new();
    let db = env.open("logged");
    let logs = LogCapture::new();
    let session = env.start_session(&db, env.config().with_log_dispatch(logs.dispatch()));

    session.simulate_error(ErrorCode::BadChangeset, "bad changeset").unwrap();
    assert!(logs.wait_for("[Session][BadChangeset(206)] bad changeset.", TIMEOUT));
    session.close().unwrap();
    assert!(logs.wait_for("sync worker stopped", TIMEOUT));
}

#[test]
fn subscriptions_complete_after_download() {
    let env = TestEnvironment::new();
    let db = env.open("subscriptions");
    let subscriptions = SubscriptionSet::of(["Dog"]);
    let session = env.start_session(
        &db,
        env.config().with_subscriptions(subscriptions.clone()),
    );

    assert!(subscriptions.wait_for_synchronization(TIMEOUT).unwrap());
    assert_eq!(subscriptions.state(), SubscriptionSetState::Complete);
    assert!(subscriptions.contains("Dog"));
    assert!(!subscriptions.contains("Cat"));
    session.close().unwrap();
}

#[test]
fn configuration_is_readable_from_unrestricted_handle() {
    let env = TestEnvironment::new();
    let db = env.open("config");
    let config = env.config();
    let client = config.client_id;
    let session = env.start_session(&db, config);

    assert_eq!(session.configuration().unwrap().client_id, client);
    assert_eq!(session.configuration().unwrap().strategy.name(), "RecoverOrDiscard");
    session.close().unwrap();
}

#[test]
fn dropping_last_handle_stops_worker() {
    let env = TestEnvironment::new();
    let db = env.open("dropped");
    let logs = LogCapture::new();
    let session = env.start_session(&db, env.config().with_log_dispatch(logs.dispatch()));
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());

    drop(session);
    assert!(logs.wait_for("sync worker stopped", TIMEOUT));
}

#[test]
fn download_skips_unsubscribed_classes() {
    let env = TestEnvironment::new();
    env.server().insert("Dog", ObjectId::new(), vec![1]);
    env.server().insert("Cat", ObjectId::new(), vec![2]);
    let db = env.open("dogs-only");
    let session = env.start_session(
        &db,
        env.config().with_subscriptions(SubscriptionSet::of(["Dog"])),
    );

    assert!(session.download_all_server_changes(TIMEOUT).unwrap());
    assert_eq!(db.count("Dog").unwrap(), 1);
    assert_eq!(db.count("Cat").unwrap(), 0);
    assert_eq!(db.server_version(), env.server().server_version());

    env.server().insert("Cat", ObjectId::new(), vec![3]);
    env.server().insert("Dog", ObjectId::new(), vec![4]);
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());
    assert_eq!(db.count("Dog").unwrap(), 2);
    assert_eq!(db.count("Cat").unwrap(), 0);
    assert_eq!(db.server_version(), 4);
    session.close().unwrap();
}

#[test]
fn rejected_subscriptions_enter_error_state() {
    let env = TestEnvironment::new();
    let db = env.open("bad-query");
    let subscriptions = SubscriptionSet::of([""]);
    let session = env.start_session(
        &db,
        env.config().with_subscriptions(subscriptions.clone()),
    );

    let err = session.download_all_server_changes(TIMEOUT).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BadQuery));
    assert_eq!(subscriptions.state(), SubscriptionSetState::Error);
    assert!(matches!(
        subscriptions.wait_for_synchronization(TIMEOUT),
        Err(SyncError::IllegalState(_))
    ));

    subscriptions.remove("");
    subscriptions.add("Dog");
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());
    assert_eq!(subscriptions.state(), SubscriptionSetState::Complete);
    session.close().unwrap();
}

#[test]
fn retries_stop_at_configured_timeout() {
    let env = TestEnvironment::new();
    let db = env.open("timeout");
    let retry = RetryConfig::new(1_000)
        .with_initial_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_millis(20))
        .with_jitter(false);
    let config = env
        .config()
        .with_retry(retry)
        .with_timeout(Duration::from_millis(150));
    let session = env.start_session(&db, config);
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());

    env.server().set_connected(false);
    assert!(matches!(
        session.download_all_server_changes(TIMEOUT),
        Err(SyncError::Timeout)
    ));
    session.close().unwrap();
}

#[test]
fn connection_listeners_see_transitions() {
    use ConnectionState::{Connected, Connecting, Disconnected};

    let env = TestEnvironment::new();
    let session = start(&env, "listener");
    let recorder = HookRecorder::new();
    let hook = recorder.clone();
    session.add_connection_listener(move |old, new| hook.record((old, new)));
    session.add_connection_listener(|_, _| panic!("listener exploded"));

    session.pause();
    assert_eq!(recorder.receive_or_fail(TIMEOUT), (Connected, Disconnected));
    session.resume();
    assert_eq!(recorder.receive_or_fail(TIMEOUT), (Disconnected, Connected));

    env.server().set_connected(false);
    assert!(session.download_all_server_changes(TIMEOUT).is_err());
    assert_eq!(recorder.receive_or_fail(TIMEOUT), (Connected, Connecting));

    env.server().set_connected(true);
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());
    assert_eq!(recorder.receive_or_fail(TIMEOUT), (Connecting, Connected));

    session.close().unwrap();
    assert_eq!(recorder.receive_or_fail(TIMEOUT), (Connected, Disconnected));
    recorder.assert_silent(SHORT);
}

#[test]
fn reset_error_dropped_at_close_is_logged() {
    let env = TestEnvironment::new();
    let db = env.open("dropped-reset");
    let logs = LogCapture::new();
    let session = env.start_session(&db, env.config().with_log_dispatch(logs.dispatch()));
    assert!(session.download_all_server_changes(TIMEOUT).unwrap());

    session.pause();
    session
        .simulate_error(ErrorCode::DivergingHistories, "diverged")
        .unwrap();
    session.close().unwrap();

    assert!(logs.wait_for("dropping reset error: session closed", TIMEOUT));
    assert!(logs.contains("code=300"));
    assert!(session.last_reset_report().is_none());
}
