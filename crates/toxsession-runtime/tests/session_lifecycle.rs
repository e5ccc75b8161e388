//! Integration Tests for the Session Lifecycle
//!
//! Startup, ticking, persistence and shutdown of a session backed by the mock
//! engine.

mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{peer_address, start_session, start_with, QUIET_INTERVAL_MS};
use tokio::time::{sleep, Duration};
use toxsession_core::{
    ConnectionState, EngineError, FileStateStore, MemoryStateStore, Notification, SessionConfig,
    SessionError, StateStore, StoreError,
};
use toxsession_harness::{MockControl, MockEngineFactory};
use toxsession_runtime::SessionBuilder;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

/// Store whose saves always fail
#[derive(Clone, Default)]
struct BrokenStore {
    attempts: Arc<AtomicUsize>,
}

impl StateStore for BrokenStore {
    fn save(&mut self, _state: &[u8]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Io(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )))
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }
}

// ----------------------------------------------------------------------------
// Startup
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_identity_queries() {
    let t = start_session().await;
    let address = t.control.address();

    assert_eq!(t.session.address().await.unwrap(), address);
    assert_eq!(
        t.session.client_id().await.unwrap().as_str(),
        address.public_key().to_string()
    );
    assert_eq!(
        t.session.connection_state().await.unwrap(),
        ConnectionState::Offline
    );
    assert!(t.session.friends().await.unwrap().is_empty());
    assert!(t.session.transfers().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fresh_identity_is_checkpointed_on_first_tick() {
    let t = start_session().await;
    assert_eq!(t.store.save_count(), 0);

    let report = t.session.tick_now().await.unwrap();
    assert!(report.checkpointed);
    assert_eq!(t.store.save_count(), 1);

    let report = t.session.tick_now().await.unwrap();
    assert!(!report.checkpointed);
    assert_eq!(t.store.save_count(), 1);
}

#[tokio::test]
async fn test_restore_from_persisted_state() {
    let store = MemoryStateStore::new();
    let first = start_with(MockControl::default(), store.clone(), common::quiet_config()).await;
    let friend = first
        .session
        .add_friend(&peer_address(3).to_string(), "hi")
        .await
        .unwrap();
    first.session.set_name("alice").await.unwrap();
    first.session.shutdown().await.unwrap();
    let blob = store.contents().unwrap();

    let control = MockControl::default();
    let second = start_with(control.clone(), store.clone(), common::quiet_config()).await;
    assert_eq!(control.loaded_from(), Some(blob));
    assert_eq!(control.name(), "alice");

    let friends = second.session.friends().await.unwrap();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].number, friend);
    assert_eq!(friends[0].public_key, peer_address(3).public_key());

    // A restored identity has nothing new to persist
    let report = second.session.tick_now().await.unwrap();
    assert!(!report.checkpointed);
}

#[tokio::test]
async fn test_restart_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("profile.tox");

    let control = MockControl::default();
    control.set_interval(QUIET_INTERVAL_MS);
    let session = SessionBuilder::new(MockEngineFactory::new(control))
        .with_store(FileStateStore::new(path.clone()))
        .with_config(common::quiet_config())
        .build_and_start()
        .await
        .unwrap();
    session.set_name("carol").await.unwrap();
    session.shutdown().await.unwrap();
    assert!(path.exists());

    let control = MockControl::default();
    let session = SessionBuilder::new(MockEngineFactory::new(control.clone()))
        .with_store(FileStateStore::new(path.clone()))
        .with_config(common::quiet_config())
        .build_and_start()
        .await
        .unwrap();
    assert_eq!(control.name(), "carol");
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_state_fails_startup() {
    let store = MemoryStateStore::with_state(b"\xff\xfe not a snapshot".to_vec());
    let result = SessionBuilder::new(MockEngineFactory::new(MockControl::default()))
        .with_store(store)
        .build_and_start()
        .await;
    assert!(matches!(
        result,
        Err(SessionError::EngineInit(EngineError::BadState { .. }))
    ));
}

// ----------------------------------------------------------------------------
// Ticking
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_idle_tick_changes_nothing() {
    let mut t = start_session().await;
    t.add_online_friend(1).await;
    t.session.tick_now().await.unwrap();
    t.drain();

    let friends = t.session.friends().await.unwrap();
    let transfers = t.session.transfers().await.unwrap();
    let state = t.session.connection_state().await.unwrap();

    let report = t.session.tick_now().await.unwrap();
    assert_eq!(report.events, 0);
    assert!(!report.rescheduled);
    assert!(!report.checkpointed);
    assert_eq!(report.interval_ms, QUIET_INTERVAL_MS);

    assert_eq!(t.session.friends().await.unwrap(), friends);
    assert_eq!(t.session.transfers().await.unwrap(), transfers);
    assert_eq!(t.session.connection_state().await.unwrap(), state);
    assert!(t.drain().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timer_reschedules_only_on_change() {
    let t = start_session().await;

    let report = t.session.tick_now().await.unwrap();
    assert!(!report.rescheduled);

    t.control.set_interval(40);
    let report = t.session.tick_now().await.unwrap();
    assert!(report.rescheduled);
    assert_eq!(report.interval_ms, 40);

    let report = t.session.tick_now().await.unwrap();
    assert!(!report.rescheduled);

    // Clamped to the configured ceiling
    t.control.set_interval(u64::MAX);
    let report = t.session.tick_now().await.unwrap();
    assert!(report.rescheduled);
    assert_eq!(report.interval_ms, QUIET_INTERVAL_MS);

    assert_eq!(t.session.stats().await.unwrap().timer_reschedules, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timer_drives_engine_iterations() {
    let control = MockControl::default();
    let t = start_with(control.clone(), MemoryStateStore::new(), SessionConfig::testing()).await;
    control.set_interval(10);
    control.go_online();

    sleep(Duration::from_millis(100)).await;

    assert!(control.iterations() >= 5);
    assert_eq!(
        t.session.connection_state().await.unwrap(),
        ConnectionState::Online
    );
    assert!(t.session.stats().await.unwrap().ticks >= 5);
}

#[tokio::test]
async fn test_recoverable_iterate_error_is_diagnostic() {
    let mut t = start_session().await;
    t.control
        .fail_next_iterate(EngineError::Other("socket hiccup".to_string()));

    let report = t.session.tick_now().await.unwrap();
    assert_eq!(report.events, 0);
    assert!(t
        .drain()
        .iter()
        .any(|n| matches!(n, Notification::Diagnostic { .. })));
    assert!(t.session.is_running());
}

#[tokio::test]
async fn test_fatal_iterate_error_terminates_session() {
    let mut t = start_session().await;
    t.control.fail_next_iterate(EngineError::InvalidHandle {
        reason: "engine killed".to_string(),
    });

    let result = t.session.tick_now().await;
    assert!(matches!(result, Err(SessionError::Terminated { .. })));
    assert!(t
        .drain()
        .iter()
        .any(|n| matches!(n, Notification::SessionTerminated { .. })));

    t.session.shutdown().await.unwrap();
    assert!(!t.session.is_running());

    let result = t.session.add_friend(&peer_address(1).to_string(), "hi").await;
    assert!(matches!(result, Err(SessionError::Terminated { .. })));
}

// ----------------------------------------------------------------------------
// Persistence and Shutdown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_roster_change_is_checkpointed_at_next_tick() {
    let t = start_session().await;
    t.session.tick_now().await.unwrap();
    let saves = t.store.save_count();

    t.session
        .add_friend(&peer_address(1).to_string(), "hi")
        .await
        .unwrap();
    assert_eq!(t.store.save_count(), saves);

    let report = t.session.tick_now().await.unwrap();
    assert!(report.checkpointed);
    assert_eq!(t.store.save_count(), saves + 1);
}

#[tokio::test]
async fn test_shutdown_persists_and_stops() {
    let t = start_session().await;
    t.session.tick_now().await.unwrap();
    let saves = t.store.save_count();

    t.session.shutdown().await.unwrap();
    assert_eq!(t.store.save_count(), saves + 1);
    assert!(!t.session.is_running());

    // Stopping twice is fine, other operations are not
    t.session.shutdown().await.unwrap();
    let result = t.session.tick_now().await;
    assert!(matches!(result, Err(SessionError::Terminated { .. })));
}

#[tokio::test]
async fn test_dropping_all_handles_persists() {
    let t = start_session().await;
    let store = t.store.clone();
    drop(t);

    for _ in 0..100 {
        if store.save_count() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(store.save_count(), 1);
}

#[tokio::test]
async fn test_checkpoint_failures_are_reported() {
    let store = BrokenStore::default();
    let attempts = store.attempts.clone();
    let control = MockControl::default();
    control.set_interval(QUIET_INTERVAL_MS);
    let session = SessionBuilder::new(MockEngineFactory::new(control))
        .with_store(store)
        .with_config(common::quiet_config())
        .build_and_start()
        .await
        .unwrap();
    let mut notifications = session.take_notification_receiver().unwrap();

    let report = session.tick_now().await.unwrap();
    assert!(!report.checkpointed);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(matches!(
        notifications.try_recv(),
        Ok(Notification::Diagnostic { .. })
    ));
    assert_eq!(session.stats().await.unwrap().checkpoint_failures, 1);

    let result = session.shutdown().await;
    assert!(matches!(result, Err(SessionError::Storage(_))));
    assert!(!session.is_running());
}
