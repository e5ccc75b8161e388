//! Shared helpers for the session integration tests

#![allow(dead_code)]

use tokio::sync::mpsc::UnboundedReceiver;
use toxsession_core::{
    BootstrapConfig, BootstrapNode, Connection, FriendNumber, MemoryStateStore, Notification,
    PublicKey, SessionConfig, TimerConfig, ToxAddress,
};
use toxsession_harness::{MockControl, MockEngineFactory};
use toxsession_runtime::{SessionBuilder, SessionHandle};

/// Timer period long enough that the timer never fires during a test;
/// ticks are driven explicitly with `tick_now`.
pub const QUIET_INTERVAL_MS: u64 = 600_000;

pub struct TestSession {
    pub session: SessionHandle,
    pub control: MockControl,
    pub store: MemoryStateStore,
    pub notifications: UnboundedReceiver<Notification>,
}

impl TestSession {
    /// Notifications delivered so far
    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            out.push(notification);
        }
        out
    }

    /// Add a friend and bring it online with one tick
    pub async fn add_online_friend(&mut self, seed: u8) -> FriendNumber {
        let friend = self
            .session
            .add_friend(&peer_address(seed).to_string(), "hello")
            .await
            .unwrap();
        self.control.set_friend_connection(friend, Connection::Udp);
        self.session.tick_now().await.unwrap();
        self.drain();
        friend
    }
}

pub fn quiet_config() -> SessionConfig {
    SessionConfig::testing().with_timer(TimerConfig {
        min_interval_ms: 1,
        max_interval_ms: QUIET_INTERVAL_MS,
        initial_interval_ms: QUIET_INTERVAL_MS,
    })
}

pub async fn start_session() -> TestSession {
    start_with(MockControl::default(), MemoryStateStore::new(), quiet_config()).await
}

pub async fn start_with(
    control: MockControl,
    store: MemoryStateStore,
    config: SessionConfig,
) -> TestSession {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    control.set_interval(QUIET_INTERVAL_MS);
    let session = SessionBuilder::new(MockEngineFactory::new(control.clone()))
        .with_store(store.clone())
        .with_config(config)
        .build_and_start()
        .await
        .unwrap();
    let notifications = session.take_notification_receiver().unwrap();
    TestSession {
        session,
        control,
        store,
        notifications,
    }
}

pub fn peer_key(seed: u8) -> PublicKey {
    PublicKey::new([seed; 32])
}

pub fn peer_address(seed: u8) -> ToxAddress {
    ToxAddress::from_parts(peer_key(seed), [seed, 0, 0, 1])
}

pub fn bootstrap_config() -> BootstrapConfig {
    BootstrapConfig {
        nodes: vec![
            BootstrapNode::new("node1.example.org", 33445, peer_key(0xA1)),
            BootstrapNode::new("node2.example.org", 33445, peer_key(0xA2)),
        ],
        max_attempts: 2,
        retry_initial_ms: 10,
        retry_max_ms: 80,
    }
}
