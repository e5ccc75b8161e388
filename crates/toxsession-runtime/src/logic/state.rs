//! Session State Management
//!
//! Contains the state owned by the session task and its statistics. Reads are
//! open to the task's handlers; every mutation path asks for a
//! [`ContextToken`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use toxsession_core::{
    ClientId, EngineError, FriendsContainer, Notification, SessionConfig, SessionResult, StateStore,
    StoreError, ToxAddress, ToxEngine, TransferTracker,
};
use tracing::{debug, error, info};

use crate::context::ContextToken;
use crate::managers::{
    BootstrapOutcome, ConnectionEvent, ConnectionManager, ConnectionStats, ConnectionTransition,
};

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Everything the serialized context owns
pub struct SessionState<E: ToxEngine> {
    engine: E,
    store: Box<dyn StateStore>,
    friends: FriendsContainer,
    transfers: TransferTracker,
    connection: ConnectionManager,
    config: SessionConfig,
    address: ToxAddress,
    client_id: ClientId,
    notifications: UnboundedSender<Notification>,
    checkpoint_pending: bool,
    /// Set when the engine handle died while handling an event
    engine_failure: Option<EngineError>,
    /// Statistics
    pub stats: SessionStats,
}

impl<E: ToxEngine> SessionState<E> {
    /// Wrap a freshly created or restored engine. The roster is read back
    /// from the engine; a fresh identity is checkpointed on the first tick.
    pub fn new(
        engine: E,
        store: Box<dyn StateStore>,
        config: SessionConfig,
        notifications: UnboundedSender<Notification>,
        fresh_identity: bool,
    ) -> Self {
        let address = engine.address();
        let client_id = ClientId::from_address(&address);
        let friends = FriendsContainer::from_records(engine.friend_list());

        info!(
            "Session state ready for {} with {} friends",
            client_id,
            friends.len()
        );

        Self {
            engine,
            store,
            friends,
            transfers: TransferTracker::new(),
            connection: ConnectionManager::new(),
            config,
            address,
            client_id,
            notifications,
            checkpoint_pending: fresh_identity,
            engine_failure: None,
            stats: SessionStats::default(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn friends(&self) -> &FriendsContainer {
        &self.friends
    }

    pub fn transfers(&self) -> &TransferTracker {
        &self.transfers
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn address(&self) -> ToxAddress {
        self.address
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn checkpoint_pending(&self) -> bool {
        self.checkpoint_pending
    }

    // ------------------------------------------------------------------------
    // Context-only access
    // ------------------------------------------------------------------------

    pub fn engine_mut(&mut self, _token: &ContextToken) -> &mut E {
        &mut self.engine
    }

    pub fn friends_mut(&mut self, _token: &ContextToken) -> &mut FriendsContainer {
        &mut self.friends
    }

    pub fn transfers_mut(&mut self, _token: &ContextToken) -> &mut TransferTracker {
        &mut self.transfers
    }

    pub fn connection_mut(&mut self, _token: &ContextToken) -> &mut ConnectionManager {
        &mut self.connection
    }

    /// Run one bootstrap round with the current policy
    pub fn bootstrap_round(&mut self, _token: &ContextToken) -> SessionResult<BootstrapOutcome> {
        self.connection.bootstrap(&mut self.engine)
    }

    /// Feed the connection state machine. A transition is announced and
    /// checkpointed.
    pub fn transition(
        &mut self,
        token: &ContextToken,
        event: ConnectionEvent,
    ) -> Option<ConnectionTransition> {
        let transition = self.connection_mut(token).process_event(event)?;
        info!("Connection state {} -> {}", transition.from, transition.to);
        self.request_checkpoint();
        self.notify(Notification::ConnectionChanged {
            state: transition.to,
        });
        Some(transition)
    }

    /// Push a notification out of the context
    pub fn notify(&mut self, notification: Notification) {
        if self.notifications.send(notification).is_ok() {
            self.stats.notifications_sent += 1;
        } else {
            self.stats.notifications_dropped += 1;
        }
    }

    /// Remember a fatal engine error; the tick ends the session with it
    pub fn engine_failed(&mut self, error: EngineError) {
        if self.engine_failure.is_none() {
            error!("Engine handle lost: {}", error);
            self.engine_failure = Some(error);
        }
    }

    pub fn take_engine_failure(&mut self) -> Option<EngineError> {
        self.engine_failure.take()
    }

    /// Persist at the end of the current tick
    pub fn request_checkpoint(&mut self) {
        self.checkpoint_pending = true;
    }

    /// Save the engine state now
    pub fn checkpoint(&mut self, _token: &ContextToken) -> Result<(), StoreError> {
        self.checkpoint_pending = false;
        let blob = self.engine.state_blob();
        match self.store.save(&blob) {
            Ok(()) => {
                self.stats.checkpoints_saved += 1;
                debug!("Checkpointed {} bytes of engine state", blob.len());
                Ok(())
            }
            Err(e) => {
                self.stats.checkpoint_failures += 1;
                error!("Failed to persist engine state: {}", e);
                Err(e)
            }
        }
    }

    /// Statistics including the connection manager's
    pub fn stats_snapshot(&self) -> SessionStats {
        let mut stats = self.stats.clone();
        stats.connection = self.connection.stats().clone();
        stats.friends_online = self.friends.online_count() as u64;
        stats
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Statistics for the session task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub commands_processed: u64,
    pub ticks: u64,
    pub events_processed: u64,
    /// Events that referenced an unknown friend or transfer
    pub events_ignored: u64,
    pub notifications_sent: u64,
    pub notifications_dropped: u64,
    pub timer_reschedules: u64,
    pub checkpoints_saved: u64,
    pub checkpoint_failures: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bootstrap_retries: u64,
    /// Friends currently connected
    pub friends_online: u64,
    pub connection: ConnectionStats,
}

/// What one tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Events the engine produced
    pub events: usize,
    /// Timer period after the tick
    pub interval_ms: u64,
    /// Whether the timer period changed
    pub rescheduled: bool,
    /// Whether the engine state was persisted
    pub checkpointed: bool,
}
