//! Connection state management for the session runtime
//!
//! This module contains the ConnectionManager that tracks the session's own
//! connection to the Tox network, drives bootstrap attempts against the
//! configured relay nodes, and schedules retries with exponential backoff when
//! none of them can be reached.

use core::fmt;

use tokio::time::{Duration, Instant};
use toxsession_core::{
    BootstrapConfig, BootstrapNode, Connection, ConnectionState, SessionError, SessionResult,
    ToxEngine,
};
use tracing::{debug, info, warn};

// ----------------------------------------------------------------------------
// Connection Events
// ----------------------------------------------------------------------------

/// Inputs to the connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Bootstrap is about to start
    ConnectRequested,
    /// Every bootstrap attempt was rejected
    BootstrapExhausted,
    /// The engine reports we joined the network
    EngineConnected(Connection),
    /// The engine reports we lost the network
    EngineDisconnected,
    /// The application asked to go offline
    DisconnectRequested,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::ConnectRequested => write!(f, "ConnectRequested"),
            ConnectionEvent::BootstrapExhausted => write!(f, "BootstrapExhausted"),
            ConnectionEvent::EngineConnected(via) => write!(f, "EngineConnected({:?})", via),
            ConnectionEvent::EngineDisconnected => write!(f, "EngineDisconnected"),
            ConnectionEvent::DisconnectRequested => write!(f, "DisconnectRequested"),
        }
    }
}

/// A state change produced by an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub event: ConnectionEvent,
}

// ----------------------------------------------------------------------------
// Retry Schedule
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct RetrySchedule {
    due_at: Instant,
    delay_ms: u64,
}

/// Outcome of one bootstrap round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A node accepted; waiting for the engine to report the connection
    Accepted { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Statistics for connection management
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionStats {
    pub transitions: u64,
    pub bootstrap_attempts: u64,
    pub bootstrap_rounds: u64,
    pub retries_scheduled: u64,
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Tracks the session's connection and the bootstrap retry policy
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    transport: Connection,
    /// Present while the application wants to be online
    policy: Option<BootstrapConfig>,
    retry: Option<RetrySchedule>,
    stats: ConnectionStats,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Offline,
            transport: Connection::None,
            policy: None,
            retry: None,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Transport reported with the last connection event
    pub fn transport(&self) -> Connection {
        self.transport
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Whether a bootstrap retry is scheduled
    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// Delay of the scheduled retry, if any
    pub fn retry_delay_ms(&self) -> Option<u64> {
        self.retry.map(|r| r.delay_ms)
    }

    /// Whether a scheduled retry is due at `now`
    pub fn retry_due(&self, now: Instant) -> bool {
        self.state == ConnectionState::Offline
            && self.retry.is_some_and(|retry| retry.due_at <= now)
    }

    /// Feed an event into the state machine. Returns the transition when the
    /// state changed.
    pub fn process_event(&mut self, event: ConnectionEvent) -> Option<ConnectionTransition> {
        let from = self.state;
        let to = match (from, event) {
            (ConnectionState::Online, ConnectionEvent::ConnectRequested) => from,
            (_, ConnectionEvent::ConnectRequested) => ConnectionState::Connecting,
            (ConnectionState::Connecting, ConnectionEvent::BootstrapExhausted) => {
                ConnectionState::Offline
            }
            (_, ConnectionEvent::BootstrapExhausted) => from,
            (_, ConnectionEvent::EngineConnected(_)) => ConnectionState::Online,
            (ConnectionState::Online, ConnectionEvent::EngineDisconnected) => {
                ConnectionState::Offline
            }
            (_, ConnectionEvent::EngineDisconnected) => from,
            (_, ConnectionEvent::DisconnectRequested) => ConnectionState::Offline,
        };

        match event {
            ConnectionEvent::EngineConnected(via) => {
                self.transport = via;
                self.retry = None;
            }
            ConnectionEvent::EngineDisconnected | ConnectionEvent::DisconnectRequested => {
                self.transport = Connection::None;
            }
            _ => {}
        }

        if from == to {
            return None;
        }

        self.state = to;
        self.stats.transitions += 1;
        debug!("Connection {} -> {} on {}", from, to, event);
        Some(ConnectionTransition { from, to, event })
    }

    /// Remember the bootstrap configuration the application connected with
    pub fn set_policy(&mut self, config: BootstrapConfig) {
        self.policy = Some(config);
        self.retry = None;
    }

    /// Forget the policy and any scheduled retry
    pub fn clear_policy(&mut self) {
        self.policy = None;
        self.retry = None;
    }

    pub fn has_policy(&self) -> bool {
        self.policy.is_some()
    }

    /// Bootstrap against the policy's nodes, at most `max_attempts` calls,
    /// cycling through the nodes in order. Stops at the first node that
    /// accepts.
    pub fn bootstrap<E: ToxEngine>(&mut self, engine: &mut E) -> SessionResult<BootstrapOutcome> {
        let config = self
            .policy
            .clone()
            .ok_or_else(|| SessionError::config_error("no bootstrap nodes configured"))?;
        self.stats.bootstrap_rounds += 1;

        let mut attempts = 0;
        for node in cycle_nodes(&config.nodes, config.max_attempts) {
            attempts += 1;
            self.stats.bootstrap_attempts += 1;
            match engine.bootstrap(node) {
                Ok(()) => {
                    info!("Bootstrapped through {}:{}", node.host, node.port);
                    return Ok(BootstrapOutcome::Accepted { attempts });
                }
                Err(e) if e.is_fatal() => return Err(SessionError::EngineInit(e)),
                Err(e) => warn!("Bootstrap via {}:{} failed: {}", node.host, node.port, e),
            }
        }

        Ok(BootstrapOutcome::Exhausted { attempts })
    }

    /// Schedule the next retry, doubling the previous delay up to the ceiling
    pub fn schedule_retry(&mut self, now: Instant) -> Option<u64> {
        let config = self.policy.as_ref()?;
        let delay_ms = match self.retry {
            Some(previous) => previous
                .delay_ms
                .saturating_mul(2)
                .min(config.retry_max_ms),
            None => config.retry_initial_ms,
        };
        self.retry = Some(RetrySchedule {
            due_at: now + Duration::from_millis(delay_ms),
            delay_ms,
        });
        self.stats.retries_scheduled += 1;
        debug!("Bootstrap retry scheduled in {}ms", delay_ms);
        Some(delay_ms)
    }

    /// Restart backoff from the initial delay
    pub fn reset_backoff(&mut self) {
        self.retry = None;
    }
}

fn cycle_nodes(nodes: &[BootstrapNode], max_attempts: u32) -> impl Iterator<Item = &BootstrapNode> {
    nodes.iter().cycle().take(max_attempts as usize)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
