//! Tox Session Core
//!
//! This crate provides the stable API definitions shared by the session runtime
//! and its hosts:
//! - Identifier types (`PublicKey`, `ToxAddress`, `FriendNumber`, ...)
//! - The error taxonomy (`SessionError`, `EngineError`, `StoreError`)
//! - Session configuration
//! - The protocol engine binding (`ToxEngine`, `EngineFactory`, `EngineEvent`)
//! - The friend roster and file transfer bookkeeping
//! - Outbound notifications and the state persistence collaborator
//!
//! Nothing in here touches the network. The runtime crate owns the serialized
//! execution context that drives an engine and mutates these containers.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod engine;
pub mod errors;
pub mod friends;
pub mod notification;
pub mod store;
pub mod transfer;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{
    BootstrapConfig, BootstrapNode, ChannelConfig, SessionConfig, TimerConfig, TransferConfig,
};
pub use engine::{
    EngineEvent, EngineFactory, FileControl, FileKind, FriendRecord, MessageKind, ToxEngine,
};
pub use errors::{EngineError, SessionError, SessionResult, StoreError};
pub use friends::{Friend, FriendStatus, FriendsContainer};
pub use notification::{EntityId, Notification, NotificationKind, NotificationSink};
pub use store::{FileStateStore, MemoryStateStore, StateStore};
pub use transfer::{
    ChunkSink, ChunkSource, Direction, FileTransfer, PausedBy, TransferKey,
    TransferInfo, TransferStatus, TransferTracker,
};
pub use types::{
    ClientId, Connection, ConnectionState, FileNumber, FriendNumber, MessageId, PublicKey,
    Timestamp, ToxAddress,
};
