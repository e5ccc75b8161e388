//! Tox Session Runtime
//!
//! This crate contains the session manager that drives a Tox protocol engine:
//! - `SessionBuilder` / `SessionHandle`: start a session and talk to it
//! - `SessionTask`: the serialized execution context owning all session state
//! - `ConnectionManager`: the Offline / Connecting / Online state machine and
//!   bootstrap retry policy
//! - `TickTimer`: the engine iteration timer
//!
//! `toxsession-core` provides the stable API definitions this crate builds on
//! and its common types are re-exported here.

pub mod builder;
pub mod command;
pub mod context;
pub mod handle;
pub mod logic;
pub mod managers;
pub mod timer;

pub use builder::SessionBuilder;
pub use command::{create_command_channel, Command, CommandReceiver, CommandSender, Query};
pub use context::{is_on_context, ContextToken};
pub use handle::SessionHandle;
pub use logic::{SessionStats, TickReport};
pub use managers::*;
pub use timer::TickTimer;

// Re-export core types for convenience
pub use toxsession_core::{
    BootstrapConfig, BootstrapNode, ChunkSink, ChunkSource, ConnectionState, EngineEvent,
    EngineFactory, Friend, FriendNumber, MessageId, Notification, NotificationSink, PublicKey,
    SessionConfig, SessionError, SessionResult, StateStore, ToxAddress, ToxEngine, TransferInfo,
    TransferKey,
};
