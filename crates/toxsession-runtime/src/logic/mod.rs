//! Session Logic Module
//!
//! This module contains the session task implementation split into focused components:
//! - `state`: State owned by the task and its statistics
//! - `handlers`: Command handlers for the public session operations
//! - `events`: Handlers for the events an engine iteration produces
//! - `task`: Main `SessionTask` loop, ticking and query answering
//!
//! ## Serialized Context
//!
//! Everything that touches the engine or the session's containers runs inside
//! the single `SessionTask`. Callers talk to it over the command channel and
//! await a oneshot reply; the tick timer is another branch of the same loop.
//! Handlers therefore never race each other and the engine never sees two
//! mutations at once.

pub mod events;
pub mod handlers;
pub mod state;
pub mod task;

pub use events::EventHandlers;
pub use handlers::CommandHandlers;
pub use state::{SessionState, SessionStats, TickReport};
pub use task::SessionTask;
