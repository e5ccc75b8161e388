//! Managers owned by the session task

pub mod connection;

pub use connection::{
    BootstrapOutcome, ConnectionEvent, ConnectionManager, ConnectionStats, ConnectionTransition,
};
