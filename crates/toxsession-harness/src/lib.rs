//! Tox Session Harness
//!
//! Test support for the session runtime: a scriptable in-memory engine and
//! shared chunk buffers. Nothing here talks to a real network.

pub mod buffer;
pub mod engine;

pub use buffer::SharedBuffer;
pub use engine::{EngineCall, MockControl, MockEngine, MockEngineFactory};
