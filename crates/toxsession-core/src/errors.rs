//! Error types for the Tox session
//!
//! This module contains the errors reported by the protocol engine binding,
//! the persistence collaborator, and the `SessionError` type that unifies them
//! and is what every public session operation returns.

use crate::transfer::{TransferKey, TransferStatus};
use crate::types::{FriendNumber, MessageId};

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors reported by the protocol engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Engine handle is invalid: {reason}")]
    InvalidHandle { reason: String },
    #[error("Engine could not be created: {reason}")]
    InitFailed { reason: String },
    #[error("Persisted state could not be loaded: {reason}")]
    BadState { reason: String },
    #[error("Bootstrap node rejected: {reason}")]
    BootstrapRejected { reason: String },
    #[error("Friend request message is empty")]
    NoMessage,
    #[error("Message is too long (max {max} bytes)")]
    MessageTooLong { max: usize },
    #[error("Cannot add own key as a friend")]
    OwnKey,
    #[error("Friend request already sent or friend already added")]
    AlreadySent,
    #[error("Friend already added with a different nospam")]
    SetNewNospam,
    #[error("Friend {0} not found in engine")]
    FriendNotFound(FriendNumber),
    #[error("Friend {0} is not connected")]
    FriendNotConnected(FriendNumber),
    #[error("Send queue is full")]
    SendQueueFull,
    #[error("File transfer not found")]
    FileNotFound,
    #[error("Too many concurrent file transfers")]
    TooManyTransfers,
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Whether the engine handle is unusable after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::InvalidHandle { .. })
    }
}

/// Errors from the state persistence collaborator
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stored state is corrupted: {reason}")]
    Corrupted { reason: String },
}

// ----------------------------------------------------------------------------
// Session Error
// ----------------------------------------------------------------------------

/// Errors returned by session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No engine handle could be created; no session is possible
    #[error("Engine initialization failed: {0}")]
    EngineInit(EngineError),

    /// No bootstrap node could be reached; a retry is scheduled
    #[error("Bootstrap failed after {attempts} attempts")]
    Bootstrap { attempts: u32 },

    #[error("Invalid Tox address: {reason}")]
    InvalidAddress { reason: String },

    #[error("Unknown friend: {0}")]
    UnknownFriend(FriendNumber),

    #[error("Friend {0} is offline")]
    FriendOffline(FriendNumber),

    /// Business-rule violation reported by the engine
    #[error("Engine rejected {operation}: {source}")]
    EngineRejected {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    /// A split message failed after its first parts went out
    #[error("Message to {friend} stopped after {} parts: {source}", sent.len())]
    PartiallySent {
        friend: FriendNumber,
        sent: Vec<MessageId>,
        #[source]
        source: EngineError,
    },

    #[error("Unknown file transfer: {0}")]
    UnknownTransfer(TransferKey),

    #[error("Cannot {operation} transfer {key} in state {status:?}")]
    InvalidTransferState {
        key: TransferKey,
        status: TransferStatus,
        operation: &'static str,
    },

    #[error("Transfer {0} is already registered")]
    DuplicateTransfer(TransferKey),

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serialized context is unreachable
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// The session stopped after a fatal engine failure or shutdown
    #[error("Session terminated: {reason}")]
    Terminated { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl SessionError {
    /// Create an invalid address error with a reason
    pub fn invalid_address<T: Into<String>>(reason: T) -> Self {
        SessionError::InvalidAddress {
            reason: reason.into(),
        }
    }

    /// Create an invalid input error with a reason
    pub fn invalid_input<T: Into<String>>(reason: T) -> Self {
        SessionError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Wrap an engine error raised by a named operation
    pub fn rejected(operation: &'static str, source: EngineError) -> Self {
        SessionError::EngineRejected { operation, source }
    }

    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        SessionError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        SessionError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a terminated error with a reason
    pub fn terminated<T: Into<String>>(reason: T) -> Self {
        SessionError::Terminated {
            reason: reason.into(),
        }
    }

    /// The engine error behind this failure, if the engine reported one
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            SessionError::EngineInit(e)
            | SessionError::EngineRejected { source: e, .. }
            | SessionError::PartiallySent { source: e, .. } => Some(e),
            _ => None,
        }
    }

    /// Whether the engine handle behind this failure is unusable
    pub fn is_fatal(&self) -> bool {
        self.engine_error().is_some_and(EngineError::is_fatal)
    }

    /// Caller input errors leave session state untouched
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidAddress { .. }
                | SessionError::UnknownFriend(_)
                | SessionError::FriendOffline(_)
                | SessionError::UnknownTransfer(_)
                | SessionError::InvalidInput { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type SessionResult<T> = core::result::Result<T, SessionError>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
