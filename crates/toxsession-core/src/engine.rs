//! Protocol Engine Binding
//!
//! The Tox engine itself (wire format, cryptography, network I/O) is an external
//! library. The session runtime consumes it through the traits below, which
//! mirror the engine's iteration-based API: process one tick, read back the
//! events that tick produced, read or restore an opaque state blob, and perform
//! friend and file operations.
//!
//! Engine callbacks are modelled as an ordered `Vec<EngineEvent>` returned from
//! [`ToxEngine::iterate`], drained by the caller in the order the engine
//! produced them.

use serde::{Deserialize, Serialize};

use crate::config::BootstrapNode;
use crate::errors::EngineError;
use crate::transfer::TransferKey;
use crate::types::{
    Connection, FileNumber, FriendNumber, MessageId, PublicKey, Timestamp, ToxAddress,
};

/// Default maximum length of a single message, in bytes
pub const MAX_MESSAGE_LENGTH: usize = 1372;

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Kind of chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Normal,
    /// "/me" style action
    Action,
}

/// Kind of file being transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Data,
    Avatar,
}

/// Control signal for a running transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileControl {
    Resume,
    Pause,
    Cancel,
}

/// A roster entry as stored inside the engine's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRecord {
    pub number: FriendNumber,
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    pub last_seen: Option<Timestamp>,
}

// ----------------------------------------------------------------------------
// Engine Events
// ----------------------------------------------------------------------------

/// Events produced by one engine iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Our own connection to the network changed
    SelfConnection { status: Connection },
    /// Someone asked to become our friend
    FriendRequest {
        public_key: PublicKey,
        message: String,
    },
    /// A friend came online or went offline
    FriendConnection {
        friend: FriendNumber,
        status: Connection,
    },
    FriendName {
        friend: FriendNumber,
        name: String,
    },
    FriendStatusMessage {
        friend: FriendNumber,
        message: String,
    },
    FriendMessage {
        friend: FriendNumber,
        kind: MessageKind,
        text: String,
    },
    /// A message we sent was received by the friend
    FriendReadReceipt {
        friend: FriendNumber,
        message: MessageId,
    },
    /// A friend offers us a file; the transfer waits for acceptance
    FileOffered {
        friend: FriendNumber,
        file: FileNumber,
        kind: FileKind,
        size: u64,
        filename: String,
    },
    /// The engine wants the next chunk of an upload. Length 0 means done.
    FileChunkRequested {
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        length: usize,
    },
    /// A chunk of a download arrived. Empty data means done.
    FileChunkReceived {
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: Vec<u8>,
    },
    /// The remote side paused, resumed or cancelled a transfer
    FileControlReceived {
        key: TransferKey,
        control: FileControl,
    },
    /// The engine released a transfer we cancelled locally
    FileClosed { key: TransferKey },
}

impl EngineEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::SelfConnection { .. } => "SelfConnection",
            EngineEvent::FriendRequest { .. } => "FriendRequest",
            EngineEvent::FriendConnection { .. } => "FriendConnection",
            EngineEvent::FriendName { .. } => "FriendName",
            EngineEvent::FriendStatusMessage { .. } => "FriendStatusMessage",
            EngineEvent::FriendMessage { .. } => "FriendMessage",
            EngineEvent::FriendReadReceipt { .. } => "FriendReadReceipt",
            EngineEvent::FileOffered { .. } => "FileOffered",
            EngineEvent::FileChunkRequested { .. } => "FileChunkRequested",
            EngineEvent::FileChunkReceived { .. } => "FileChunkReceived",
            EngineEvent::FileControlReceived { .. } => "FileControlReceived",
            EngineEvent::FileClosed { .. } => "FileClosed",
        }
    }
}

// ----------------------------------------------------------------------------
// Engine Traits
// ----------------------------------------------------------------------------

/// An open engine handle
///
/// Every method is called from the session's serialized context only, so
/// implementations need no internal locking.
pub trait ToxEngine: Send + 'static {
    /// Our own address (public key, nospam, checksum)
    fn address(&self) -> ToxAddress;

    /// Ask the engine to join the network through a relay node
    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EngineError>;

    /// Drop network connectivity
    fn disconnect(&mut self);

    /// Process one iteration and return the events it produced, in order
    fn iterate(&mut self) -> Result<Vec<EngineEvent>, EngineError>;

    /// Recommended delay before the next iteration, in milliseconds
    fn iteration_interval(&self) -> u64;

    /// Serialized engine state, including keys and the friend list
    fn state_blob(&self) -> Vec<u8>;

    /// Friends restored from the state blob
    fn friend_list(&self) -> Vec<FriendRecord>;

    fn add_friend(&mut self, address: &ToxAddress, message: &str)
        -> Result<FriendNumber, EngineError>;

    /// Add a friend without sending a request (accepting theirs)
    fn add_friend_norequest(&mut self, public_key: &PublicKey)
        -> Result<FriendNumber, EngineError>;

    fn delete_friend(&mut self, friend: FriendNumber) -> Result<(), EngineError>;

    fn send_message(
        &mut self,
        friend: FriendNumber,
        kind: MessageKind,
        text: &str,
    ) -> Result<MessageId, EngineError>;

    /// Largest message the engine accepts in one call, in bytes
    fn max_message_length(&self) -> usize {
        MAX_MESSAGE_LENGTH
    }

    fn set_name(&mut self, name: &str) -> Result<(), EngineError>;

    fn set_status_message(&mut self, message: &str) -> Result<(), EngineError>;

    /// Offer a file to a friend; returns the engine's file number for the upload
    fn file_send(
        &mut self,
        friend: FriendNumber,
        kind: FileKind,
        size: u64,
        filename: &str,
    ) -> Result<FileNumber, EngineError>;

    fn file_control(&mut self, key: TransferKey, control: FileControl) -> Result<(), EngineError>;

    /// Hand a chunk of an upload to the engine
    fn file_send_chunk(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError>;
}

/// Creates engine handles, either fresh or from a persisted state blob
pub trait EngineFactory: Send + 'static {
    type Engine: ToxEngine;

    fn create_or_load(&self, state: Option<&[u8]>) -> Result<Self::Engine, EngineError>;
}
