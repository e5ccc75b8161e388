//! Notifications leaving the session
//!
//! The session never calls into the application from its serialized context.
//! Everything the application may want to react to is pushed as a
//! [`Notification`] onto a channel and consumed on the other side, either
//! directly or through a [`NotificationSink`].

use serde::{Deserialize, Serialize};

use crate::engine::{FileKind, MessageKind};
use crate::friends::FriendStatus;
use crate::transfer::{PausedBy, TransferKey};
use crate::types::{ConnectionState, FriendNumber, MessageId, PublicKey};

/// Something observable happened in the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    ConnectionChanged {
        state: ConnectionState,
    },
    FriendRequestReceived {
        public_key: PublicKey,
        message: String,
    },
    FriendStatusChanged {
        friend: FriendNumber,
        status: FriendStatus,
    },
    /// Name or status message of a friend changed
    FriendUpdated {
        friend: FriendNumber,
    },
    MessageReceived {
        friend: FriendNumber,
        kind: MessageKind,
        text: String,
    },
    MessageDelivered {
        friend: FriendNumber,
        message: MessageId,
    },
    FileOffered {
        key: TransferKey,
        kind: FileKind,
        filename: String,
        size: u64,
    },
    FileProgress {
        key: TransferKey,
        transferred: u64,
        size: u64,
    },
    FileFinished {
        key: TransferKey,
    },
    FileCancelled {
        key: TransferKey,
    },
    FilePaused {
        key: TransferKey,
        by: PausedBy,
    },
    FileResumed {
        key: TransferKey,
    },
    /// A transfer was dropped because it could not continue
    FileFailed {
        key: TransferKey,
        reason: String,
    },
    /// A non-fatal problem during a tick
    Diagnostic {
        message: String,
    },
    /// The engine failed fatally; the session has stopped
    SessionTerminated {
        reason: String,
    },
}

/// Discriminant of a [`Notification`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    Connection,
    FriendRequest,
    FriendStatus,
    FriendUpdate,
    Message,
    Delivery,
    FileOffer,
    FileProgress,
    FileFinished,
    FileCancelled,
    FileControl,
    FileFailed,
    Diagnostic,
    Terminated,
}

/// The entity a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Session,
    Friend(FriendNumber),
    Transfer(TransferKey),
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::ConnectionChanged { .. } => NotificationKind::Connection,
            Notification::FriendRequestReceived { .. } => NotificationKind::FriendRequest,
            Notification::FriendStatusChanged { .. } => NotificationKind::FriendStatus,
            Notification::FriendUpdated { .. } => NotificationKind::FriendUpdate,
            Notification::MessageReceived { .. } => NotificationKind::Message,
            Notification::MessageDelivered { .. } => NotificationKind::Delivery,
            Notification::FileOffered { .. } => NotificationKind::FileOffer,
            Notification::FileProgress { .. } => NotificationKind::FileProgress,
            Notification::FileFinished { .. } => NotificationKind::FileFinished,
            Notification::FileCancelled { .. } => NotificationKind::FileCancelled,
            Notification::FilePaused { .. } | Notification::FileResumed { .. } => {
                NotificationKind::FileControl
            }
            Notification::FileFailed { .. } => NotificationKind::FileFailed,
            Notification::Diagnostic { .. } => NotificationKind::Diagnostic,
            Notification::SessionTerminated { .. } => NotificationKind::Terminated,
        }
    }

    pub fn entity(&self) -> EntityId {
        match self {
            Notification::ConnectionChanged { .. }
            | Notification::FriendRequestReceived { .. }
            | Notification::Diagnostic { .. }
            | Notification::SessionTerminated { .. } => EntityId::Session,
            Notification::FriendStatusChanged { friend, .. }
            | Notification::FriendUpdated { friend }
            | Notification::MessageReceived { friend, .. }
            | Notification::MessageDelivered { friend, .. } => EntityId::Friend(*friend),
            Notification::FileOffered { key, .. }
            | Notification::FileProgress { key, .. }
            | Notification::FileFinished { key }
            | Notification::FileCancelled { key }
            | Notification::FilePaused { key, .. }
            | Notification::FileResumed { key }
            | Notification::FileFailed { key, .. } => EntityId::Transfer(*key),
        }
    }
}

// ----------------------------------------------------------------------------
// Notification Sink
// ----------------------------------------------------------------------------

/// Consumer of notifications, driven outside the serialized context
pub trait NotificationSink: Send + 'static {
    fn notify(&mut self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: FnMut(Notification) + Send + 'static,
{
    fn notify(&mut self, notification: Notification) {
        self(notification)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileNumber;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_kind_and_entity() {
        let key = TransferKey::upload(FriendNumber(2), FileNumber(0));

        let n = Notification::FilePaused {
            key,
            by: PausedBy::Remote,
        };
        assert_eq!(n.kind(), NotificationKind::FileControl);
        assert_eq!(n.entity(), EntityId::Transfer(key));

        let n = Notification::FriendStatusChanged {
            friend: FriendNumber(2),
            status: FriendStatus::Online,
        };
        assert_eq!(n.kind(), NotificationKind::FriendStatus);
        assert_eq!(n.entity(), EntityId::Friend(FriendNumber(2)));

        let n = Notification::ConnectionChanged {
            state: ConnectionState::Online,
        };
        assert_eq!(n.entity(), EntityId::Session);
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let mut sink = move |n: Notification| captured.lock().unwrap().push(n.kind());

        sink.notify(Notification::Diagnostic {
            message: "slow tick".to_string(),
        });
        assert_eq!(*seen.lock().unwrap(), vec![NotificationKind::Diagnostic]);
    }
}
