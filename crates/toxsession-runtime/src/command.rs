//! Commands into the session task
//!
//! Every public session operation becomes one [`Command`] on the bounded
//! command channel. Each command carries the oneshot its caller awaits.

use tokio::sync::{mpsc, oneshot};
use toxsession_core::{
    BootstrapConfig, ChunkSink, ChunkSource, ClientId, ConnectionState, FileKind, Friend,
    FriendNumber, MessageId, MessageKind, PublicKey, SessionResult, ToxAddress, TransferInfo,
    TransferKey,
};

use crate::logic::state::{SessionStats, TickReport};

pub type Reply<T> = oneshot::Sender<SessionResult<T>>;
pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;

/// Create the bounded command channel
pub fn create_command_channel(buffer_size: usize) -> (CommandSender, CommandReceiver) {
    mpsc::channel(buffer_size)
}

/// Read-only questions answered from the task's state
#[derive(Debug)]
pub enum Query {
    ConnectionState(oneshot::Sender<ConnectionState>),
    ClientId(oneshot::Sender<ClientId>),
    Address(oneshot::Sender<ToxAddress>),
    Friends(oneshot::Sender<Vec<Friend>>),
    Friend(FriendNumber, oneshot::Sender<Option<Friend>>),
    Transfers(oneshot::Sender<Vec<TransferInfo>>),
    Stats(oneshot::Sender<SessionStats>),
}

pub enum Command {
    Connect {
        bootstrap: BootstrapConfig,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    AddFriend {
        address: String,
        message: String,
        reply: Reply<FriendNumber>,
    },
    AcceptFriendRequest {
        public_key: PublicKey,
        reply: Reply<FriendNumber>,
    },
    RemoveFriend {
        friend: FriendNumber,
        reply: Reply<usize>,
    },
    SendMessage {
        friend: FriendNumber,
        kind: MessageKind,
        text: String,
        reply: Reply<Vec<MessageId>>,
    },
    SendFile {
        friend: FriendNumber,
        kind: FileKind,
        filename: String,
        source: Box<dyn ChunkSource>,
        size: u64,
        reply: Reply<TransferKey>,
    },
    AcceptFile {
        key: TransferKey,
        sink: Box<dyn ChunkSink>,
        reply: Reply<()>,
    },
    CancelFile {
        key: TransferKey,
        reply: Reply<()>,
    },
    PauseFile {
        key: TransferKey,
        reply: Reply<()>,
    },
    ResumeFile {
        key: TransferKey,
        reply: Reply<()>,
    },
    SetName {
        name: String,
        reply: Reply<()>,
    },
    SetStatusMessage {
        message: String,
        reply: Reply<()>,
    },
    Query(Query),
    TickNow {
        reply: Reply<TickReport>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

impl Command {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "Connect",
            Command::Disconnect { .. } => "Disconnect",
            Command::AddFriend { .. } => "AddFriend",
            Command::AcceptFriendRequest { .. } => "AcceptFriendRequest",
            Command::RemoveFriend { .. } => "RemoveFriend",
            Command::SendMessage { .. } => "SendMessage",
            Command::SendFile { .. } => "SendFile",
            Command::AcceptFile { .. } => "AcceptFile",
            Command::CancelFile { .. } => "CancelFile",
            Command::PauseFile { .. } => "PauseFile",
            Command::ResumeFile { .. } => "ResumeFile",
            Command::SetName { .. } => "SetName",
            Command::SetStatusMessage { .. } => "SetStatusMessage",
            Command::Query(_) => "Query",
            Command::TickNow { .. } => "TickNow",
            Command::Shutdown { .. } => "Shutdown",
        }
    }
}
