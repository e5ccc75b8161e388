//! Session Handle
//!
//! The caller-facing side of a running session. Every operation is sent to the
//! session task as a [`Command`] and resolves once the task has finished it.
//! Handles are cheap to clone and can be used from any task except the
//! session task itself.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc::UnboundedReceiver, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use toxsession_core::{
    BootstrapConfig, ChunkSink, ChunkSource, ClientId, ConnectionState, EngineError, FileKind,
    Friend, FriendNumber, MessageId, MessageKind, Notification, PublicKey, SessionError,
    SessionResult, ToxAddress, TransferInfo, TransferKey,
};
use tracing::{info, warn};

use crate::command::{Command, CommandSender, Query, Reply};
use crate::context::is_on_context;
use crate::logic::{SessionStats, TickReport};

/// How long `shutdown` waits for the session task to stop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

// ----------------------------------------------------------------------------
// Session Handle
// ----------------------------------------------------------------------------

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    command_sender: CommandSender,
    notifications: Arc<Mutex<Option<UnboundedReceiver<Notification>>>>,
    task_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        command_sender: CommandSender,
        notifications: Option<UnboundedReceiver<Notification>>,
        task_handle: JoinHandle<()>,
    ) -> Self {
        Self {
            command_sender,
            notifications: Arc::new(Mutex::new(notifications)),
            task_handle: Arc::new(Mutex::new(Some(task_handle))),
        }
    }

    /// Send a command built around a fresh reply channel and await the reply
    async fn request<T, F>(&self, build: F) -> SessionResult<T>
    where
        F: FnOnce(Reply<T>) -> Command,
    {
        debug_assert!(
            !is_on_context(),
            "session handle used from inside the session task"
        );
        let (reply, response) = oneshot::channel();
        self.command_sender
            .send(build(reply))
            .await
            .map_err(|_| SessionError::terminated("session task is not running"))?;
        response
            .await
            .map_err(|_| SessionError::terminated("session task dropped the request"))?
    }

    /// Ask a read-only question
    async fn query<T, F>(&self, build: F) -> SessionResult<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Query,
    {
        debug_assert!(
            !is_on_context(),
            "session handle used from inside the session task"
        );
        let (reply, response) = oneshot::channel();
        self.command_sender
            .send(Command::Query(build(reply)))
            .await
            .map_err(|_| SessionError::terminated("session task is not running"))?;
        response
            .await
            .map_err(|_| SessionError::terminated("session task dropped the query"))
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Join the network through the given bootstrap nodes
    pub async fn connect(&self, bootstrap: BootstrapConfig) -> SessionResult<()> {
        self.request(|reply| Command::Connect { bootstrap, reply })
            .await
            .map_err(|e| match e {
                // No engine handle left to bootstrap with
                SessionError::Terminated { reason } => {
                    SessionError::EngineInit(EngineError::InvalidHandle { reason })
                }
                other => other,
            })
    }

    pub async fn disconnect(&self) -> SessionResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    // ------------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------------

    /// Send a friend request to a 76 character hex address
    pub async fn add_friend(&self, address: &str, message: &str) -> SessionResult<FriendNumber> {
        let address = address.to_string();
        let message = message.to_string();
        self.request(|reply| Command::AddFriend {
            address,
            message,
            reply,
        })
        .await
    }

    /// Accept a received friend request
    pub async fn accept_friend_request(&self, public_key: PublicKey) -> SessionResult<FriendNumber> {
        self.request(|reply| Command::AcceptFriendRequest { public_key, reply })
            .await
    }

    /// Remove a friend along with its transfers; returns how many transfers went
    pub async fn remove_friend(&self, friend: FriendNumber) -> SessionResult<usize> {
        self.request(|reply| Command::RemoveFriend { friend, reply })
            .await
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    pub async fn send_message(
        &self,
        friend: FriendNumber,
        text: &str,
    ) -> SessionResult<Vec<MessageId>> {
        self.send_text(friend, MessageKind::Normal, text).await
    }

    /// Send a "/me" action
    pub async fn send_action(
        &self,
        friend: FriendNumber,
        text: &str,
    ) -> SessionResult<Vec<MessageId>> {
        self.send_text(friend, MessageKind::Action, text).await
    }

    async fn send_text(
        &self,
        friend: FriendNumber,
        kind: MessageKind,
        text: &str,
    ) -> SessionResult<Vec<MessageId>> {
        let text = text.to_string();
        self.request(|reply| Command::SendMessage {
            friend,
            kind,
            text,
            reply,
        })
        .await
    }

    // ------------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------------

    pub async fn set_name(&self, name: &str) -> SessionResult<()> {
        let name = name.to_string();
        self.request(|reply| Command::SetName { name, reply }).await
    }

    pub async fn set_status_message(&self, message: &str) -> SessionResult<()> {
        let message = message.to_string();
        self.request(|reply| Command::SetStatusMessage { message, reply })
            .await
    }

    // ------------------------------------------------------------------------
    // File Transfers
    // ------------------------------------------------------------------------

    /// Offer `size` bytes from `source` to a friend
    pub async fn send_file<S: ChunkSource + 'static>(
        &self,
        friend: FriendNumber,
        filename: &str,
        source: S,
        size: u64,
    ) -> SessionResult<TransferKey> {
        let filename = filename.to_string();
        self.request(|reply| Command::SendFile {
            friend,
            kind: FileKind::Data,
            filename,
            source: Box::new(source),
            size,
            reply,
        })
        .await
    }

    /// Accept an offered download, writing it into `sink`
    pub async fn accept_file<S: ChunkSink + 'static>(
        &self,
        key: TransferKey,
        sink: S,
    ) -> SessionResult<()> {
        self.request(|reply| Command::AcceptFile {
            key,
            sink: Box::new(sink),
            reply,
        })
        .await
    }

    pub async fn cancel_file(&self, key: TransferKey) -> SessionResult<()> {
        self.request(|reply| Command::CancelFile { key, reply }).await
    }

    pub async fn pause_file(&self, key: TransferKey) -> SessionResult<()> {
        self.request(|reply| Command::PauseFile { key, reply }).await
    }

    pub async fn resume_file(&self, key: TransferKey) -> SessionResult<()> {
        self.request(|reply| Command::ResumeFile { key, reply }).await
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn connection_state(&self) -> SessionResult<ConnectionState> {
        self.query(Query::ConnectionState).await
    }

    pub async fn client_id(&self) -> SessionResult<ClientId> {
        self.query(Query::ClientId).await
    }

    pub async fn address(&self) -> SessionResult<ToxAddress> {
        self.query(Query::Address).await
    }

    /// Roster snapshot in insertion order
    pub async fn friends(&self) -> SessionResult<Vec<Friend>> {
        self.query(Query::Friends).await
    }

    pub async fn friend(&self, number: FriendNumber) -> SessionResult<Option<Friend>> {
        self.query(|tx| Query::Friend(number, tx)).await
    }

    pub async fn transfers(&self) -> SessionResult<Vec<TransferInfo>> {
        self.query(Query::Transfers).await
    }

    pub async fn stats(&self) -> SessionResult<SessionStats> {
        self.query(Query::Stats).await
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Run one tick now instead of waiting for the timer
    pub async fn tick_now(&self) -> SessionResult<TickReport> {
        self.request(|reply| Command::TickNow { reply }).await
    }

    /// Take the notification receiver (can only be called once, and not at
    /// all when a notification sink was installed)
    pub fn take_notification_receiver(&self) -> Option<UnboundedReceiver<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Check if the session task is still running
    pub fn is_running(&self) -> bool {
        !self.command_sender.is_closed()
    }

    /// Persist the engine state and stop the session task. Shutting down a
    /// session that already stopped succeeds.
    pub async fn shutdown(&self) -> SessionResult<()> {
        info!("Shutting down session");

        let result = match self.request(|reply| Command::Shutdown { reply }).await {
            Err(SessionError::Terminated { .. }) => Ok(()),
            other => other,
        };

        let handle = self
            .task_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            match timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Session task ended abnormally: {}", e),
                Err(_) => warn!("Session task did not stop in time"),
            }
        }

        info!("Session shut down");
        result
    }
}
