//! Engine Event Handlers
//!
//! Applies the events produced by one engine iteration to the session state,
//! in the order the engine produced them. Events about friends or transfers
//! the session does not know are logged and skipped.

use tokio::time::Instant;
use toxsession_core::{
    Connection, ConnectionState, EngineError, EngineEvent, FileControl, FileKind, FileNumber, FileTransfer,
    Friend, FriendNumber, FriendStatus, MessageKind, Notification, PausedBy, Timestamp,
    ToxEngine, TransferKey, TransferStatus,
};
use tracing::{debug, info, trace, warn};

use super::state::SessionState;
use crate::context::ContextToken;
use crate::managers::ConnectionEvent;

/// Event handlers for the session task
pub struct EventHandlers;

impl EventHandlers {
    /// Dispatch one engine event
    pub fn handle_event<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        event: EngineEvent,
    ) {
        trace!("Applying engine event {}", event.name());
        state.stats.events_processed += 1;

        match event {
            EngineEvent::SelfConnection { status } => {
                Self::handle_self_connection(state, token, status)
            }
            EngineEvent::FriendRequest {
                public_key,
                message,
            } => {
                info!("Friend request from {}", public_key);
                state.notify(Notification::FriendRequestReceived {
                    public_key,
                    message,
                });
            }
            EngineEvent::FriendConnection { friend, status } => {
                Self::handle_friend_connection(state, token, friend, status)
            }
            EngineEvent::FriendName { friend, name } => {
                Self::update_friend(state, token, friend, |f| f.name = name)
            }
            EngineEvent::FriendStatusMessage { friend, message } => {
                Self::update_friend(state, token, friend, |f| f.status_message = message)
            }
            EngineEvent::FriendMessage { friend, kind, text } => {
                Self::handle_friend_message(state, friend, kind, text)
            }
            EngineEvent::FriendReadReceipt { friend, message } => {
                state.notify(Notification::MessageDelivered { friend, message });
            }
            EngineEvent::FileOffered {
                friend,
                file,
                kind,
                size,
                filename,
            } => Self::handle_file_offered(state, token, friend, file, kind, size, filename),
            EngineEvent::FileChunkRequested {
                friend,
                file,
                position,
                length,
            } => Self::handle_chunk_requested(state, token, friend, file, position, length),
            EngineEvent::FileChunkReceived {
                friend,
                file,
                position,
                data,
            } => Self::handle_chunk_received(state, token, friend, file, position, data),
            EngineEvent::FileControlReceived { key, control } => {
                Self::handle_remote_control(state, token, key, control)
            }
            EngineEvent::FileClosed { key } => {
                if state.transfers_mut(token).remove(key).is_some() {
                    debug!("Transfer {} closed", key);
                    state.notify(Notification::FileCancelled { key });
                } else {
                    Self::ignore(state, format_args!("close of unknown transfer {}", key));
                }
            }
        }
    }

    fn ignore<E: ToxEngine>(state: &mut SessionState<E>, what: std::fmt::Arguments<'_>) {
        warn!("Ignoring {}", what);
        state.stats.events_ignored += 1;
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    fn handle_self_connection<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        status: Connection,
    ) {
        if status.is_connected() {
            state.transition(token, ConnectionEvent::EngineConnected(status));
            return;
        }

        let Some(transition) = state.transition(token, ConnectionEvent::EngineDisconnected)
        else {
            return;
        };
        // Lost the network while the application still wants to be online
        if transition.from == ConnectionState::Online && state.connection().has_policy() {
            let connection = state.connection_mut(token);
            connection.reset_backoff();
            if let Some(delay) = connection.schedule_retry(Instant::now()) {
                info!("Connection lost, reconnecting in {}ms", delay);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Friends
    // ------------------------------------------------------------------------

    fn handle_friend_connection<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        status: Connection,
    ) {
        let (new_status, display_name) = match state.friends_mut(token).lookup_mut(friend) {
            Some(entry) => {
                if !entry.set_connection(status, Timestamp::now()) {
                    return;
                }
                (entry.status, entry.display_name())
            }
            None => {
                Self::ignore(state, format_args!("connection report for unknown friend {}", friend));
                return;
            }
        };
        info!("Friend {} ({}) is now {:?}", friend, display_name, new_status);
        state.notify(Notification::FriendStatusChanged {
            friend,
            status: new_status,
        });

        if new_status == FriendStatus::Offline {
            // Transfers cannot survive the friend going offline
            for (key, transfer) in state.transfers_mut(token).drain_friend(friend) {
                debug!(
                    "Dropping {} at {}/{} bytes",
                    key, transfer.transferred, transfer.size
                );
                let notification = if transfer.status.is_active() {
                    Notification::FileFailed {
                        key,
                        reason: format!("friend {} went offline", friend),
                    }
                } else {
                    // Already cancelled here; the engine will not close it now
                    Notification::FileCancelled { key }
                };
                state.notify(notification);
            }
        }
    }

    fn update_friend<E: ToxEngine, F: FnOnce(&mut Friend)>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        update: F,
    ) {
        match state.friends_mut(token).lookup_mut(friend) {
            Some(entry) => update(entry),
            None => {
                Self::ignore(state, format_args!("profile update for unknown friend {}", friend));
                return;
            }
        }
        state.request_checkpoint();
        state.notify(Notification::FriendUpdated { friend });
    }

    fn handle_friend_message<E: ToxEngine>(
        state: &mut SessionState<E>,
        friend: FriendNumber,
        kind: MessageKind,
        text: String,
    ) {
        if !state.friends().contains(friend) {
            Self::ignore(state, format_args!("message from unknown friend {}", friend));
            return;
        }
        state.stats.messages_received += 1;
        state.notify(Notification::MessageReceived { friend, kind, text });
    }

    // ------------------------------------------------------------------------
    // File Transfers
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn handle_file_offered<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        file: FileNumber,
        kind: FileKind,
        size: u64,
        filename: String,
    ) {
        if !state.friends().contains(friend) {
            Self::ignore(state, format_args!("file offer from unknown friend {}", friend));
            return;
        }
        let key = TransferKey::download(friend, file);
        let max_size = state.config().transfers.max_file_size;
        if size > max_size {
            warn!(
                "Refusing {} from {}: {} bytes exceeds the {} byte limit",
                filename, friend, size, max_size
            );
            if let Err(e) = state
                .engine_mut(token)
                .file_control(key, FileControl::Cancel)
            {
                Self::check_fatal(state, e);
            }
            state.stats.events_ignored += 1;
            return;
        }
        let transfer = FileTransfer::download(kind, filename.clone(), size);
        if let Err(e) = state.transfers_mut(token).register(key, transfer) {
            warn!("Dropping file offer: {}", e);
            return;
        }
        info!("Friend {} offers {} ({} bytes)", friend, filename, size);
        state.notify(Notification::FileOffered {
            key,
            kind,
            filename,
            size,
        });
    }

    fn handle_chunk_requested<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        length: usize,
    ) {
        let key = TransferKey::upload(friend, file);
        let Some(status) = state.transfers().lookup(key).map(|t| t.status) else {
            Self::ignore(state, format_args!("chunk request for unknown upload {}", key));
            return;
        };
        if !Self::moves_data(status) {
            Self::ignore(state, format_args!("chunk request for {} while {:?}", key, status));
            return;
        }

        if length == 0 {
            Self::finish(state, token, key);
            return;
        }

        let length = length.min(state.config().transfers.max_chunk_size);
        let chunk = state
            .transfers_mut(token)
            .lookup_mut(key)
            .and_then(|transfer| {
                // The first request means the friend accepted the offer
                if transfer.status == TransferStatus::Pending {
                    transfer.status = TransferStatus::Running;
                }
                transfer.source_mut().map(|source| source.read_at(position, length))
            });

        let data = match chunk {
            Some(Ok(data)) => data,
            Some(Err(e)) => {
                Self::fail(state, token, key, format!("read failed: {}", e));
                return;
            }
            None => {
                Self::fail(state, token, key, "upload has no source".to_string());
                return;
            }
        };

        if let Err(e) = state
            .engine_mut(token)
            .file_send_chunk(friend, file, position, &data)
        {
            let reason = format!("engine refused chunk: {}", e);
            Self::check_fatal(state, e);
            Self::fail(state, token, key, reason);
            return;
        }

        let transferred = position.saturating_add(data.len() as u64);
        Self::progress(state, token, key, transferred);
    }

    fn handle_chunk_received<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: Vec<u8>,
    ) {
        let key = TransferKey::download(friend, file);
        let Some((status, size)) = state.transfers().lookup(key).map(|t| (t.status, t.size))
        else {
            Self::ignore(state, format_args!("chunk for unknown download {}", key));
            return;
        };
        if !Self::moves_data(status) {
            Self::ignore(state, format_args!("chunk for {} while {:?}", key, status));
            return;
        }

        let end = match position.checked_add(data.len() as u64) {
            Some(end) if end <= size => end,
            _ => {
                let reason = format!(
                    "chunk of {} bytes at {} overruns the {} byte file",
                    data.len(),
                    position,
                    size
                );
                Self::fail(state, token, key, reason);
                return;
            }
        };

        let written = state
            .transfers_mut(token)
            .lookup_mut(key)
            .and_then(|transfer| transfer.sink_mut())
            .map(|sink| {
                if data.is_empty() {
                    return sink.finish().map(|()| true);
                }
                sink.write_at(position, &data)?;
                if end == size {
                    sink.finish().map(|()| true)
                } else {
                    Ok(false)
                }
            });

        match written {
            Some(Ok(true)) => {
                let transferred = end.max(
                    state
                        .transfers()
                        .lookup(key)
                        .map_or(0, |transfer| transfer.transferred),
                );
                state.transfers_mut(token).update(key, transferred, status);
                Self::finish(state, token, key);
            }
            Some(Ok(false)) => Self::progress(state, token, key, end),
            Some(Err(e)) => Self::fail(state, token, key, format!("write failed: {}", e)),
            None => Self::ignore(state, format_args!("chunk for unaccepted download {}", key)),
        }
    }

    /// Chunks only flow for transfers that are neither paused nor on their
    /// way out
    fn moves_data(status: TransferStatus) -> bool {
        matches!(status, TransferStatus::Pending | TransferStatus::Running)
    }

    fn handle_remote_control<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
        control: FileControl,
    ) {
        let Some(transfer) = state.transfers_mut(token).lookup_mut(key) else {
            Self::ignore(state, format_args!("{:?} for unknown transfer {}", control, key));
            return;
        };

        // Locally cancelled, waiting for the engine to close it
        if !transfer.status.is_active() && control != FileControl::Cancel {
            debug!("Ignoring {:?} for {} in state {:?}", control, key, transfer.status);
            return;
        }

        match control {
            FileControl::Resume => {
                transfer.status = TransferStatus::Running;
                transfer.paused_by = None;
                debug!("Peer resumed {}", key);
                state.notify(Notification::FileResumed { key });
            }
            FileControl::Pause => {
                transfer.status = TransferStatus::Paused;
                transfer.paused_by = Some(PausedBy::Remote);
                debug!("Peer paused {}", key);
                state.notify(Notification::FilePaused {
                    key,
                    by: PausedBy::Remote,
                });
            }
            FileControl::Cancel => {
                state.transfers_mut(token).remove(key);
                info!("Peer cancelled {}", key);
                state.notify(Notification::FileCancelled { key });
            }
        }
    }

    fn progress<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
        transferred: u64,
    ) {
        let Some((transferred, size, status)) = state
            .transfers()
            .lookup(key)
            .map(|t| (transferred.max(t.transferred), t.size, t.status))
        else {
            return;
        };
        if state.transfers_mut(token).update(key, transferred, status) {
            state.notify(Notification::FileProgress {
                key,
                transferred,
                size,
            });
        }
    }

    fn finish<E: ToxEngine>(state: &mut SessionState<E>, token: &ContextToken, key: TransferKey) {
        let transferred = match state.transfers().lookup(key) {
            Some(transfer) => transfer.transferred,
            None => return,
        };
        let transfers = state.transfers_mut(token);
        transfers.update(key, transferred, TransferStatus::Finished);
        if let Some(transfer) = transfers.remove(key) {
            info!(
                "Transfer {} finished ({} bytes, complete: {})",
                key,
                transfer.transferred,
                transfer.is_complete()
            );
            state.notify(Notification::FileFinished { key });
        }
    }

    /// Record an engine error that leaves the handle unusable
    fn check_fatal<E: ToxEngine>(state: &mut SessionState<E>, error: EngineError) {
        if error.is_fatal() {
            state.engine_failed(error);
        }
    }

    /// Abort a transfer the session can no longer drive
    fn fail<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
        reason: String,
    ) {
        warn!("Transfer {} failed: {}", key, reason);
        if let Err(e) = state.engine_mut(token).file_control(key, FileControl::Cancel) {
            debug!("Engine cancel of {} failed: {}", key, e);
            Self::check_fatal(state, e);
        }
        state.transfers_mut(token).remove(key);
        state.notify(Notification::FileFailed { key, reason });
    }
}
