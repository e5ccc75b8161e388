//! Session Command Handlers
//!
//! Contains the handling logic for every command the session task accepts.
//! Handlers validate first and only touch state once the engine has accepted
//! the operation, so a rejected command leaves the session unchanged.

use tokio::time::Instant;
use toxsession_core::{
    BootstrapConfig, ChunkSink, ChunkSource, ConnectionState, Direction, FileControl, FileKind,
    FileTransfer, Friend, FriendNumber, MessageId, MessageKind, Notification, PausedBy,
    PublicKey, SessionError, SessionResult, ToxAddress, ToxEngine, TransferKey, TransferStatus,
};
use tracing::{debug, info, warn};

use super::state::SessionState;
use crate::context::ContextToken;
use crate::managers::{BootstrapOutcome, ConnectionEvent};

/// Command handlers for the session task
pub struct CommandHandlers;

impl CommandHandlers {
    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Handle connect command
    pub fn handle_connect<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        bootstrap: BootstrapConfig,
    ) -> SessionResult<()> {
        bootstrap.validate()?;
        state.connection_mut(token).set_policy(bootstrap);

        if state.connection().state() == ConnectionState::Online {
            debug!("Connect requested while already online");
            return Ok(());
        }

        Self::run_bootstrap(state, token)
    }

    /// One bootstrap round: Connecting, then Offline with a retry scheduled
    /// when no node accepted.
    pub fn run_bootstrap<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
    ) -> SessionResult<()> {
        state.transition(token, ConnectionEvent::ConnectRequested);

        match state.bootstrap_round(token) {
            Ok(BootstrapOutcome::Accepted { attempts }) => {
                debug!("Bootstrap accepted after {} attempts", attempts);
                Ok(())
            }
            Ok(BootstrapOutcome::Exhausted { attempts }) => {
                warn!("No bootstrap node reachable after {} attempts", attempts);
                state.transition(token, ConnectionEvent::BootstrapExhausted);
                if let Some(delay) = state.connection_mut(token).schedule_retry(Instant::now()) {
                    info!("Retrying bootstrap in {}ms", delay);
                }
                Err(SessionError::Bootstrap { attempts })
            }
            Err(e) => {
                state.transition(token, ConnectionEvent::BootstrapExhausted);
                Err(e)
            }
        }
    }

    /// Handle disconnect command
    pub fn handle_disconnect<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
    ) -> SessionResult<()> {
        state.connection_mut(token).clear_policy();
        state.engine_mut(token).disconnect();
        state.transition(token, ConnectionEvent::DisconnectRequested);
        info!("Disconnected on request");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------------

    /// Handle add friend command
    pub fn handle_add_friend<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        address: &str,
        message: &str,
    ) -> SessionResult<FriendNumber> {
        let address: ToxAddress = address.parse()?;
        let number = state
            .engine_mut(token)
            .add_friend(&address, message)
            .map_err(|e| SessionError::rejected("add_friend", e))?;

        Self::insert_friend(state, token, Friend::new(number, address.public_key()));
        info!("Added friend {} ({})", number, address.public_key());
        Ok(number)
    }

    /// Handle accept friend request command
    pub fn handle_accept_friend_request<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        public_key: PublicKey,
    ) -> SessionResult<FriendNumber> {
        let number = state
            .engine_mut(token)
            .add_friend_norequest(&public_key)
            .map_err(|e| SessionError::rejected("add_friend_norequest", e))?;

        Self::insert_friend(state, token, Friend::new(number, public_key));
        info!("Accepted friend request from {} as {}", public_key, number);
        Ok(number)
    }

    fn insert_friend<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: Friend,
    ) {
        let number = friend.number;
        if state.friends_mut(token).insert(friend).is_some() {
            // The engine reused a number we still had; its old transfers are stale
            let stale = state.transfers_mut(token).remove_all_for_friend(number);
            warn!("Replaced stale roster entry {} ({} transfers dropped)", number, stale);
        }
        state.request_checkpoint();
    }

    /// Handle remove friend command. Returns the number of transfers removed
    /// along with the friend.
    pub fn handle_remove_friend<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
    ) -> SessionResult<usize> {
        if !state.friends().contains(friend) {
            return Err(SessionError::UnknownFriend(friend));
        }
        state
            .engine_mut(token)
            .delete_friend(friend)
            .map_err(|e| SessionError::rejected("delete_friend", e))?;

        let removed = state.transfers_mut(token).drain_friend(friend);
        for (key, _) in &removed {
            state.notify(Notification::FileCancelled { key: *key });
        }
        state.friends_mut(token).remove(friend);
        state.request_checkpoint();

        info!("Removed friend {} and {} transfers", friend, removed.len());
        Ok(removed.len())
    }

    fn require_online_friend<E: ToxEngine>(
        state: &SessionState<E>,
        friend: FriendNumber,
    ) -> SessionResult<()> {
        let entry = state
            .friends()
            .lookup(friend)
            .ok_or(SessionError::UnknownFriend(friend))?;
        if !entry.is_online() {
            return Err(SessionError::FriendOffline(friend));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Handle send message command. Text longer than the engine accepts is
    /// sent as several messages. When a later part fails, the ids of the
    /// parts already sent come back in [`SessionError::PartiallySent`].
    pub fn handle_send_message<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        kind: MessageKind,
        text: &str,
    ) -> SessionResult<Vec<MessageId>> {
        Self::require_online_friend(state, friend)?;
        if text.is_empty() {
            return Err(SessionError::invalid_input("message text is empty"));
        }

        let max = state.engine().max_message_length();
        let mut ids = Vec::new();
        for part in split_message(text, max) {
            match state.engine_mut(token).send_message(friend, kind, part) {
                Ok(id) => {
                    ids.push(id);
                    state.stats.messages_sent += 1;
                }
                Err(source) if ids.is_empty() => {
                    return Err(SessionError::rejected("send_message", source))
                }
                Err(source) => {
                    warn!("Message to {} cut short after {} parts", friend, ids.len());
                    return Err(SessionError::PartiallySent {
                        friend,
                        sent: ids,
                        source,
                    });
                }
            }
        }

        debug!("Sent {} message parts to {}", ids.len(), friend);
        Ok(ids)
    }

    // ------------------------------------------------------------------------
    // Profile
    // ------------------------------------------------------------------------

    /// Handle set name command
    pub fn handle_set_name<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        name: &str,
    ) -> SessionResult<()> {
        state
            .engine_mut(token)
            .set_name(name)
            .map_err(|e| SessionError::rejected("set_name", e))?;
        state.request_checkpoint();
        Ok(())
    }

    /// Handle set status message command
    pub fn handle_set_status_message<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        message: &str,
    ) -> SessionResult<()> {
        state
            .engine_mut(token)
            .set_status_message(message)
            .map_err(|e| SessionError::rejected("set_status_message", e))?;
        state.request_checkpoint();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // File Transfers
    // ------------------------------------------------------------------------

    /// Handle send file command. The upload waits in Pending until the friend
    /// accepts it.
    pub fn handle_send_file<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        friend: FriendNumber,
        kind: FileKind,
        filename: String,
        source: Box<dyn ChunkSource>,
        size: u64,
    ) -> SessionResult<TransferKey> {
        Self::require_online_friend(state, friend)?;
        if filename.is_empty() {
            return Err(SessionError::invalid_input("file name is empty"));
        }
        let max_size = state.config().transfers.max_file_size;
        if size > max_size {
            return Err(SessionError::invalid_input(format!(
                "file of {} bytes exceeds the {} byte limit",
                size, max_size
            )));
        }

        let file = state
            .engine_mut(token)
            .file_send(friend, kind, size, &filename)
            .map_err(|e| SessionError::rejected("file_send", e))?;
        let key = TransferKey::upload(friend, file);

        let transfer = FileTransfer::upload(kind, filename, size, source);
        if let Err(e) = state.transfers_mut(token).register(key, transfer) {
            // The engine offered a file we cannot track; withdraw it
            let _ = state.engine_mut(token).file_control(key, FileControl::Cancel);
            return Err(e);
        }

        info!("Offered {} bytes to {} as {}", size, friend, key);
        Ok(key)
    }

    /// Handle accept file command
    pub fn handle_accept_file<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
        sink: Box<dyn ChunkSink>,
    ) -> SessionResult<()> {
        if key.direction != Direction::Download {
            return Err(SessionError::invalid_input("only downloads can be accepted"));
        }
        Self::require_status(state, key, "accept", &[TransferStatus::Pending])?;

        Self::send_control(state, token, key, FileControl::Resume)?;
        if let Some(transfer) = state.transfers_mut(token).lookup_mut(key) {
            transfer.attach_sink(sink);
            transfer.status = TransferStatus::Running;
        }
        info!("Accepted download {}", key);
        Ok(())
    }

    /// Handle cancel file command. The entry stays Cancelled until the engine
    /// closes the transfer.
    pub fn handle_cancel_file<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
    ) -> SessionResult<()> {
        Self::require_status(
            state,
            key,
            "cancel",
            &[
                TransferStatus::Pending,
                TransferStatus::Running,
                TransferStatus::Paused,
            ],
        )?;

        Self::send_control(state, token, key, FileControl::Cancel)?;
        if let Some(transfer) = state.transfers_mut(token).lookup_mut(key) {
            transfer.status = TransferStatus::Cancelled;
        }
        info!("Cancelled transfer {}", key);
        Ok(())
    }

    /// Handle pause file command
    pub fn handle_pause_file<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
    ) -> SessionResult<()> {
        Self::require_status(state, key, "pause", &[TransferStatus::Running])?;

        Self::send_control(state, token, key, FileControl::Pause)?;
        if let Some(transfer) = state.transfers_mut(token).lookup_mut(key) {
            transfer.status = TransferStatus::Paused;
            transfer.paused_by = Some(PausedBy::Local);
        }
        debug!("Paused transfer {}", key);
        Ok(())
    }

    /// Handle resume file command. Only a local pause can be lifted locally.
    pub fn handle_resume_file<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
    ) -> SessionResult<()> {
        let status = Self::require_status(state, key, "resume", &[TransferStatus::Paused])?;
        let paused_by = state.transfers().lookup(key).and_then(|t| t.paused_by);
        if paused_by != Some(PausedBy::Local) {
            return Err(SessionError::InvalidTransferState {
                key,
                status,
                operation: "resume",
            });
        }

        Self::send_control(state, token, key, FileControl::Resume)?;
        if let Some(transfer) = state.transfers_mut(token).lookup_mut(key) {
            transfer.status = TransferStatus::Running;
            transfer.paused_by = None;
        }
        debug!("Resumed transfer {}", key);
        Ok(())
    }

    /// Check that a transfer exists and is in one of `allowed`
    fn require_status<E: ToxEngine>(
        state: &SessionState<E>,
        key: TransferKey,
        operation: &'static str,
        allowed: &[TransferStatus],
    ) -> SessionResult<TransferStatus> {
        let transfer = state
            .transfers()
            .lookup(key)
            .ok_or(SessionError::UnknownTransfer(key))?;
        if !allowed.contains(&transfer.status) {
            return Err(SessionError::InvalidTransferState {
                key,
                status: transfer.status,
                operation,
            });
        }
        Ok(transfer.status)
    }

    fn send_control<E: ToxEngine>(
        state: &mut SessionState<E>,
        token: &ContextToken,
        key: TransferKey,
        control: FileControl,
    ) -> SessionResult<()> {
        state
            .engine_mut(token)
            .file_control(key, control)
            .map_err(|e| SessionError::rejected("file_control", e))
    }
}

/// Split text into parts of at most `max_bytes`, never inside a character
pub fn split_message(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            parts.push(rest);
            break;
        }
        let mut cut = max_bytes;
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // A single character wider than the limit goes out on its own
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        parts.push(head);
        rest = tail;
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_text_is_single_part() {
        assert_eq!(split_message("hello", 10), vec!["hello"]);
        assert_eq!(split_message("hello", 5), vec!["hello"]);
    }

    #[test]
    fn test_split_on_byte_limit() {
        assert_eq!(split_message("abcdefgh", 3), vec!["abc", "def", "gh"]);
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        // 'é' is two bytes
        let parts = split_message("aéé", 2);
        assert_eq!(parts, vec!["a", "é", "é"]);
        assert_eq!(parts.concat(), "aéé");
    }

    #[test]
    fn test_split_wide_char_over_limit() {
        assert_eq!(split_message("😀a", 2), vec!["😀", "a"]);
    }
}
