//! Session Task Implementation
//!
//! Contains the task that owns the session state. It is the serialized
//! execution context: commands and timer ticks are handled one at a time from
//! a single `select!` loop, so no handler ever observes another half-done.

use tokio::time::Instant;
use toxsession_core::{Notification, SessionError, SessionResult, ToxEngine};
use tracing::{debug, error, info, warn};

use super::events::EventHandlers;
use super::handlers::CommandHandlers;
use super::state::{SessionState, TickReport};
use crate::command::{Command, CommandReceiver, Query, Reply};
use crate::context::ContextToken;
use crate::timer::TickTimer;

// ----------------------------------------------------------------------------
// Session Task
// ----------------------------------------------------------------------------

/// The task that drives one engine handle
pub struct SessionTask<E: ToxEngine> {
    state: SessionState<E>,
    commands: CommandReceiver,
    timer: TickTimer,
    token: ContextToken,
    running: bool,
}

impl<E: ToxEngine> SessionTask<E> {
    pub fn new(state: SessionState<E>, commands: CommandReceiver) -> Self {
        let timer = TickTimer::new(state.config().timer.clone());
        Self {
            state,
            commands,
            timer,
            token: ContextToken::new(),
            running: true,
        }
    }

    /// Run until shutdown, a closed command channel or a fatal engine error
    pub async fn run(mut self) {
        info!("Session task starting for {}", self.state.client_id());

        while self.running {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.process_command(command),
                        None => {
                            info!("Command channel closed, shutting down");
                            self.persist_on_exit();
                            break;
                        }
                    }
                }
                _ = self.timer.tick() => {
                    if let Err(e) = self.tick() {
                        debug!("Tick ended the session: {}", e);
                    }
                }
            }
        }

        info!("Session task stopped");
    }

    fn persist_on_exit(&mut self) {
        if let Err(e) = self.state.checkpoint(&self.token) {
            warn!("Final checkpoint failed: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn process_command(&mut self, command: Command) {
        debug!("Processing command {}", command.name());
        self.state.stats.commands_processed += 1;

        let state = &mut self.state;
        let token = &self.token;

        match command {
            Command::Connect { bootstrap, reply } => {
                let result = CommandHandlers::handle_connect(state, token, bootstrap);
                self.respond(reply, result);
            }
            Command::Disconnect { reply } => {
                let result = CommandHandlers::handle_disconnect(state, token);
                self.respond(reply, result);
            }
            Command::AddFriend {
                address,
                message,
                reply,
            } => {
                let result = CommandHandlers::handle_add_friend(state, token, &address, &message);
                self.respond(reply, result);
            }
            Command::AcceptFriendRequest { public_key, reply } => {
                let result =
                    CommandHandlers::handle_accept_friend_request(state, token, public_key);
                self.respond(reply, result);
            }
            Command::RemoveFriend { friend, reply } => {
                let result = CommandHandlers::handle_remove_friend(state, token, friend);
                self.respond(reply, result);
            }
            Command::SendMessage {
                friend,
                kind,
                text,
                reply,
            } => {
                let result =
                    CommandHandlers::handle_send_message(state, token, friend, kind, &text);
                self.respond(reply, result);
            }
            Command::SendFile {
                friend,
                kind,
                filename,
                source,
                size,
                reply,
            } => {
                let result = CommandHandlers::handle_send_file(
                    state, token, friend, kind, filename, source, size,
                );
                self.respond(reply, result);
            }
            Command::AcceptFile { key, sink, reply } => {
                let result = CommandHandlers::handle_accept_file(state, token, key, sink);
                self.respond(reply, result);
            }
            Command::CancelFile { key, reply } => {
                let result = CommandHandlers::handle_cancel_file(state, token, key);
                self.respond(reply, result);
            }
            Command::PauseFile { key, reply } => {
                let result = CommandHandlers::handle_pause_file(state, token, key);
                self.respond(reply, result);
            }
            Command::ResumeFile { key, reply } => {
                let result = CommandHandlers::handle_resume_file(state, token, key);
                self.respond(reply, result);
            }
            Command::SetName { name, reply } => {
                let result = CommandHandlers::handle_set_name(state, token, &name);
                self.respond(reply, result);
            }
            Command::SetStatusMessage { message, reply } => {
                let result = CommandHandlers::handle_set_status_message(state, token, &message);
                self.respond(reply, result);
            }
            Command::Query(query) => self.answer(query),
            Command::TickNow { reply } => {
                let _ = reply.send(self.tick());
            }
            Command::Shutdown { reply } => {
                info!("Shutdown requested");
                let result = self.state.checkpoint(&self.token).map_err(SessionError::from);
                self.running = false;
                let _ = reply.send(result);
            }
        }
    }

    /// Hand a handler's result to its caller. A dead engine handle ends the
    /// session before the caller hears back.
    fn respond<T>(&mut self, reply: Reply<T>, result: SessionResult<T>) {
        if let Err(e) = &result {
            if let Some(engine_error) = e.engine_error().filter(|e| e.is_fatal()) {
                self.terminate(engine_error.to_string());
            }
        }
        // A caller that stopped waiting is not an error
        let _ = reply.send(result);
    }

    fn answer(&self, query: Query) {
        let state = &self.state;
        match query {
            Query::ConnectionState(tx) => {
                let _ = tx.send(state.connection().state());
            }
            Query::ClientId(tx) => {
                let _ = tx.send(state.client_id().clone());
            }
            Query::Address(tx) => {
                let _ = tx.send(state.address());
            }
            Query::Friends(tx) => {
                let _ = tx.send(state.friends().all().cloned().collect());
            }
            Query::Friend(number, tx) => {
                let _ = tx.send(state.friends().lookup(number).cloned());
            }
            Query::Transfers(tx) => {
                let _ = tx.send(state.transfers().snapshot());
            }
            Query::Stats(tx) => {
                let _ = tx.send(state.stats_snapshot());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// One iteration: pending reconnect, engine events, timer, checkpoint
    fn tick(&mut self) -> SessionResult<TickReport> {
        self.state.stats.ticks += 1;

        if self.state.connection().retry_due(Instant::now()) {
            self.state.stats.bootstrap_retries += 1;
            info!("Retrying bootstrap");
            match CommandHandlers::run_bootstrap(&mut self.state, &self.token) {
                Ok(()) | Err(SessionError::Bootstrap { .. }) => {}
                Err(e) if e.is_fatal() => return Err(self.terminate(e.to_string())),
                Err(e) => warn!("Bootstrap retry failed: {}", e),
            }
        }

        let events = match self.state.engine_mut(&self.token).iterate() {
            Ok(events) => events,
            Err(e) if e.is_fatal() => return Err(self.terminate(e.to_string())),
            Err(e) => {
                warn!("Engine iteration failed: {}", e);
                self.state.notify(Notification::Diagnostic {
                    message: format!("engine iteration failed: {}", e),
                });
                Vec::new()
            }
        };

        let count = events.len();
        for event in events {
            EventHandlers::handle_event(&mut self.state, &self.token, event);
        }
        if let Some(e) = self.state.take_engine_failure() {
            return Err(self.terminate(e.to_string()));
        }

        let recommended = self.state.engine().iteration_interval();
        let rescheduled = self.timer.reschedule(recommended);
        if rescheduled {
            self.state.stats.timer_reschedules += 1;
            debug!("Tick interval now {}ms", self.timer.interval_ms());
        }

        let mut checkpointed = false;
        if self.state.checkpoint_pending() {
            match self.state.checkpoint(&self.token) {
                Ok(()) => checkpointed = true,
                Err(e) => self.state.notify(Notification::Diagnostic {
                    message: format!("checkpoint failed: {}", e),
                }),
            }
        }

        Ok(TickReport {
            events: count,
            interval_ms: self.timer.interval_ms(),
            rescheduled,
            checkpointed,
        })
    }

    /// Stop after the engine handle became unusable
    fn terminate(&mut self, reason: String) -> SessionError {
        error!("Engine failed fatally, stopping session: {}", reason);
        self.state.notify(Notification::SessionTerminated {
            reason: reason.clone(),
        });
        self.running = false;
        SessionError::terminated(reason)
    }
}
