//! Session Builder API
//!
//! Provides a builder-style API for hosts and tests: hand over an engine
//! factory, optionally a state store, configuration and notification sink,
//! and get back a [`SessionHandle`] to the running session.

use tokio::sync::mpsc;
use toxsession_core::{
    EngineFactory, MemoryStateStore, Notification, NotificationSink, SessionConfig, SessionError,
    SessionResult, StateStore,
};
use tracing::{debug, info};

use crate::command::create_command_channel;
use crate::context;
use crate::handle::SessionHandle;
use crate::logic::{SessionState, SessionTask};

// ----------------------------------------------------------------------------
// Session Builder
// ----------------------------------------------------------------------------

/// Builder for starting a session around an engine factory
pub struct SessionBuilder<F: EngineFactory> {
    factory: F,
    store: Box<dyn StateStore>,
    config: SessionConfig,
    sink: Option<Box<dyn NotificationSink>>,
}

impl<F: EngineFactory> SessionBuilder<F> {
    /// Create a new builder. State is kept in memory unless a store is given.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            store: Box::new(MemoryStateStore::new()),
            config: SessionConfig::default(),
            sink: None,
        }
    }

    /// Set the session configuration
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Persist engine state through `store`
    pub fn with_store<S: StateStore>(mut self, store: S) -> Self {
        self.store = Box::new(store);
        self
    }

    /// Deliver notifications to `sink` from a dedicated task. The handle's
    /// notification receiver is then unavailable.
    pub fn with_notification_sink<S: NotificationSink>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Open the engine and start the session task
    pub async fn build_and_start(mut self) -> SessionResult<SessionHandle> {
        self.config.validate()?;

        let blob = self.store.load()?;
        let fresh_identity = blob.is_none();
        let engine = self
            .factory
            .create_or_load(blob.as_deref())
            .map_err(SessionError::EngineInit)?;
        if fresh_identity {
            info!("Created a fresh identity");
        } else {
            info!("Restored identity from persisted state");
        }

        let (command_sender, command_receiver) =
            create_command_channel(self.config.channels.command_buffer_size);
        let (notification_sender, notification_receiver) = mpsc::unbounded_channel();

        let state = SessionState::new(
            engine,
            self.store,
            self.config,
            notification_sender,
            fresh_identity,
        );
        let task = SessionTask::new(state, command_receiver);
        let task_handle = tokio::spawn(context::enter(task.run()));

        let notifications = match self.sink {
            Some(sink) => {
                tokio::spawn(dispatch_notifications(notification_receiver, sink));
                None
            }
            None => Some(notification_receiver),
        };

        info!("Session started");
        Ok(SessionHandle::new(command_sender, notifications, task_handle))
    }
}

/// Forward notifications to a sink until the session drops its sender
async fn dispatch_notifications(
    mut receiver: mpsc::UnboundedReceiver<Notification>,
    mut sink: Box<dyn NotificationSink>,
) {
    while let Some(notification) = receiver.recv().await {
        sink.notify(notification);
    }
    debug!("Notification dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use toxsession_core::{ConnectionState, EngineError, TimerConfig};
    use toxsession_harness::{MockControl, MockEngineFactory};

    #[tokio::test]
    async fn test_builder_starts_session() {
        let factory = MockEngineFactory::new(MockControl::default());
        let session = SessionBuilder::new(factory)
            .with_config(SessionConfig::testing())
            .build_and_start()
            .await
            .unwrap();

        assert!(session.is_running());
        assert_eq!(
            session.connection_state().await.unwrap(),
            ConnectionState::Offline
        );

        session.shutdown().await.unwrap();
        assert!(!session.is_running());
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let factory = MockEngineFactory::new(MockControl::default());
        let config = SessionConfig::testing().with_timer(TimerConfig {
            min_interval_ms: 100,
            max_interval_ms: 10,
            initial_interval_ms: 50,
        });
        let result = SessionBuilder::new(factory)
            .with_config(config)
            .build_and_start()
            .await;
        assert!(matches!(result, Err(SessionError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_engine_creation_failure() {
        let control = MockControl::default();
        control.fail_create(EngineError::InitFailed {
            reason: "no entropy".to_string(),
        });
        let result = SessionBuilder::new(MockEngineFactory::new(control))
            .build_and_start()
            .await;
        assert!(matches!(result, Err(SessionError::EngineInit(_))));
    }

    #[tokio::test]
    async fn test_notification_sink_receives_events() {
        let control = MockControl::default();
        let received = Arc::new(Mutex::new(Vec::new()));
        let collected = received.clone();

        let session = SessionBuilder::new(MockEngineFactory::new(control.clone()))
            .with_config(SessionConfig::testing())
            .with_notification_sink(move |n: Notification| collected.lock().unwrap().push(n))
            .build_and_start()
            .await
            .unwrap();
        assert!(session.take_notification_receiver().is_none());

        control.go_online();
        session.tick_now().await.unwrap();
        session.shutdown().await.unwrap();

        let online = Notification::ConnectionChanged {
            state: ConnectionState::Online,
        };
        for _ in 0..100 {
            if received.lock().unwrap().contains(&online) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(received.lock().unwrap().contains(&online));
    }
}
