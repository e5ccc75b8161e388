//! Mock Engine for Testing
//!
//! A deterministic, in-memory stand-in for the Tox engine. Tests keep a
//! [`MockControl`] handle to script what the engine reports on the next
//! iteration, force individual operations to fail, and inspect every call the
//! session made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use toxsession_core::{
    BootstrapNode, Connection, EngineError, EngineEvent, EngineFactory, FileControl, FileKind,
    FileNumber, FriendNumber, FriendRecord, MessageId, MessageKind, PublicKey, ToxAddress,
    ToxEngine, TransferKey,
};

/// Longest friend request message the mock accepts
pub const MAX_FRIEND_REQUEST_LENGTH: usize = 1016;

// ----------------------------------------------------------------------------
// Recorded Calls
// ----------------------------------------------------------------------------

/// One call the session made into the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Bootstrap {
        host: String,
        port: u16,
    },
    Disconnect,
    Iterate,
    AddFriend {
        address: ToxAddress,
        message: String,
    },
    AddFriendNoRequest {
        public_key: PublicKey,
    },
    DeleteFriend {
        friend: FriendNumber,
    },
    SendMessage {
        friend: FriendNumber,
        kind: MessageKind,
        text: String,
    },
    SetName {
        name: String,
    },
    SetStatusMessage {
        message: String,
    },
    FileSend {
        friend: FriendNumber,
        kind: FileKind,
        size: u64,
        filename: String,
    },
    FileControl {
        key: TransferKey,
        control: FileControl,
    },
    FileSendChunk {
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: Vec<u8>,
    },
}

impl EngineCall {
    /// Whether the call changes engine state (iteration aside)
    pub fn is_mutation(&self) -> bool {
        !matches!(self, EngineCall::Iterate)
    }
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockFriend {
    record: FriendRecord,
    nospam: Option<[u8; 4]>,
    next_file: u32,
}

#[derive(Debug)]
struct MockState {
    public_key: PublicKey,
    nospam: [u8; 4],
    name: String,
    status_message: String,
    friends: Vec<MockFriend>,
    forced_friend_number: Option<FriendNumber>,
    next_message: u32,
    interval_ms: u64,
    max_message_length: usize,
    bootstrap_accepts: bool,
    pending_events: VecDeque<EngineEvent>,
    failures: FailureQueue,
    iterate_failure: Option<EngineError>,
    create_failure: Option<EngineError>,
    loaded_from: Option<Vec<u8>>,
    calls: Vec<EngineCall>,
    iterations: usize,
    call_delay: Option<Duration>,
}

impl MockState {
    fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            nospam: [0x0B, 0xAD, 0xF0, 0x0D],
            name: String::new(),
            status_message: String::new(),
            friends: Vec::new(),
            forced_friend_number: None,
            next_message: 1,
            interval_ms: 50,
            max_message_length: toxsession_core::engine::MAX_MESSAGE_LENGTH,
            bootstrap_accepts: true,
            pending_events: VecDeque::new(),
            failures: FailureQueue::default(),
            iterate_failure: None,
            create_failure: None,
            loaded_from: None,
            calls: Vec::new(),
            iterations: 0,
            call_delay: None,
        }
    }

    fn friend_mut(&mut self, number: FriendNumber) -> Option<&mut MockFriend> {
        self.friends.iter_mut().find(|f| f.record.number == number)
    }

    fn has_friend(&self, number: FriendNumber) -> bool {
        self.friends.iter().any(|f| f.record.number == number)
    }

    /// Lowest unused number, unless a test forced one
    fn allocate_friend_number(&mut self) -> FriendNumber {
        if let Some(number) = self.forced_friend_number.take() {
            return number;
        }
        let mut candidate = 0;
        while self.has_friend(FriendNumber(candidate)) {
            candidate += 1;
        }
        FriendNumber(candidate)
    }

    fn insert_friend(&mut self, public_key: PublicKey, nospam: Option<[u8; 4]>) -> FriendNumber {
        let number = self.allocate_friend_number();
        self.friends.push(MockFriend {
            record: FriendRecord {
                number,
                public_key,
                name: String::new(),
                status_message: String::new(),
                last_seen: None,
            },
            nospam,
            next_file: 0,
        });
        number
    }

    fn take_failure(&mut self, operation: &'static str) -> Result<(), EngineError> {
        match self.failures.take(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn snapshot(&self) -> MockSnapshot {
        MockSnapshot {
            public_key: self.public_key,
            nospam: u32::from_be_bytes(self.nospam),
            name: self.name.clone(),
            status_message: self.status_message.clone(),
            friends: self.friends.iter().map(|f| f.record.clone()).collect(),
        }
    }

    fn restore(&mut self, snapshot: MockSnapshot) {
        self.public_key = snapshot.public_key;
        self.nospam = snapshot.nospam.to_be_bytes();
        self.name = snapshot.name;
        self.status_message = snapshot.status_message;
        self.friends = snapshot
            .friends
            .into_iter()
            .map(|record| MockFriend {
                record,
                nospam: None,
                next_file: 0,
            })
            .collect();
    }
}

/// What the mock writes into its state blob
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MockSnapshot {
    public_key: PublicKey,
    nospam: u32,
    name: String,
    status_message: String,
    friends: Vec<FriendRecord>,
}

/// Per-operation failures, consumed one at a time in FIFO order. Each entry
/// lets a number of calls succeed before it fires.
#[derive(Debug, Default)]
struct FailureQueue(Vec<ScheduledFailure>);

#[derive(Debug)]
struct ScheduledFailure {
    operation: &'static str,
    skip: usize,
    error: EngineError,
}

impl FailureQueue {
    fn push(&mut self, operation: &'static str, skip: usize, error: EngineError) {
        self.0.push(ScheduledFailure {
            operation,
            skip,
            error,
        });
    }

    fn take(&mut self, operation: &'static str) -> Option<EngineError> {
        let index = self.0.iter().position(|f| f.operation == operation)?;
        if self.0[index].skip > 0 {
            self.0[index].skip -= 1;
            return None;
        }
        Some(self.0.remove(index).error)
    }
}

// ----------------------------------------------------------------------------
// Control Handle
// ----------------------------------------------------------------------------

/// Test-side handle onto the mock engine's shared state
#[derive(Debug, Clone)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
    in_call: Arc<AtomicUsize>,
    max_in_call: Arc<AtomicUsize>,
}

impl MockControl {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::new(public_key))),
            in_call: Arc::new(AtomicUsize::new(0)),
            max_in_call: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Own address of the engine
    pub fn address(&self) -> ToxAddress {
        let state = self.lock();
        ToxAddress::from_parts(state.public_key, state.nospam)
    }

    /// Queue an event for the next iteration
    pub fn push_event(&self, event: EngineEvent) {
        self.lock().pending_events.push_back(event);
    }

    pub fn push_events<I: IntoIterator<Item = EngineEvent>>(&self, events: I) {
        self.lock().pending_events.extend(events);
    }

    /// Queue the engine reporting that we joined the network
    pub fn go_online(&self) {
        self.push_event(EngineEvent::SelfConnection {
            status: Connection::Udp,
        });
    }

    /// Queue the engine reporting that we lost the network
    pub fn go_offline(&self) {
        self.push_event(EngineEvent::SelfConnection {
            status: Connection::None,
        });
    }

    /// Queue a friend connection change
    pub fn set_friend_connection(&self, friend: FriendNumber, status: Connection) {
        self.push_event(EngineEvent::FriendConnection { friend, status });
    }

    pub fn pending_event_count(&self) -> usize {
        self.lock().pending_events.len()
    }

    /// Recommended iteration interval from now on
    pub fn set_interval(&self, interval_ms: u64) {
        self.lock().interval_ms = interval_ms;
    }

    pub fn set_max_message_length(&self, length: usize) {
        self.lock().max_message_length = length;
    }

    pub fn set_bootstrap_accepts(&self, accepts: bool) {
        self.lock().bootstrap_accepts = accepts;
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: &'static str, error: EngineError) {
        self.fail_after(operation, 0, error);
    }

    /// Let `successes` calls of `operation` through, then fail the next one
    pub fn fail_after(&self, operation: &'static str, successes: usize, error: EngineError) {
        self.lock().failures.push(operation, successes, error);
    }

    /// Make the next iteration fail with `error`
    pub fn fail_next_iterate(&self, error: EngineError) {
        self.lock().iterate_failure = Some(error);
    }

    /// Make the factory fail when creating or loading
    pub fn fail_create(&self, error: EngineError) {
        self.lock().create_failure = Some(error);
    }

    /// Number handed out by the next friend addition
    pub fn force_next_friend_number(&self, number: FriendNumber) {
        self.lock().forced_friend_number = Some(number);
    }

    /// Hold every engine call for `delay` to widen race windows
    pub fn set_call_delay(&self, delay: Duration) {
        self.lock().call_delay = Some(delay);
    }

    /// Add a friend directly to the engine, as if restored from state
    pub fn seed_friend(&self, public_key: PublicKey, name: &str) -> FriendNumber {
        let mut state = self.lock();
        let number = state.insert_friend(public_key, None);
        if let Some(friend) = state.friend_mut(number) {
            friend.record.name = name.to_string();
        }
        number
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Calls other than iterations
    pub fn mutations(&self) -> Vec<EngineCall> {
        self.calls().into_iter().filter(EngineCall::is_mutation).collect()
    }

    pub fn iterations(&self) -> usize {
        self.lock().iterations
    }

    /// Friends known to the engine
    pub fn friend_numbers(&self) -> Vec<FriendNumber> {
        self.lock().friends.iter().map(|f| f.record.number).collect()
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    /// Blob the factory loaded the engine from, if any
    pub fn loaded_from(&self) -> Option<Vec<u8>> {
        self.lock().loaded_from.clone()
    }

    /// Highest number of engine calls observed running at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_call.load(Ordering::SeqCst)
    }

    fn enter(&self) -> CallGuard<'_> {
        let current = self.in_call.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_call.fetch_max(current, Ordering::SeqCst);
        let delay = self.lock().call_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        CallGuard { control: self }
    }
}

impl Default for MockControl {
    fn default() -> Self {
        Self::new(PublicKey::new([0x42; 32]))
    }
}

/// Marks one engine call in flight
struct CallGuard<'a> {
    control: &'a MockControl,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.control.in_call.fetch_sub(1, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Mock Engine
// ----------------------------------------------------------------------------

/// In-memory engine driven by a [`MockControl`]
#[derive(Debug)]
pub struct MockEngine {
    control: MockControl,
}

impl MockEngine {
    pub fn new(control: MockControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> &MockControl {
        &self.control
    }

    fn record(&self, call: EngineCall) -> MutexGuard<'_, MockState> {
        let mut state = self.control.lock();
        state.calls.push(call);
        state
    }
}

impl ToxEngine for MockEngine {
    fn address(&self) -> ToxAddress {
        self.control.address()
    }

    fn bootstrap(&mut self, node: &BootstrapNode) -> Result<(), EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::Bootstrap {
            host: node.host.clone(),
            port: node.port,
        });
        state.take_failure("bootstrap")?;
        if state.bootstrap_accepts {
            Ok(())
        } else {
            Err(EngineError::BootstrapRejected {
                reason: format!("{}:{} unreachable", node.host, node.port),
            })
        }
    }

    fn disconnect(&mut self) {
        let _guard = self.control.enter();
        self.record(EngineCall::Disconnect);
    }

    fn iterate(&mut self) -> Result<Vec<EngineEvent>, EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::Iterate);
        state.iterations += 1;
        if let Some(error) = state.iterate_failure.take() {
            return Err(error);
        }
        let events: Vec<EngineEvent> = state.pending_events.drain(..).collect();
        if !events.is_empty() {
            debug!("Mock engine produced {} events", events.len());
        }
        Ok(events)
    }

    fn iteration_interval(&self) -> u64 {
        self.control.lock().interval_ms
    }

    fn state_blob(&self) -> Vec<u8> {
        let snapshot = self.control.lock().snapshot();
        toml::to_string(&snapshot)
            .map(String::into_bytes)
            .unwrap_or_default()
    }

    fn friend_list(&self) -> Vec<FriendRecord> {
        self.control
            .lock()
            .friends
            .iter()
            .map(|f| f.record.clone())
            .collect()
    }

    fn add_friend(
        &mut self,
        address: &ToxAddress,
        message: &str,
    ) -> Result<FriendNumber, EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::AddFriend {
            address: *address,
            message: message.to_string(),
        });
        state.take_failure("add_friend")?;

        if message.is_empty() {
            return Err(EngineError::NoMessage);
        }
        if message.len() > MAX_FRIEND_REQUEST_LENGTH {
            return Err(EngineError::MessageTooLong {
                max: MAX_FRIEND_REQUEST_LENGTH,
            });
        }
        let public_key = address.public_key();
        if public_key == state.public_key {
            return Err(EngineError::OwnKey);
        }
        if let Some(existing) = state.friends.iter().find(|f| f.record.public_key == public_key) {
            return match existing.nospam {
                Some(nospam) if nospam != address.nospam() => Err(EngineError::SetNewNospam),
                _ => Err(EngineError::AlreadySent),
            };
        }
        Ok(state.insert_friend(public_key, Some(address.nospam())))
    }

    fn add_friend_norequest(&mut self, public_key: &PublicKey) -> Result<FriendNumber, EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::AddFriendNoRequest {
            public_key: *public_key,
        });
        state.take_failure("add_friend_norequest")?;

        if *public_key == state.public_key {
            return Err(EngineError::OwnKey);
        }
        if state.friends.iter().any(|f| f.record.public_key == *public_key) {
            return Err(EngineError::AlreadySent);
        }
        Ok(state.insert_friend(*public_key, None))
    }

    fn delete_friend(&mut self, friend: FriendNumber) -> Result<(), EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::DeleteFriend { friend });
        state.take_failure("delete_friend")?;

        let before = state.friends.len();
        state.friends.retain(|f| f.record.number != friend);
        if state.friends.len() == before {
            return Err(EngineError::FriendNotFound(friend));
        }
        Ok(())
    }

    fn send_message(
        &mut self,
        friend: FriendNumber,
        kind: MessageKind,
        text: &str,
    ) -> Result<MessageId, EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::SendMessage {
            friend,
            kind,
            text: text.to_string(),
        });
        state.take_failure("send_message")?;

        if !state.has_friend(friend) {
            return Err(EngineError::FriendNotFound(friend));
        }
        if text.is_empty() {
            return Err(EngineError::NoMessage);
        }
        if text.len() > state.max_message_length {
            return Err(EngineError::MessageTooLong {
                max: state.max_message_length,
            });
        }
        let id = MessageId(state.next_message);
        state.next_message += 1;
        Ok(id)
    }

    fn max_message_length(&self) -> usize {
        self.control.lock().max_message_length
    }

    fn set_name(&mut self, name: &str) -> Result<(), EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::SetName {
            name: name.to_string(),
        });
        state.take_failure("set_name")?;
        state.name = name.to_string();
        Ok(())
    }

    fn set_status_message(&mut self, message: &str) -> Result<(), EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::SetStatusMessage {
            message: message.to_string(),
        });
        state.take_failure("set_status_message")?;
        state.status_message = message.to_string();
        Ok(())
    }

    fn file_send(
        &mut self,
        friend: FriendNumber,
        kind: FileKind,
        size: u64,
        filename: &str,
    ) -> Result<FileNumber, EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::FileSend {
            friend,
            kind,
            size,
            filename: filename.to_string(),
        });
        state.take_failure("file_send")?;

        let entry = state
            .friend_mut(friend)
            .ok_or(EngineError::FriendNotFound(friend))?;
        let file = FileNumber(entry.next_file);
        entry.next_file += 1;
        Ok(file)
    }

    fn file_control(&mut self, key: TransferKey, control: FileControl) -> Result<(), EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::FileControl { key, control });
        state.take_failure("file_control")
    }

    fn file_send_chunk(
        &mut self,
        friend: FriendNumber,
        file: FileNumber,
        position: u64,
        data: &[u8],
    ) -> Result<(), EngineError> {
        let _guard = self.control.enter();
        let mut state = self.record(EngineCall::FileSendChunk {
            friend,
            file,
            position,
            data: data.to_vec(),
        });
        state.take_failure("file_send_chunk")
    }
}

// ----------------------------------------------------------------------------
// Mock Factory
// ----------------------------------------------------------------------------

/// Creates [`MockEngine`]s sharing one control handle
#[derive(Debug, Clone, Default)]
pub struct MockEngineFactory {
    control: MockControl,
}

impl MockEngineFactory {
    pub fn new(control: MockControl) -> Self {
        Self { control }
    }

    pub fn control(&self) -> MockControl {
        self.control.clone()
    }
}

impl EngineFactory for MockEngineFactory {
    type Engine = MockEngine;

    fn create_or_load(&self, state: Option<&[u8]>) -> Result<MockEngine, EngineError> {
        let mut shared = self.control.lock();
        if let Some(error) = shared.create_failure.take() {
            return Err(error);
        }

        if let Some(blob) = state {
            let text = std::str::from_utf8(blob).map_err(|e| EngineError::BadState {
                reason: e.to_string(),
            })?;
            let snapshot: MockSnapshot = toml::from_str(text).map_err(|e| EngineError::BadState {
                reason: e.to_string(),
            })?;
            shared.restore(snapshot);
            shared.loaded_from = Some(blob.to_vec());
        }
        drop(shared);

        Ok(MockEngine::new(self.control.clone()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> ToxAddress {
        ToxAddress::from_parts(PublicKey::new([seed; 32]), [1, 2, 3, 4])
    }

    #[test]
    fn test_friend_numbers_reuse_lowest_free() {
        let mut engine = MockEngine::new(MockControl::default());
        let a = engine.add_friend(&peer(1), "hi").unwrap();
        let b = engine.add_friend(&peer(2), "hi").unwrap();
        assert_eq!((a, b), (FriendNumber(0), FriendNumber(1)));

        engine.delete_friend(a).unwrap();
        assert_eq!(engine.add_friend(&peer(3), "hi").unwrap(), FriendNumber(0));
    }

    #[test]
    fn test_add_friend_rejections() {
        let control = MockControl::default();
        let mut engine = MockEngine::new(control.clone());

        assert_eq!(engine.add_friend(&peer(1), ""), Err(EngineError::NoMessage));
        assert_eq!(engine.add_friend(&control.address(), "me"), Err(EngineError::OwnKey));

        engine.add_friend(&peer(1), "hi").unwrap();
        assert_eq!(engine.add_friend(&peer(1), "again"), Err(EngineError::AlreadySent));

        let other_nospam = ToxAddress::from_parts(PublicKey::new([1; 32]), [9, 9, 9, 9]);
        assert_eq!(engine.add_friend(&other_nospam, "hi"), Err(EngineError::SetNewNospam));
    }

    #[test]
    fn test_events_drained_per_iteration() {
        let control = MockControl::default();
        let mut engine = MockEngine::new(control.clone());

        control.go_online();
        assert_eq!(engine.iterate().unwrap().len(), 1);
        assert!(engine.iterate().unwrap().is_empty());
        assert_eq!(control.iterations(), 2);
    }

    #[test]
    fn test_forced_failure_consumed_once() {
        let control = MockControl::default();
        let mut engine = MockEngine::new(control.clone());

        control.fail_next("set_name", EngineError::Other("busy".to_string()));
        assert!(engine.set_name("alice").is_err());
        assert!(engine.set_name("alice").is_ok());
        assert_eq!(control.name(), "alice");
    }

    #[test]
    fn test_failure_after_successes() {
        let control = MockControl::default();
        let mut engine = MockEngine::new(control.clone());

        control.fail_after("set_name", 2, EngineError::Other("busy".to_string()));
        assert!(engine.set_name("a").is_ok());
        assert!(engine.set_name("b").is_ok());
        assert!(engine.set_name("c").is_err());
        assert!(engine.set_name("d").is_ok());
        assert_eq!(control.name(), "d");
    }

    #[test]
    fn test_state_blob_restores_through_factory() {
        let control = MockControl::default();
        let mut engine = MockEngine::new(control.clone());
        engine.add_friend(&peer(7), "hello").unwrap();
        engine.set_name("bob").unwrap();
        let blob = engine.state_blob();

        let fresh = MockControl::new(PublicKey::new([0x99; 32]));
        let factory = MockEngineFactory::new(fresh.clone());
        let restored = factory.create_or_load(Some(&blob)).unwrap();

        assert_eq!(restored.address(), control.address());
        assert_eq!(restored.friend_list().len(), 1);
        assert_eq!(fresh.name(), "bob");
        assert_eq!(fresh.loaded_from(), Some(blob));
    }

    #[test]
    fn test_factory_rejects_garbage_state() {
        let factory = MockEngineFactory::default();
        let result = factory.create_or_load(Some(b"\xff\xfe"));
        assert!(matches!(result, Err(EngineError::BadState { .. })));
    }
}
