//! Integration Tests for the Friend Roster and Messaging
//!
//! Drives a session backed by the mock engine through friend management and
//! text messaging, checking roster state, engine calls and notifications.

mod common;

use common::{peer_address, peer_key, start_session};
use toxsession_core::{
    Connection, EngineError, EngineEvent, FileKind, FileNumber, FriendNumber, FriendStatus,
    MessageId, MessageKind, Notification, SessionError,
};
use toxsession_harness::{EngineCall, SharedBuffer};

// ----------------------------------------------------------------------------
// Roster
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_added_friend_starts_offline_and_comes_online() {
    let mut t = start_session().await;
    let address = peer_address(7);
    t.control.force_next_friend_number(FriendNumber(3));

    let friend = t
        .session
        .add_friend(&address.to_string(), "let's chat")
        .await
        .unwrap();
    assert_eq!(friend, FriendNumber(3));

    let entry = t.session.friend(FriendNumber(3)).await.unwrap().unwrap();
    assert_eq!(entry.public_key, address.public_key());
    assert_eq!(entry.status, FriendStatus::Offline);

    t.control
        .set_friend_connection(FriendNumber(3), Connection::Tcp);
    t.session.tick_now().await.unwrap();

    let entry = t.session.friend(FriendNumber(3)).await.unwrap().unwrap();
    assert_eq!(entry.status, FriendStatus::Online);
    assert_eq!(entry.connection, Connection::Tcp);
    assert!(entry.last_seen.is_some());
    assert_eq!(t.session.stats().await.unwrap().friends_online, 1);
    assert!(t.drain().contains(&Notification::FriendStatusChanged {
        friend: FriendNumber(3),
        status: FriendStatus::Online,
    }));
}

#[tokio::test]
async fn test_malformed_address_leaves_roster_unchanged() {
    let mut t = start_session().await;
    t.add_online_friend(1).await;
    let before = t.session.friends().await.unwrap().len();

    let result = t.session.add_friend("not an address", "hi").await;
    assert!(matches!(result, Err(SessionError::InvalidAddress { .. })));

    // Valid hex, broken checksum
    let mut corrupted = peer_address(2).to_string();
    let last = corrupted.pop().unwrap();
    corrupted.push(if last == '0' { '1' } else { '0' });
    let result = t.session.add_friend(&corrupted, "hi").await;
    assert!(matches!(result, Err(SessionError::InvalidAddress { .. })));

    assert_eq!(t.session.friends().await.unwrap().len(), before);
    assert_eq!(
        t.control
            .calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::AddFriend { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_engine_rejections_are_reported() {
    let t = start_session().await;
    let own = t.control.address().to_string();

    let result = t.session.add_friend(&own, "me").await;
    assert!(matches!(
        result,
        Err(SessionError::EngineRejected {
            operation: "add_friend",
            source: EngineError::OwnKey
        })
    ));

    let result = t.session.add_friend(&peer_address(4).to_string(), "").await;
    assert!(matches!(
        result,
        Err(SessionError::EngineRejected {
            source: EngineError::NoMessage,
            ..
        })
    ));

    let address = peer_address(5).to_string();
    t.session.add_friend(&address, "hi").await.unwrap();
    let result = t.session.add_friend(&address, "hi again").await;
    assert!(matches!(
        result,
        Err(SessionError::EngineRejected {
            source: EngineError::AlreadySent,
            ..
        })
    ));

    assert_eq!(t.session.friends().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_remove_friend_cascades_transfers() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;
    let other = t.add_online_friend(2).await;

    for name in ["a.txt", "b.txt"] {
        t.session
            .send_file(friend, name, SharedBuffer::with_data(vec![1; 8]), 8)
            .await
            .unwrap();
    }
    t.session
        .send_file(other, "keep.txt", SharedBuffer::with_data(vec![2; 8]), 8)
        .await
        .unwrap();
    t.control.push_event(EngineEvent::FileOffered {
        friend,
        file: FileNumber(0),
        kind: FileKind::Data,
        size: 100,
        filename: "incoming.bin".to_string(),
    });
    t.session.tick_now().await.unwrap();
    assert_eq!(t.session.transfers().await.unwrap().len(), 4);
    t.drain();

    let removed = t.session.remove_friend(friend).await.unwrap();
    assert_eq!(removed, 3);

    let remaining = t.session.transfers().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key.friend, other);
    assert!(t.session.friend(friend).await.unwrap().is_none());

    let cancelled = t
        .drain()
        .into_iter()
        .filter(|n| matches!(n, Notification::FileCancelled { key } if key.friend == friend))
        .count();
    assert_eq!(cancelled, 3);
    assert!(t
        .control
        .mutations()
        .contains(&EngineCall::DeleteFriend { friend }));

    let again = t.session.remove_friend(friend).await;
    assert!(matches!(again, Err(SessionError::UnknownFriend(f)) if f == friend));
}

#[tokio::test]
async fn test_friend_request_can_be_accepted() {
    let mut t = start_session().await;
    t.control.push_event(EngineEvent::FriendRequest {
        public_key: peer_key(9),
        message: "add me".to_string(),
    });
    t.session.tick_now().await.unwrap();

    assert!(t.drain().contains(&Notification::FriendRequestReceived {
        public_key: peer_key(9),
        message: "add me".to_string(),
    }));

    let friend = t.session.accept_friend_request(peer_key(9)).await.unwrap();
    let entry = t.session.friend(friend).await.unwrap().unwrap();
    assert_eq!(entry.public_key, peer_key(9));
    assert!(t
        .control
        .calls()
        .contains(&EngineCall::AddFriendNoRequest {
            public_key: peer_key(9)
        }));
}

#[tokio::test]
async fn test_friend_profile_updates() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;

    t.control.push_events([
        EngineEvent::FriendName {
            friend,
            name: "Bob".to_string(),
        },
        EngineEvent::FriendStatusMessage {
            friend,
            message: "away".to_string(),
        },
    ]);
    let report = t.session.tick_now().await.unwrap();
    assert_eq!(report.events, 2);
    assert!(report.checkpointed);

    let entry = t.session.friend(friend).await.unwrap().unwrap();
    assert_eq!(entry.name, "Bob");
    assert_eq!(entry.status_message, "away");
    let updates = t
        .drain()
        .into_iter()
        .filter(|n| *n == Notification::FriendUpdated { friend })
        .count();
    assert_eq!(updates, 2);
}

#[tokio::test]
async fn test_events_for_unknown_friends_are_ignored() {
    let mut t = start_session().await;
    t.control.push_events([
        EngineEvent::FriendMessage {
            friend: FriendNumber(42),
            kind: MessageKind::Normal,
            text: "boo".to_string(),
        },
        EngineEvent::FriendConnection {
            friend: FriendNumber(42),
            status: Connection::Udp,
        },
    ]);

    let report = t.session.tick_now().await.unwrap();
    assert_eq!(report.events, 2);

    let stats = t.session.stats().await.unwrap();
    assert_eq!(stats.events_ignored, 2);
    assert!(t.session.friends().await.unwrap().is_empty());
    assert!(!t
        .drain()
        .iter()
        .any(|n| matches!(n, Notification::MessageReceived { .. })));
}

// ----------------------------------------------------------------------------
// Messaging
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_message_requires_online_friend() {
    let t = start_session().await;
    let friend = t
        .session
        .add_friend(&peer_address(1).to_string(), "hi")
        .await
        .unwrap();

    let result = t.session.send_message(friend, "hello").await;
    assert!(matches!(result, Err(SessionError::FriendOffline(f)) if f == friend));

    let result = t.session.send_message(FriendNumber(99), "hello").await;
    assert!(matches!(result, Err(SessionError::UnknownFriend(_))));

    assert!(!t
        .control
        .calls()
        .iter()
        .any(|c| matches!(c, EngineCall::SendMessage { .. })));
}

#[tokio::test]
async fn test_send_message_and_action() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;

    let ids = t.session.send_message(friend, "hello").await.unwrap();
    assert_eq!(ids, vec![MessageId(1)]);
    let ids = t.session.send_action(friend, "waves").await.unwrap();
    assert_eq!(ids, vec![MessageId(2)]);

    let result = t.session.send_message(friend, "").await;
    assert!(matches!(result, Err(SessionError::InvalidInput { .. })));

    let sent: Vec<_> = t
        .control
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::SendMessage { kind, text, .. } => Some((kind, text)),
            _ => None,
        })
        .collect();
    assert_eq!(
        sent,
        vec![
            (MessageKind::Normal, "hello".to_string()),
            (MessageKind::Action, "waves".to_string()),
        ]
    );
    assert_eq!(t.session.stats().await.unwrap().messages_sent, 2);
}

#[tokio::test]
async fn test_long_message_is_split() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;
    t.control.set_max_message_length(10);

    let text = "abcdefghij".repeat(2) + "xyz";
    let ids = t.session.send_message(friend, &text).await.unwrap();
    assert_eq!(ids.len(), 3);

    let parts: Vec<String> = t
        .control
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            EngineCall::SendMessage { text, .. } => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(parts.concat(), text);
    assert!(parts.iter().all(|p| p.len() <= 10));
}

#[tokio::test]
async fn test_split_message_failing_midway_keeps_sent_ids() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;
    t.control.set_max_message_length(10);
    t.control.fail_after(
        "send_message",
        1,
        EngineError::Other("send queue full".to_string()),
    );

    let text = "abcdefghij".repeat(2) + "xyz";
    let result = t.session.send_message(friend, &text).await;
    match result {
        Err(SessionError::PartiallySent {
            friend: failed_for,
            sent,
            source: EngineError::Other(_),
        }) => {
            assert_eq!(failed_for, friend);
            assert_eq!(sent.len(), 1);
        }
        other => panic!("expected a partial send, got {:?}", other),
    }
    assert_eq!(t.session.stats().await.unwrap().messages_sent, 1);
    assert!(t.session.is_running());
}

#[tokio::test]
async fn test_first_part_failing_is_a_plain_rejection() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;
    t.control.fail_next("send_message", EngineError::Other("busy".to_string()));

    let result = t.session.send_message(friend, "hello").await;
    assert!(matches!(
        result,
        Err(SessionError::EngineRejected {
            operation: "send_message",
            ..
        })
    ));
    assert_eq!(t.session.stats().await.unwrap().messages_sent, 0);
}

#[tokio::test]
async fn test_dead_engine_on_command_ends_session() {
    let mut t = start_session().await;
    t.control.fail_next(
        "add_friend",
        EngineError::InvalidHandle {
            reason: "engine freed".to_string(),
        },
    );

    let result = t.session.add_friend(&peer_address(2).to_string(), "hi").await;
    assert!(matches!(
        result,
        Err(SessionError::EngineRejected {
            source: EngineError::InvalidHandle { .. },
            ..
        })
    ));
    assert!(t
        .drain()
        .iter()
        .any(|n| matches!(n, Notification::SessionTerminated { .. })));

    let result = t.session.tick_now().await;
    assert!(matches!(result, Err(SessionError::Terminated { .. })));
    t.session.shutdown().await.unwrap();
    assert!(!t.session.is_running());
}

#[tokio::test]
async fn test_incoming_messages_and_receipts() {
    let mut t = start_session().await;
    let friend = t.add_online_friend(1).await;
    let id = t.session.send_message(friend, "ping").await.unwrap()[0];

    t.control.push_events([
        EngineEvent::FriendMessage {
            friend,
            kind: MessageKind::Normal,
            text: "pong".to_string(),
        },
        EngineEvent::FriendReadReceipt {
            friend,
            message: id,
        },
    ]);
    t.session.tick_now().await.unwrap();

    let notifications = t.drain();
    assert_eq!(
        notifications,
        vec![
            Notification::MessageReceived {
                friend,
                kind: MessageKind::Normal,
                text: "pong".to_string(),
            },
            Notification::MessageDelivered {
                friend,
                message: id,
            },
        ]
    );
    assert_eq!(t.session.stats().await.unwrap().messages_received, 1);
}

#[tokio::test]
async fn test_self_profile_is_checkpointed() {
    let t = start_session().await;
    t.session.tick_now().await.unwrap();
    let saves = t.store.save_count();

    t.session.set_name("alice").await.unwrap();
    t.session.set_status_message("online").await.unwrap();
    assert_eq!(t.control.name(), "alice");

    let report = t.session.tick_now().await.unwrap();
    assert!(report.checkpointed);
    assert_eq!(t.store.save_count(), saves + 1);

    t.control.fail_next("set_name", EngineError::Other("too long".to_string()));
    let result = t.session.set_name("x").await;
    assert!(matches!(
        result,
        Err(SessionError::EngineRejected {
            operation: "set_name",
            ..
        })
    ));
}
