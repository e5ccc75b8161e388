//! Property-based tests for roster and transfer bookkeeping
//!
//! These tests drive the Friends Container and the Transfer Tracker through
//! arbitrary add/remove sequences and check the invariants the session relies
//! on: no transfer outlives its friend, and removing a friend removes exactly
//! its transfers.

use proptest::prelude::*;
use toxsession_core::{
    transfer::TransferInfo, Direction, FileKind, FileNumber, FileTransfer, Friend,
    FriendNumber, FriendsContainer, PublicKey, ToxAddress, TransferKey, TransferStatus,
    TransferTracker,
};

#[derive(Debug, Clone)]
enum Op {
    AddFriend(u32),
    RemoveFriend(u32),
    AddTransfer(u32, u32, Direction),
    FinishTransfer(u32, u32, Direction),
}

fn arb_direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Download), Just(Direction::Upload)]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..8).prop_map(Op::AddFriend),
        (0u32..8).prop_map(Op::RemoveFriend),
        (0u32..8, 0u32..4, arb_direction()).prop_map(|(f, n, d)| Op::AddTransfer(f, n, d)),
        (0u32..8, 0u32..4, arb_direction()).prop_map(|(f, n, d)| Op::FinishTransfer(f, n, d)),
    ]
}

fn transfer(direction: Direction) -> FileTransfer {
    match direction {
        Direction::Download => FileTransfer::download(FileKind::Data, "in.bin", 64),
        Direction::Upload => {
            FileTransfer::upload(FileKind::Data, "out.bin", 64, Box::new(vec![0u8; 64]))
        }
    }
}

/// Apply one operation the way the session does: transfers are only
/// registered for present friends, and removing a friend cascades.
fn apply(op: Op, friends: &mut FriendsContainer, tracker: &mut TransferTracker) {
    match op {
        Op::AddFriend(n) => {
            if !friends.contains(FriendNumber(n)) {
                friends.insert(Friend::new(FriendNumber(n), PublicKey::new([n as u8; 32])));
            }
        }
        Op::RemoveFriend(n) => {
            let expected = tracker.count_for_friend(FriendNumber(n));
            if friends.remove(FriendNumber(n)).is_some() {
                assert_eq!(tracker.remove_all_for_friend(FriendNumber(n)), expected);
            }
        }
        Op::AddTransfer(f, n, d) => {
            if friends.contains(FriendNumber(f)) {
                let key = TransferKey::new(FriendNumber(f), FileNumber(n), d);
                let _ = tracker.register(key, transfer(d));
            }
        }
        Op::FinishTransfer(f, n, d) => {
            let key = TransferKey::new(FriendNumber(f), FileNumber(n), d);
            if tracker.update(key, 64, TransferStatus::Finished) {
                tracker.remove(key);
            }
        }
    }
}

proptest! {
    /// Property: no transfer references an absent friend
    #[test]
    fn transfers_never_outlive_friends(ops in prop::collection::vec(arb_op(), 0..64)) {
        let mut friends = FriendsContainer::new();
        let mut tracker = TransferTracker::new();

        for op in ops {
            apply(op, &mut friends, &mut tracker);
            for info in tracker.snapshot() {
                prop_assert!(friends.contains(info.key.friend));
            }
        }
    }

    /// Property: per-direction views and per-friend counts partition the tracker
    #[test]
    fn tracker_accounting_is_consistent(ops in prop::collection::vec(arb_op(), 0..64)) {
        let mut friends = FriendsContainer::new();
        let mut tracker = TransferTracker::new();

        for op in ops {
            apply(op, &mut friends, &mut tracker);
        }

        prop_assert_eq!(tracker.downloads().count() + tracker.uploads().count(), tracker.len());
        let per_friend: usize = friends
            .all()
            .map(|friend| tracker.count_for_friend(friend.number))
            .sum();
        prop_assert_eq!(per_friend, tracker.len());

        let snapshot: Vec<TransferInfo> = tracker.snapshot();
        prop_assert!(snapshot.windows(2).all(|w| w[0].key < w[1].key));
    }

    /// Property: removing a friend with N transfers removes exactly N entries
    #[test]
    fn cascade_removes_exactly_friend_transfers(
        mine in prop::collection::btree_set((0u32..32, arb_direction()), 0..16),
        others in prop::collection::btree_set((0u32..32, arb_direction()), 0..16),
    ) {
        let mut tracker = TransferTracker::new();
        for (file, direction) in &mine {
            let key = TransferKey::new(FriendNumber(1), FileNumber(*file), *direction);
            tracker.register(key, transfer(*direction)).unwrap();
        }
        for (file, direction) in &others {
            let key = TransferKey::new(FriendNumber(2), FileNumber(*file), *direction);
            tracker.register(key, transfer(*direction)).unwrap();
        }

        prop_assert_eq!(tracker.remove_all_for_friend(FriendNumber(1)), mine.len());
        prop_assert_eq!(tracker.len(), others.len());
    }

    /// Property: flipping any byte covered by the checksum invalidates an address
    #[test]
    fn corrupted_address_rejected(
        key in any::<[u8; 32]>(),
        nospam in any::<[u8; 4]>(),
        index in 0usize..36,
        flip in 1u8..=255,
    ) {
        let address = ToxAddress::from_parts(PublicKey::new(key), nospam);
        let mut bytes = address.as_bytes().to_vec();
        bytes[index] ^= flip;

        prop_assert!(ToxAddress::from_bytes(&bytes).is_err());
        prop_assert_eq!(address.to_string().parse::<ToxAddress>().unwrap(), address);
    }
}
