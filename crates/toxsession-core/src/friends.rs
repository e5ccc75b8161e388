//! Friend roster
//!
//! In-memory roster keyed by engine-assigned friend number. Iteration follows
//! insertion order, which stays stable when other entries are added or
//! removed. The container does no locking; the session runtime only touches it
//! from its serialized context.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::engine::FriendRecord;
use crate::types::{Connection, FriendNumber, PublicKey, Timestamp, ToxAddress};

// ----------------------------------------------------------------------------
// Friend
// ----------------------------------------------------------------------------

/// Online status as shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FriendStatus {
    Online,
    Offline,
}

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub number: FriendNumber,
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    pub status: FriendStatus,
    /// Transport reported by the engine for this friend
    pub connection: Connection,
    pub last_seen: Option<Timestamp>,
}

impl Friend {
    /// A freshly added friend, offline until the engine reports otherwise
    pub fn new(number: FriendNumber, public_key: PublicKey) -> Self {
        Self {
            number,
            public_key,
            name: String::new(),
            status_message: String::new(),
            status: FriendStatus::Offline,
            connection: Connection::None,
            last_seen: None,
        }
    }

    /// Restore a friend from the engine's persisted roster
    pub fn from_record(record: FriendRecord) -> Self {
        Self {
            number: record.number,
            public_key: record.public_key,
            name: record.name,
            status_message: record.status_message,
            status: FriendStatus::Offline,
            connection: Connection::None,
            last_seen: record.last_seen,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == FriendStatus::Online
    }

    /// Apply a connection report. Returns true when the online status flipped.
    pub fn set_connection(&mut self, connection: Connection, now: Timestamp) -> bool {
        let status = if connection.is_connected() {
            FriendStatus::Online
        } else {
            FriendStatus::Offline
        };
        let changed = status != self.status;

        self.connection = connection;
        self.status = status;
        if changed || connection.is_connected() {
            self.last_seen = Some(now);
        }
        changed
    }

    /// Name for display, falling back to the public key
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.public_key.to_string()
        } else {
            self.name.clone()
        }
    }
}

// ----------------------------------------------------------------------------
// Friends Container
// ----------------------------------------------------------------------------

/// Roster of known friends
#[derive(Debug, Clone, Default)]
pub struct FriendsContainer {
    friends: HashMap<FriendNumber, Friend>,
    /// Insertion order of friend numbers
    order: Vec<FriendNumber>,
}

impl FriendsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a roster from engine records, keeping their order
    pub fn from_records(records: Vec<FriendRecord>) -> Self {
        let mut container = Self::new();
        for record in records {
            container.insert(Friend::from_record(record));
        }
        container
    }

    /// Insert a friend. An entry with the same number is replaced in place and
    /// returned.
    pub fn insert(&mut self, friend: Friend) -> Option<Friend> {
        let number = friend.number;
        let previous = self.friends.insert(number, friend);
        if previous.is_none() {
            self.order.push(number);
        }
        previous
    }

    pub fn remove(&mut self, number: FriendNumber) -> Option<Friend> {
        let removed = self.friends.remove(&number)?;
        self.order.retain(|n| *n != number);
        Some(removed)
    }

    pub fn lookup(&self, number: FriendNumber) -> Option<&Friend> {
        self.friends.get(&number)
    }

    pub fn lookup_mut(&mut self, number: FriendNumber) -> Option<&mut Friend> {
        self.friends.get_mut(&number)
    }

    /// Find the friend whose public key matches the address
    pub fn lookup_by_address(&self, address: &ToxAddress) -> Option<&Friend> {
        self.lookup_by_public_key(&address.public_key())
    }

    pub fn lookup_by_public_key(&self, public_key: &PublicKey) -> Option<&Friend> {
        self.all().find(|friend| friend.public_key == *public_key)
    }

    /// First friend, in roster order, with the given display name
    pub fn find_by_name(&self, name: &str) -> Option<&Friend> {
        self.all().find(|friend| friend.name == name)
    }

    pub fn contains(&self, number: FriendNumber) -> bool {
        self.friends.contains_key(&number)
    }

    /// All friends in insertion order
    pub fn all(&self) -> impl Iterator<Item = &Friend> + '_ {
        self.order.iter().filter_map(|number| self.friends.get(number))
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.friends.values().filter(|f| f.is_online()).count()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
