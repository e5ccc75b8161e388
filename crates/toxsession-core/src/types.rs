//! Core types for the Tox session
//!
//! Identifiers handed out by the engine are wrapped in newtypes so a friend
//! number can never be passed where a file number is expected. Keys and
//! addresses validate their length (and, for addresses, the checksum) at
//! construction.

use core::fmt;
use core::str::FromStr;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::SessionError;

/// Length of a long-term public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Length of the nospam value in bytes
pub const NOSPAM_SIZE: usize = 4;

/// Length of the address checksum in bytes
pub const CHECKSUM_SIZE: usize = 2;

/// Length of a full Tox address in bytes
pub const ADDRESS_SIZE: usize = PUBLIC_KEY_SIZE + NOSPAM_SIZE + CHECKSUM_SIZE;

// ----------------------------------------------------------------------------
// Engine-assigned Numbers
// ----------------------------------------------------------------------------

/// Friend number assigned by the engine, stable for the lifetime of the handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FriendNumber(pub u32);

impl fmt::Display for FriendNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "friend#{}", self.0)
    }
}

/// File number assigned by the engine, scoped per friend and per direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileNumber(pub u32);

impl fmt::Display for FileNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Message id returned by the engine for read receipts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u32);

// ----------------------------------------------------------------------------
// Public Key
// ----------------------------------------------------------------------------

/// Long-term public key identifying a Tox peer
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn new(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a public key from a slice, failing on the wrong length
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SessionError> {
        let array: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            SessionError::invalid_address(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self)
    }
}

impl FromStr for PublicKey {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| SessionError::invalid_address("public key is not valid hex"))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ----------------------------------------------------------------------------
// Tox Address
// ----------------------------------------------------------------------------

/// Full Tox address: public key, nospam and a two byte checksum
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToxAddress([u8; ADDRESS_SIZE]);

impl ToxAddress {
    /// Build an address from its parts, computing the checksum
    pub fn from_parts(public_key: PublicKey, nospam: [u8; NOSPAM_SIZE]) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[..PUBLIC_KEY_SIZE].copy_from_slice(public_key.as_bytes());
        bytes[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE].copy_from_slice(&nospam);
        let checksum = Self::compute_checksum(&bytes[..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);
        bytes[PUBLIC_KEY_SIZE + NOSPAM_SIZE..].copy_from_slice(&checksum);
        Self(bytes)
    }

    /// Validate raw address bytes (length and checksum)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        let array: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| {
            SessionError::invalid_address(format!(
                "address must be {} bytes, got {}",
                ADDRESS_SIZE,
                bytes.len()
            ))
        })?;

        let expected = Self::compute_checksum(&array[..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);
        if array[PUBLIC_KEY_SIZE + NOSPAM_SIZE..] != expected {
            return Err(SessionError::invalid_address("address checksum mismatch"));
        }

        Ok(Self(array))
    }

    /// XOR of the key and nospam bytes folded into two bytes
    fn compute_checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
        let mut checksum = [0u8; CHECKSUM_SIZE];
        for (i, byte) in data.iter().enumerate() {
            checksum[i % CHECKSUM_SIZE] ^= byte;
        }
        checksum
    }

    /// Public key part of the address
    pub fn public_key(&self) -> PublicKey {
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key.copy_from_slice(&self.0[..PUBLIC_KEY_SIZE]);
        PublicKey(key)
    }

    /// Nospam part of the address
    pub fn nospam(&self) -> [u8; NOSPAM_SIZE] {
        let mut nospam = [0u8; NOSPAM_SIZE];
        nospam.copy_from_slice(&self.0[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NOSPAM_SIZE]);
        nospam
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl fmt::Display for ToxAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl fmt::Debug for ToxAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ToxAddress({})", self)
    }
}

impl FromStr for ToxAddress {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.trim();
        if clean.len() != ADDRESS_SIZE * 2 {
            return Err(SessionError::invalid_address(format!(
                "address must be {} hex characters, got {}",
                ADDRESS_SIZE * 2,
                clean.len()
            )));
        }
        let bytes = hex::decode(clean)
            .map_err(|_| SessionError::invalid_address("address is not valid hex"))?;
        Self::from_bytes(&bytes)
    }
}

// ----------------------------------------------------------------------------
// Client Identifier
// ----------------------------------------------------------------------------

/// Stable client identifier derived from the engine's own address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Derive the client id (uppercase hex of the public key)
    pub fn from_address(address: &ToxAddress) -> Self {
        Self(address.public_key().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// Transport the engine reports for ourselves or for a friend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Connection {
    None,
    Tcp,
    Udp,
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        !matches!(self, Connection::None)
    }
}

/// Session-level connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Offline,
    Connecting,
    Online,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Offline => write!(f, "Offline"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Online => write!(f, "Online"),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
