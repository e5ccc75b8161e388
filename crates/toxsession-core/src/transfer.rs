//! File transfer tracking
//!
//! Every in-flight transfer is keyed by (friend number, file number,
//! direction). The engine numbers files per friend and per direction, so the
//! same file number can name an upload and a download at once; the direction
//! is part of the key and the tracker exposes per-direction views over a
//! single map.

use core::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::FileKind;
use crate::errors::{SessionError, SessionResult};
use crate::types::{FileNumber, FriendNumber, Timestamp};

// ----------------------------------------------------------------------------
// Transfer Key
// ----------------------------------------------------------------------------

/// Direction of a transfer as seen from this session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Direction {
    Download,
    Upload,
}

/// Composite identity of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub friend: FriendNumber,
    pub file: FileNumber,
    pub direction: Direction,
}

impl TransferKey {
    pub fn new(friend: FriendNumber, file: FileNumber, direction: Direction) -> Self {
        Self {
            friend,
            file,
            direction,
        }
    }

    pub fn download(friend: FriendNumber, file: FileNumber) -> Self {
        Self::new(friend, file, Direction::Download)
    }

    pub fn upload(friend: FriendNumber, file: FileNumber) -> Self {
        Self::new(friend, file, Direction::Upload)
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            Direction::Download => "down",
            Direction::Upload => "up",
        };
        write!(f, "{}/{}/{}", self.friend, self.file, direction)
    }
}

// ----------------------------------------------------------------------------
// Transfer Status
// ----------------------------------------------------------------------------

/// Lifecycle of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Offered but not accepted yet
    Pending,
    Running,
    Paused,
    Finished,
    /// Cancelled locally, waiting for the engine to release it
    Cancelled,
    Errored,
}

impl TransferStatus {
    /// Whether the transfer can still move data
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TransferStatus::Pending | TransferStatus::Running | TransferStatus::Paused
        )
    }
}

/// Which side paused a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PausedBy {
    Local,
    Remote,
}

// ----------------------------------------------------------------------------
// Chunk Endpoints
// ----------------------------------------------------------------------------

/// Readable side of an upload
pub trait ChunkSource: Send {
    /// Read up to `length` bytes at `position`. A short read means end of data.
    fn read_at(&mut self, position: u64, length: usize) -> io::Result<Vec<u8>>;
}

/// Writable side of a download, supplied when a transfer is accepted
pub trait ChunkSink: Send {
    fn write_at(&mut self, position: u64, data: &[u8]) -> io::Result<()>;

    /// Called once when the last chunk has been written
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ChunkSource for std::fs::File {
    fn read_at(&mut self, position: u64, length: usize) -> io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(position))?;
        let mut buffer = Vec::with_capacity(length);
        self.take(length as u64).read_to_end(&mut buffer)?;
        Ok(buffer)
    }
}

impl ChunkSink for std::fs::File {
    fn write_at(&mut self, position: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(position))?;
        self.write_all(data)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

impl ChunkSource for Vec<u8> {
    fn read_at(&mut self, position: u64, length: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(position)
            .unwrap_or(usize::MAX)
            .min(self.len());
        let end = start.saturating_add(length).min(self.len());
        Ok(self[start..end].to_vec())
    }
}

impl ChunkSink for Vec<u8> {
    fn write_at(&mut self, position: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(position)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "position out of range"))?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "chunk end out of range"))?;
        if self.len() < end {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Where a transfer's bytes come from or go to
enum TransferEndpoint {
    Source(Box<dyn ChunkSource>),
    Sink(Box<dyn ChunkSink>),
    /// Download not yet accepted
    None,
}

impl fmt::Debug for TransferEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferEndpoint::Source(_) => f.write_str("Source"),
            TransferEndpoint::Sink(_) => f.write_str("Sink"),
            TransferEndpoint::None => f.write_str("None"),
        }
    }
}

// ----------------------------------------------------------------------------
// File Transfer
// ----------------------------------------------------------------------------

/// State of one transfer
#[derive(Debug)]
pub struct FileTransfer {
    pub kind: FileKind,
    pub filename: String,
    /// Total size in bytes
    pub size: u64,
    /// Bytes moved so far
    pub transferred: u64,
    pub status: TransferStatus,
    pub paused_by: Option<PausedBy>,
    pub started_at: Timestamp,
    endpoint: TransferEndpoint,
}

impl FileTransfer {
    /// An outgoing transfer reading from `source`
    pub fn upload(
        kind: FileKind,
        filename: impl Into<String>,
        size: u64,
        source: Box<dyn ChunkSource>,
    ) -> Self {
        Self::with_endpoint(kind, filename.into(), size, TransferEndpoint::Source(source))
    }

    /// An incoming transfer waiting for a sink
    pub fn download(kind: FileKind, filename: impl Into<String>, size: u64) -> Self {
        Self::with_endpoint(kind, filename.into(), size, TransferEndpoint::None)
    }

    fn with_endpoint(
        kind: FileKind,
        filename: String,
        size: u64,
        endpoint: TransferEndpoint,
    ) -> Self {
        Self {
            kind,
            filename,
            size,
            transferred: 0,
            status: TransferStatus::Pending,
            paused_by: None,
            started_at: Timestamp::now(),
            endpoint,
        }
    }

    /// Attach the sink a download writes into
    pub fn attach_sink(&mut self, sink: Box<dyn ChunkSink>) {
        self.endpoint = TransferEndpoint::Sink(sink);
    }

    pub fn source_mut(&mut self) -> Option<&mut (dyn ChunkSource + 'static)> {
        match &mut self.endpoint {
            TransferEndpoint::Source(source) => Some(source.as_mut()),
            _ => None,
        }
    }

    pub fn sink_mut(&mut self) -> Option<&mut (dyn ChunkSink + 'static)> {
        match &mut self.endpoint {
            TransferEndpoint::Sink(sink) => Some(sink.as_mut()),
            _ => None,
        }
    }

    /// Whether every byte has been moved
    pub fn is_complete(&self) -> bool {
        self.transferred >= self.size
    }

    /// Owned snapshot for callers outside the session
    pub fn info(&self, key: TransferKey) -> TransferInfo {
        TransferInfo {
            key,
            kind: self.kind,
            filename: self.filename.clone(),
            size: self.size,
            transferred: self.transferred,
            status: self.status,
            paused_by: self.paused_by,
        }
    }
}

/// Snapshot of a transfer, free of its endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub key: TransferKey,
    pub kind: FileKind,
    pub filename: String,
    pub size: u64,
    pub transferred: u64,
    pub status: TransferStatus,
    pub paused_by: Option<PausedBy>,
}

// ----------------------------------------------------------------------------
// Transfer Tracker
// ----------------------------------------------------------------------------

/// All in-flight transfers of a session
#[derive(Debug, Default)]
pub struct TransferTracker {
    transfers: HashMap<TransferKey, FileTransfer>,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new transfer
    pub fn register(&mut self, key: TransferKey, transfer: FileTransfer) -> SessionResult<()> {
        if self.transfers.contains_key(&key) {
            return Err(SessionError::DuplicateTransfer(key));
        }
        self.transfers.insert(key, transfer);
        Ok(())
    }

    /// Update progress and status. Unknown keys are a benign race with the
    /// engine and only get logged.
    pub fn update(&mut self, key: TransferKey, transferred: u64, status: TransferStatus) -> bool {
        match self.transfers.get_mut(&key) {
            Some(transfer) => {
                transfer.transferred = transferred;
                transfer.status = status;
                true
            }
            None => {
                warn!("Ignoring update for unknown transfer {}", key);
                false
            }
        }
    }

    pub fn remove(&mut self, key: TransferKey) -> Option<FileTransfer> {
        self.transfers.remove(&key)
    }

    /// Remove and return every transfer of a friend, ordered by key
    pub fn drain_friend(&mut self, friend: FriendNumber) -> Vec<(TransferKey, FileTransfer)> {
        let keys = self.keys_for_friend(friend);
        keys.into_iter()
            .filter_map(|key| self.transfers.remove(&key).map(|t| (key, t)))
            .collect()
    }

    /// Remove every transfer of a friend, returning how many were removed
    pub fn remove_all_for_friend(&mut self, friend: FriendNumber) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|key, _| key.friend != friend);
        before - self.transfers.len()
    }

    pub fn lookup(&self, key: TransferKey) -> Option<&FileTransfer> {
        self.transfers.get(&key)
    }

    pub fn lookup_mut(&mut self, key: TransferKey) -> Option<&mut FileTransfer> {
        self.transfers.get_mut(&key)
    }

    pub fn contains(&self, key: TransferKey) -> bool {
        self.transfers.contains_key(&key)
    }

    /// Incoming transfers
    pub fn downloads(&self) -> impl Iterator<Item = (&TransferKey, &FileTransfer)> + '_ {
        self.by_direction(Direction::Download)
    }

    /// Outgoing transfers
    pub fn uploads(&self) -> impl Iterator<Item = (&TransferKey, &FileTransfer)> + '_ {
        self.by_direction(Direction::Upload)
    }

    fn by_direction(
        &self,
        direction: Direction,
    ) -> impl Iterator<Item = (&TransferKey, &FileTransfer)> + '_ {
        self.transfers
            .iter()
            .filter(move |(key, _)| key.direction == direction)
    }

    /// Keys of a friend's transfers, ordered
    pub fn keys_for_friend(&self, friend: FriendNumber) -> Vec<TransferKey> {
        let mut keys: Vec<TransferKey> = self
            .transfers
            .keys()
            .filter(|key| key.friend == friend)
            .copied()
            .collect();
        keys.sort();
        keys
    }

    pub fn count_for_friend(&self, friend: FriendNumber) -> usize {
        self.transfers.keys().filter(|key| key.friend == friend).count()
    }

    /// Snapshots of all transfers, ordered by key
    pub fn snapshot(&self) -> Vec<TransferInfo> {
        let mut infos: Vec<TransferInfo> = self
            .transfers
            .iter()
            .map(|(key, transfer)| transfer.info(*key))
            .collect();
        infos.sort_by_key(|info| info.key);
        infos
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
