//! Shared in-memory chunk endpoints
//!
//! Downloads write into a sink the session owns once the transfer is accepted.
//! [`SharedBuffer`] keeps the bytes behind an `Arc` so the test that handed the
//! sink over can still read what arrived.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use toxsession_core::{ChunkSink, ChunkSource};

#[derive(Debug, Default)]
struct BufferState {
    data: Vec<u8>,
    finished: bool,
}

/// Byte buffer usable as both upload source and download sink
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<BufferState>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        let buffer = Self::new();
        buffer.lock().data = data;
        buffer
    }

    pub fn contents(&self) -> Vec<u8> {
        self.lock().data.clone()
    }

    /// Whether the session reported the download complete
    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChunkSource for SharedBuffer {
    fn read_at(&mut self, position: u64, length: usize) -> io::Result<Vec<u8>> {
        self.lock().data.read_at(position, length)
    }
}

impl ChunkSink for SharedBuffer {
    fn write_at(&mut self, position: u64, data: &[u8]) -> io::Result<()> {
        self.lock().data.write_at(position, data)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.lock().finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_bytes() {
        let observer = SharedBuffer::new();
        let mut sink = observer.clone();

        sink.write_at(0, b"tox").unwrap();
        sink.finish().unwrap();

        assert_eq!(observer.contents(), b"tox");
        assert!(observer.is_finished());
        assert_eq!(SharedBuffer::with_data(b"abc".to_vec()).read_at(1, 5).unwrap(), b"bc");
    }
}
