use parking_lot::Mutex;

/// Ordered audio chunks waiting for the next batch tick
///
/// Pushes and drains are serialized by one lock, so a chunk pushed while a
/// drain is running lands either in that batch or in the next one, never in
/// both and never in neither.
#[derive(Debug, Default)]
pub struct AudioChunkBuffer {
    chunks: Mutex<Vec<Vec<u8>>>,
}

impl AudioChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chunk; empty chunks are ignored
    pub fn push(&self, chunk: Vec<u8>) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.lock().push(chunk);
    }

    /// Take everything buffered so far, leaving the buffer empty
    pub fn drain(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.chunks.lock())
    }

    /// Take everything buffered so far as one contiguous batch
    ///
    /// Returns `None` when nothing was buffered.
    pub fn drain_batch(&self) -> Option<Vec<u8>> {
        let chunks = self.drain();
        if chunks.is_empty() {
            return None;
        }
        Some(chunks.concat())
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }
}
