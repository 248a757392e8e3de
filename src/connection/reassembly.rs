use bytes::{Bytes, BytesMut};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};
use crate::chunk::{Chunk, ChunkId};
use crate::config::DstpConfig;

/// The inbound half of a connection: restores send order from chunks arriving in arbitrary order
///  by following the 'previous id' links, starting at [ChunkId::ZERO].
///
/// Chunks that do not (yet) chain to the cursor are buffered, keyed by their predecessor's id.
///  Each time a chunk arrives, the longest contiguous run starting at the cursor is emitted as a
///  single block of bytes.
pub(crate) struct Reassembly {
    max_buffered_chunks: usize,
    max_buffered_bytes: usize,

    /// ids of all chunks ever accepted on this connection incarnation, for duplicate suppression
    seen: FxHashSet<ChunkId>,
    by_previous: FxHashMap<ChunkId, Chunk>,
    buffered_bytes: usize,
    /// the id of the last chunk that was delivered
    cursor: ChunkId,
}

impl Reassembly {
    pub fn new(config: &DstpConfig) -> Reassembly {
        Reassembly {
            max_buffered_chunks: config.max_buffered_chunks,
            max_buffered_bytes: config.max_buffered_bytes,
            seen: Default::default(),
            by_previous: Default::default(),
            buffered_bytes: 0,
            cursor: ChunkId::ZERO,
        }
    }

    pub fn num_buffered_chunks(&self) -> usize {
        self.by_previous.len()
    }

    pub fn num_buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub fn is_duplicate(&self, chunk_id: &ChunkId) -> bool {
        self.seen.contains(chunk_id)
    }

    /// true if chunks buffered out of order exceed the configured limits
    pub fn is_over_limit(&self) -> bool {
        self.by_previous.len() > self.max_buffered_chunks
            || self.buffered_bytes > self.max_buffered_bytes
    }

    /// Accepts a verified chunk, returning the bytes that became deliverable because of it (if
    ///  any). Duplicates are ignored.
    pub fn on_chunk(&mut self, chunk: Chunk) -> Option<Bytes> {
        if !self.seen.insert(chunk.id) {
            trace!("ignoring duplicate chunk {:?}", chunk.id);
            return None;
        }

        let chunk_id = chunk.id;
        self.buffered_bytes += chunk.payload.len();
        if let Some(replaced) = self.by_previous.insert(chunk.previous_id, chunk) {
            debug!("chunk {:?} replaces {:?} as successor of {:?}", chunk_id, replaced.id, replaced.previous_id);
            self.buffered_bytes -= replaced.payload.len();
            // a retransmission of the replaced chunk must be accepted again
            self.seen.remove(&replaced.id);
        }

        self.walk()
    }

    fn walk(&mut self) -> Option<Bytes> {
        let mut parts = Vec::new();
        while let Some(next) = self.by_previous.remove(&self.cursor) {
            self.buffered_bytes -= next.payload.len();
            self.cursor = next.id;
            parts.push(next.payload);
        }

        match parts.len() {
            0 => None,
            1 => parts.pop(),
            _ => {
                let mut buf = BytesMut::with_capacity(parts.iter().map(|p| p.len()).sum());
                for part in &parts {
                    buf.extend_from_slice(part);
                }
                Some(buf.freeze())
            }
        }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.by_previous.clear();
        self.buffered_bytes = 0;
        self.cursor = ChunkId::ZERO;
    }
}
