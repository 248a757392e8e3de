use std::collections::VecDeque;
use std::time::Duration;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace};
use crate::chunk::{Chunk, ChunkId};
use crate::chunk_tracker::{ChunkTracker, SendResult};
use crate::config::DstpConfig;
use crate::error::DisconnectReason;

/// The outbound half of a connection: chunks waiting to be sent, chunks in flight, and the
///  adaptive window limiting the number of unacknowledged chunks.
///
/// The window is a simple negative feedback loop on the observed acknowledgement delay: while
///  the delay is below 100ms, the window grows in proportion to its utilisation; above that it
///  shrinks. It is *not* a fair congestion control.
pub(crate) struct SendWindow {
    initial_window_size: f32,
    min_window_size: f32,
    resend_grace: Duration,
    chunk_size: usize,
    use_full_checksum: bool,

    window_size: f32,
    /// seconds - the most recently observed acknowledgement (or pong) latency
    round_trip_delay: f64,

    /// chunks that were created by `send` but were never transmitted
    queue: VecDeque<Chunk>,
    /// chunks that were transmitted at least once and are not acknowledged yet
    in_flight: FxHashMap<ChunkId, Chunk>,
    /// the id of the most recently created chunk, i.e. the previous id of the next one
    tail: ChunkId,
    trackers: Vec<ChunkTracker>,
}

impl SendWindow {
    pub fn new(config: &DstpConfig) -> SendWindow {
        SendWindow {
            initial_window_size: config.initial_window_size,
            min_window_size: config.min_window_size,
            resend_grace: config.resend_grace,
            chunk_size: config.chunk_size,
            use_full_checksum: config.use_full_checksum,
            window_size: config.initial_window_size,
            round_trip_delay: 0.0,
            queue: Default::default(),
            in_flight: Default::default(),
            tail: ChunkId::ZERO,
            trackers: Default::default(),
        }
    }

    pub fn window_size(&self) -> f32 {
        self.window_size
    }

    pub fn round_trip_delay(&self) -> f64 {
        self.round_trip_delay
    }

    pub fn set_round_trip_delay(&mut self, delay: f64) {
        self.round_trip_delay = delay.max(0.0);
    }

    pub fn num_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn num_queued(&self) -> usize {
        self.queue.len()
    }

    pub fn num_trackers(&self) -> usize {
        self.trackers.len()
    }

    /// Segments `data` into chunks chained to the running tail and queues them, tracking their
    ///  completion with a new tracker
    pub fn enqueue(&mut self, data: &Bytes, completion: oneshot::Sender<SendResult>) {
        let chunks = Chunk::segment(data, self.chunk_size, &mut self.tail, self.use_full_checksum);
        trace!("queueing {} chunks for {} bytes", chunks.len(), data.len());

        let tracker = ChunkTracker::new(chunks.iter().map(|c| c.id), completion);
        if !tracker.is_done() {
            self.trackers.push(tracker);
        }
        self.queue.extend(chunks);
    }

    pub fn update_window_size(&mut self) {
        let delay_factor = (1.0 - self.round_trip_delay * 10.0) as f32;
        let window_factor = self.in_flight.len() as f32 / self.window_size;
        self.window_size += delay_factor * window_factor;

        if self.window_size < self.min_window_size {
            self.window_size = self.min_window_size;
        }
    }

    /// Returns the chunks to be transmitted now, stamped with `now` as their send time:
    ///  in-flight chunks whose acknowledgement is overdue first, followed by as many queued
    ///  chunks as fit into the remaining window.
    pub fn drain(&mut self, now: f64) -> Vec<Chunk> {
        self.update_window_size();

        let mut available = self.window_size.round() as i64 - self.in_flight.len() as i64;
        let resend_threshold = now - (self.round_trip_delay + self.resend_grace.as_secs_f64());

        let mut result = Vec::new();
        let mut resent = 0i64;
        for chunk in self.in_flight.values_mut() {
            if chunk.time_sent < resend_threshold {
                chunk.time_sent = now;
                result.push(chunk.clone());
                resent += 1;
            }
            if resent > available {
                break;
            }
        }
        if resent > 0 {
            debug!("resending {} chunks without acknowledgement", resent);
        }

        available -= resent;

        while available > 0 {
            let Some(mut chunk) = self.queue.pop_front() else {
                break;
            };
            chunk.time_sent = now;
            self.in_flight.insert(chunk.id, chunk.clone());
            result.push(chunk);
            available -= 1;
        }

        result
    }

    /// Returns `false` if the chunk is not (or no longer) in flight
    pub fn on_ack(&mut self, chunk_id: ChunkId, echoed_time_sent: f64, now: f64) -> bool {
        if !self.in_flight.contains_key(&chunk_id) {
            return false;
        }

        self.trackers.retain_mut(|tracker| {
            tracker.acknowledge(chunk_id);
            !tracker.is_done()
        });
        self.in_flight.remove(&chunk_id);
        self.set_round_trip_delay(now - echoed_time_sent);
        true
    }

    /// Returns the chunk for immediate retransmission if it is still in flight
    pub fn on_nack(&mut self, chunk_id: ChunkId, now: f64) -> Option<Chunk> {
        let chunk = self.in_flight.get_mut(&chunk_id)?;
        chunk.time_sent = now;
        Some(chunk.clone())
    }

    /// Discards all outbound state, failing every incomplete tracker with `reason`
    pub fn reset(&mut self, reason: DisconnectReason) {
        self.window_size = self.initial_window_size;
        self.round_trip_delay = 0.0;
        self.queue.clear();
        self.in_flight.clear();
        self.tail = ChunkId::ZERO;

        for tracker in &mut self.trackers {
            tracker.cancel(reason);
        }
        self.trackers.clear();
    }
}
