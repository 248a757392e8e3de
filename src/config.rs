use std::time::Duration;
use anyhow::bail;

/// This is the largest payload a single chunk may carry on the wire. Peers with a smaller
///  configured chunk size interoperate with this maximum, since chunk boundaries are not
///  negotiated.
pub const MAX_CHUNK_PAYLOAD: usize = 4096;

/// The transport identifier under which DSTP traffic is multiplexed on the packet substrate
pub const DSTP_TRANSPORT_ID: u8 = 0x06;

#[derive(Debug, Clone)]
pub struct DstpConfig {
    /// Outbound messages are cut into chunks of this many bytes (the last chunk of a message may
    ///  be shorter). Must be between 1 and [MAX_CHUNK_PAYLOAD].
    pub chunk_size: usize,

    /// The window size a connection starts with, and is reset to when it is killed
    pub initial_window_size: f32,
    /// The window never shrinks below this, regardless of observed delay
    pub min_window_size: f32,

    /// A connection request that is not accepted within this interval kills the connection
    pub connect_timeout: Duration,
    /// Interval between keepalive pings, and the deadline for the corresponding pong
    pub ping_interval: Duration,
    /// The connection is killed once the number of consecutive unanswered pings exceeds this
    pub max_ping_failures: u32,
    /// An in-flight chunk is retransmitted once it is unacknowledged for this long plus the
    ///  current round trip delay
    pub resend_grace: Duration,

    /// Upper bound for the number of chunks buffered by the receiver because they do not (yet)
    ///  chain to the reassembly cursor. Exceeding it is treated as a connection fault.
    pub max_buffered_chunks: usize,
    /// Same as `max_buffered_chunks`, but for the sum of buffered payload bytes
    pub max_buffered_bytes: usize,

    /// Attach a 128 bit checksum over id, previous id and payload to every chunk. Receivers
    ///  always verify a full checksum if it is present, regardless of this setting.
    pub use_full_checksum: bool,

    pub transport_id: u8,

    /// Capacity of the broadcast channel delivering reassembled data to subscribers. Slow
    ///  subscribers that fall behind by more than this lose data.
    pub inbound_channel_capacity: usize,
}

impl Default for DstpConfig {
    fn default() -> Self {
        DstpConfig {
            chunk_size: MAX_CHUNK_PAYLOAD,
            initial_window_size: 16.0,
            min_window_size: 5.0,
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            max_ping_failures: 10,
            resend_grace: Duration::from_secs(5),
            max_buffered_chunks: 64 * 1024,
            max_buffered_bytes: 256 * 1024 * 1024,
            use_full_checksum: false,
            transport_id: DSTP_TRANSPORT_ID,
            inbound_channel_capacity: 1024,
        }
    }
}

impl DstpConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk size must be positive");
        }
        if self.chunk_size > MAX_CHUNK_PAYLOAD {
            bail!("chunk size {} exceeds the wire maximum of {}", self.chunk_size, MAX_CHUNK_PAYLOAD);
        }
        if !(self.min_window_size > 0.0) {
            bail!("minimum window size must be positive");
        }
        if self.initial_window_size < self.min_window_size {
            bail!("initial window size {} is below the minimum window size {}", self.initial_window_size, self.min_window_size);
        }
        if self.connect_timeout.is_zero() || self.ping_interval.is_zero() || self.resend_grace.is_zero() {
            bail!("timer intervals must be positive");
        }
        if self.max_ping_failures == 0 {
            bail!("max ping failures must be positive");
        }
        if self.max_buffered_chunks == 0 || self.max_buffered_bytes == 0 {
            bail!("reassembly buffer limits must be positive");
        }
        if self.inbound_channel_capacity == 0 {
            bail!("inbound channel capacity must be positive");
        }
        Ok(())
    }
}
