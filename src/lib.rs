//! DSTP is a transport that provides reliable, ordered, flow-controlled byte streams between
//!  named peers on top of an unreliable packet substrate (see [substrate::PacketSubstrate]).
//!
//! There is one connection per (channel, peer) pair, created on demand by the
//!  [dispatcher::TransportDispatcher] for both inbound and outbound traffic. Outbound data is cut
//!  into checksummed chunks, each linked to its predecessor, and sent within an adaptive window.
//!  Unacknowledged chunks are retransmitted, and corrupt chunks are negatively acknowledged and
//!  resent immediately. The receiver follows the links to restore send order.
//!
//! Connections are established lazily by the first `send`, and monitored by periodic
//!  keepalive pings. A connection that is killed - because its handshake timed out, its peer
//!  stopped responding or reset it - fails all of its pending sends.
//!
//! DSTP does not provide encryption, authentication, fairness between connections or
//!  persistence.

pub mod chunk;
pub mod chunk_tracker;
pub mod config;
pub mod connection;
pub mod connection_identity;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod peer_addr;
pub mod substrate;
pub mod test_util;
