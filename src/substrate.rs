use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use crate::peer_addr::PeerAddress;

/// The unreliable packet delivery layer DSTP runs on. It is responsible for addressing and for
///  multiplexing by application, channel and transport id; packets may be lost, duplicated,
///  reordered or corrupted.
///
/// This trait exists to decouple the protocol from actual network I/O, which also facilitates
///  mocking it away for testing.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PacketSubstrate: Send + Sync + 'static {
    /// A returned error is for diagnostics only: DSTP does not retry at this level, but relies
    ///  on its own retransmission instead
    async fn send(&self, data: Bytes, channel: Bytes, transport_id: u8, to: PeerAddress) -> anyhow::Result<()>;
}

/// An inbound packet as emitted by the substrate
#[derive(Debug, Clone)]
pub struct Parcel {
    pub transport_id: u8,
    pub channel: Bytes,
    /// the sender
    pub address: PeerAddress,
    pub payload: Bytes,
}
