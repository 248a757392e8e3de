//! Utilities for testing code that uses DSTP, without actual network I/O. They are used for
//!  testing the transport itself, but they are also exported for application testing.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;
use crate::message::{DstpMessage, MessageKind};
use crate::peer_addr::PeerAddress;
use crate::substrate::{PacketSubstrate, Parcel};

/// convenience method for test code: create a [PeerAddress] based on a number, the same number
///  generating the same address and different numbers different addresses
pub fn test_peer_addr(number: u16) -> PeerAddress {
    PeerAddress::new("test-app", "loopback", "localhost", number.to_string())
}

/// What happens to a packet on a [LoopbackNetwork]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PacketFate {
    Deliver,
    Drop,
    /// deliver with the last byte flipped
    Corrupt,
    /// deliver after the given delay, allowing later packets to overtake this one
    Delay(Duration),
}

/// A packet as observed by a [LoopbackNetwork]'s filter and traffic log
#[derive(Debug, Clone)]
pub struct Packet {
    pub from: PeerAddress,
    pub to: PeerAddress,
    pub channel: Bytes,
    /// `None` if the packet is not a well-formed DSTP message
    pub kind: Option<MessageKind>,
    pub fate: PacketFate,
}

type PacketFilter = Box<dyn FnMut(&Packet) -> PacketFate + Send>;

type EndpointKey = (Bytes, Bytes, Bytes, Bytes);

fn endpoint_key(addr: &PeerAddress) -> EndpointKey {
    (addr.application.clone(), addr.network_type.clone(), addr.network_address.clone(), addr.network_port.clone())
}

#[derive(Default)]
struct LoopbackInner {
    endpoints: FxHashMap<EndpointKey, mpsc::Sender<Parcel>>,
    filter: Option<PacketFilter>,
    traffic: Vec<Packet>,
}

/// An in-memory packet substrate connecting any number of endpoints. Packets are delivered
///  immediately unless a filter decides otherwise, and packets to unknown addresses are
///  silently dropped.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Mutex<LoopbackInner>>,
}

impl LoopbackNetwork {
    const ENDPOINT_QUEUE_LEN: usize = 4096;

    pub fn new() -> LoopbackNetwork {
        Default::default()
    }

    /// Registers an endpoint, returning the substrate to send with and the receiving end for
    ///  packets addressed to it
    pub async fn endpoint(&self, address: PeerAddress) -> (Arc<dyn PacketSubstrate>, mpsc::Receiver<Parcel>) {
        let (send, recv) = mpsc::channel(Self::ENDPOINT_QUEUE_LEN);
        self.inner.lock().await
            .endpoints.insert(endpoint_key(&address), send);

        let substrate = LoopbackSubstrate {
            network: self.clone(),
            myself: address,
        };
        (Arc::new(substrate), recv)
    }

    /// Replaces the filter deciding the fate of every subsequent packet
    pub async fn set_filter(&self, filter: impl FnMut(&Packet) -> PacketFate + Send + 'static) {
        self.inner.lock().await
            .filter = Some(Box::new(filter));
    }

    pub async fn clear_filter(&self) {
        self.inner.lock().await
            .filter = None;
    }

    /// returns the packets sent so far, clearing the internal buffer
    pub async fn traffic(&self) -> Vec<Packet> {
        std::mem::take(&mut self.inner.lock().await.traffic)
    }

    async fn transmit(&self, from: &PeerAddress, to: PeerAddress, channel: Bytes, transport_id: u8, data: Bytes) {
        let mut inner = self.inner.lock().await;

        let mut packet = Packet {
            from: from.clone(),
            to,
            channel,
            kind: DstpMessage::try_deser(data.clone()).ok().map(|msg| msg.kind()),
            fate: PacketFate::Deliver,
        };
        if let Some(filter) = &mut inner.filter {
            packet.fate = filter(&packet);
        }
        trace!("{:?} -> {:?}: {:?} ({:?})", packet.from, packet.to, packet.kind, packet.fate);

        let Some(endpoint) = inner.endpoints.get(&endpoint_key(&packet.to)).cloned() else {
            inner.traffic.push(packet);
            return;
        };

        let payload = match packet.fate {
            PacketFate::Drop => None,
            PacketFate::Corrupt => {
                let mut corrupted = data.to_vec();
                if let Some(last) = corrupted.last_mut() {
                    *last ^= 0x01;
                }
                Some(Bytes::from(corrupted))
            }
            PacketFate::Deliver | PacketFate::Delay(_) => Some(data),
        };

        if let Some(payload) = payload {
            let parcel = Parcel {
                transport_id,
                channel: packet.channel.clone(),
                address: packet.from.clone(),
                payload,
            };
            match packet.fate {
                PacketFate::Delay(delay) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = endpoint.try_send(parcel);
                    });
                }
                _ => {
                    // a full queue loses the packet, just like a real network would
                    let _ = endpoint.try_send(parcel);
                }
            }
        }

        inner.traffic.push(packet);
    }
}

struct LoopbackSubstrate {
    network: LoopbackNetwork,
    myself: PeerAddress,
}

#[async_trait]
impl PacketSubstrate for LoopbackSubstrate {
    async fn send(&self, data: Bytes, channel: Bytes, transport_id: u8, to: PeerAddress) -> anyhow::Result<()> {
        self.network.transmit(&self.myself, to, channel, transport_id, data).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::deliver(PacketFate::Deliver, Some(vec![0x50]))]
    #[case::drop(PacketFate::Drop, None)]
    #[case::corrupt(PacketFate::Corrupt, Some(vec![0x51]))]
    #[tokio::test]
    async fn test_fates(#[case] fate: PacketFate, #[case] expected: Option<Vec<u8>>) {
        let network = LoopbackNetwork::new();
        let (a, _recv_a) = network.endpoint(test_peer_addr(1)).await;
        let (_b, mut recv_b) = network.endpoint(test_peer_addr(2)).await;
        network.set_filter(move |_| fate).await;

        a.send(DstpMessage::Ping.to_bytes(), Bytes::from_static(b"c"), 6, test_peer_addr(2)).await.unwrap();

        let received = recv_b.try_recv().ok();
        assert_eq!(received.as_ref().map(|p| p.payload.to_vec()), expected);
        if let Some(parcel) = received {
            assert_eq!(parcel.address, test_peer_addr(1));
            assert_eq!(parcel.channel, Bytes::from_static(b"c"));
            assert_eq!(parcel.transport_id, 6);
        }

        let traffic = network.traffic().await;
        assert_eq!(traffic.len(), 1);
        assert_eq!(traffic[0].kind, Some(MessageKind::Ping));
        assert_eq!(traffic[0].fate, fate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_reorders() {
        let network = LoopbackNetwork::new();
        let (a, _recv_a) = network.endpoint(test_peer_addr(1)).await;
        let (_b, mut recv_b) = network.endpoint(test_peer_addr(2)).await;

        network.set_filter(|p| if p.kind == Some(MessageKind::Ping) { PacketFate::Delay(Duration::from_millis(10)) } else { PacketFate::Deliver }).await;
        a.send(DstpMessage::Ping.to_bytes(), Bytes::new(), 6, test_peer_addr(2)).await.unwrap();
        a.send(DstpMessage::Pong.to_bytes(), Bytes::new(), 6, test_peer_addr(2)).await.unwrap();

        assert_eq!(recv_b.recv().await.unwrap().payload[0], 0x70);
        assert_eq!(recv_b.recv().await.unwrap().payload[0], 0x50);
    }

    #[tokio::test]
    async fn test_unknown_destination() {
        let network = LoopbackNetwork::new();
        let (a, _recv_a) = network.endpoint(test_peer_addr(1)).await;

        assert!(a.send(DstpMessage::Ping.to_bytes(), Bytes::new(), 6, test_peer_addr(99)).await.is_ok());
        assert_eq!(network.traffic().await.len(), 1);
    }
}
