use std::collections::hash_map::Entry;
use std::sync::Arc;
use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, span, trace, Instrument, Level};
use uuid::Uuid;
use crate::chunk_tracker::SendReceipt;
use crate::config::DstpConfig;
use crate::connection::{Clock, Connection};
use crate::connection_identity::ConnectionIdentity;
use crate::peer_addr::PeerAddress;
use crate::substrate::{PacketSubstrate, Parcel};

/// Reassembled data from a peer, as published to the dispatcher's subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Reception {
    pub data: Bytes,
    pub channel: Bytes,
    pub address: PeerAddress,
}

/// The entry point of the transport: owns all connections, creating them on demand for both
///  inbound and outbound traffic, and merges all received data into a single stream of
///  [Reception]s.
pub struct TransportDispatcher {
    config: Arc<DstpConfig>,
    substrate: Arc<dyn PacketSubstrate>,
    connections: RwLock<FxHashMap<ConnectionIdentity, Connection>>,
    receptions: broadcast::Sender<Reception>,
    clock: Clock,
}

impl TransportDispatcher {
    pub fn new(config: DstpConfig, substrate: Arc<dyn PacketSubstrate>) -> anyhow::Result<TransportDispatcher> {
        config.validate()?;

        let (receptions, _) = broadcast::channel(config.inbound_channel_capacity);
        Ok(TransportDispatcher {
            config: Arc::new(config),
            substrate,
            connections: Default::default(),
            receptions,
            clock: Clock::new(),
        })
    }

    pub fn config(&self) -> &DstpConfig {
        &self.config
    }

    /// Subscribes to data received on any connection. Only data that is reassembled after the
    ///  call is seen by the new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<Reception> {
        self.receptions.subscribe()
    }

    /// Returns the connection for `channel` and `address`, creating it if it does not exist yet.
    ///  Creating a connection does not initiate a handshake.
    pub async fn get_or_create(&self, channel: Bytes, address: PeerAddress) -> Connection {
        let identity = ConnectionIdentity::new(channel, address);

        if let Some(connection) = self.connections.read().await.get(&identity) {
            return connection.clone();
        }

        match self.connections.write().await
            .entry(identity)
        {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                debug!("new connection {:?}", e.key());
                let connection = Connection::spawn(
                    e.key().clone(),
                    self.config.clone(),
                    self.substrate.clone(),
                    self.receptions.clone(),
                    self.clock,
                );
                e.insert(connection).clone()
            }
        }
    }

    /// Routes a message received from the substrate to its connection
    pub async fn dispatch_inbound(&self, channel: Bytes, address: PeerAddress, raw: Bytes) {
        self.get_or_create(channel, address).await
            .receive(raw);
    }

    /// Sends data to a peer on a channel, connecting first if necessary
    pub async fn send_via(&self, channel: Bytes, address: PeerAddress, data: impl Into<Bytes>) -> SendReceipt {
        self.get_or_create(channel, address).await
            .send(data)
    }

    /// Feeds parcels from the substrate into their connections until the channel is closed.
    ///  Parcels for other transports are ignored.
    pub async fn recv_loop(&self, mut parcels: mpsc::Receiver<Parcel>) {
        info!("starting receive loop");

        while let Some(parcel) = parcels.recv().await {
            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "parcel_received", ?correlation_id);
            self.on_parcel(parcel).instrument(span).await;
        }

        info!("substrate closed - receive loop terminated");
    }

    async fn on_parcel(&self, parcel: Parcel) {
        if parcel.transport_id != self.config.transport_id {
            trace!("ignoring parcel for transport {:#04x}", parcel.transport_id);
            return;
        }
        trace!("received {} bytes from {:?}", parcel.payload.len(), parcel.address);
        self.dispatch_inbound(parcel.channel, parcel.address, parcel.payload).await;
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.connections.read().await
            .values()
            .cloned()
            .collect()
    }

    /// Terminates all connections, failing their pending sends. The dispatcher creates new
    ///  connections if it is used afterwards.
    pub async fn shutdown(&self) {
        let connections = std::mem::take(&mut *self.connections.write().await);
        info!("shutting down {} connections", connections.len());
        for connection in connections.values() {
            connection.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;
    use crate::chunk::{Chunk, ChunkId};
    use crate::error::DisconnectReason;
    use crate::message::{DstpMessage, MessageKind};
    use crate::substrate::MockPacketSubstrate;

    fn addr(port: &'static str) -> PeerAddress {
        PeerAddress::new("app", "test", "host", port)
    }

    fn chan(name: &'static str) -> Bytes {
        Bytes::from_static(name.as_bytes())
    }

    fn silent_substrate() -> Arc<dyn PacketSubstrate> {
        let mut substrate = MockPacketSubstrate::new();
        substrate.expect_send()
            .returning(|_, _, _, _| Ok(()));
        Arc::new(substrate)
    }

    #[test]
    fn test_new_validates_config() {
        let config = DstpConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(TransportDispatcher::new(config, silent_substrate()).is_err());
    }

    #[rstest]
    #[case::same(chan("a"), addr("1"), chan("a"), addr("1"), true)]
    #[case::different_label(chan("a"), addr("1"), chan("a"), addr("1").with_label("x"), true)]
    #[case::different_channel(chan("a"), addr("1"), chan("b"), addr("1"), false)]
    #[case::different_port(chan("a"), addr("1"), chan("a"), addr("2"), false)]
    #[tokio::test]
    async fn test_get_or_create(#[case] chan_1: Bytes, #[case] addr_1: PeerAddress, #[case] chan_2: Bytes, #[case] addr_2: PeerAddress, #[case] expected_same: bool) {
        let dispatcher = TransportDispatcher::new(DstpConfig::default(), silent_substrate()).unwrap();

        let c1 = dispatcher.get_or_create(chan_1, addr_1).await;
        let c2 = dispatcher.get_or_create(chan_2, addr_2).await;

        assert_eq!(c1.identity() == c2.identity(), expected_same);
        assert_eq!(dispatcher.connections().await.len(), if expected_same { 1 } else { 2 });
    }

    #[tokio::test]
    async fn test_recv_loop_routes_parcels() {
        let dispatcher = TransportDispatcher::new(DstpConfig::default(), silent_substrate()).unwrap();
        let mut receptions = dispatcher.subscribe();

        let (send, recv) = mpsc::channel(16);
        let chunk = Chunk::new(Bytes::from_static(b"data"), ChunkId::ZERO, false);
        for (transport_id, payload) in [
            (0x07, DstpMessage::ConnectionRequest.to_bytes()),
            (0x06, DstpMessage::ConnectionRequest.to_bytes()),
            (0x06, DstpMessage::Chunk(chunk).to_bytes()),
        ] {
            send.send(Parcel { transport_id, channel: chan("c"), address: addr("1"), payload }).await.unwrap();
        }
        drop(send);

        dispatcher.recv_loop(recv).await;

        let reception = receptions.recv().await.unwrap();
        assert_eq!(reception, Reception { data: Bytes::from_static(b"data"), channel: chan("c"), address: addr("1") });
        assert_eq!(dispatcher.connections().await.len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_transport_creates_no_connection() {
        let dispatcher = TransportDispatcher::new(DstpConfig::default(), silent_substrate()).unwrap();

        let (send, recv) = mpsc::channel(16);
        send.send(Parcel { transport_id: 0x11, channel: chan("c"), address: addr("1"), payload: DstpMessage::Ping.to_bytes() }).await.unwrap();
        drop(send);
        dispatcher.recv_loop(recv).await;

        assert!(dispatcher.connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_send_via_connects() {
        let mut substrate = MockPacketSubstrate::new();
        substrate.expect_send()
            .withf(|data, channel, _, to| {
                DstpMessage::try_deser(data.clone()).unwrap().kind() == MessageKind::ConnectionRequest
                    && &channel[..] == b"c"
                    && &to.network_port[..] == b"1"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let dispatcher = TransportDispatcher::new(DstpConfig::default(), Arc::new(substrate)).unwrap();

        let _receipt = dispatcher.send_via(chan("c"), addr("1"), Bytes::from_static(b"x")).await;

        let connection = dispatcher.get_or_create(chan("c"), addr("1")).await;
        assert_eq!(connection.stats().await.unwrap().num_queued, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown() {
        let dispatcher = TransportDispatcher::new(DstpConfig::default(), silent_substrate()).unwrap();
        let receipt = dispatcher.send_via(chan("c"), addr("1"), Bytes::from_static(b"x")).await;
        let connection = dispatcher.get_or_create(chan("c"), addr("1")).await;

        dispatcher.shutdown().await;

        assert_eq!(receipt.await, Err(DisconnectReason::Shutdown));
        assert!(dispatcher.connections().await.is_empty());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(connection.is_shut_down());
    }
}
