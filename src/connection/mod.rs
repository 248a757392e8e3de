use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, span, trace, warn, Instrument, Level};
use crate::chunk_tracker::{completion_channel, SendReceipt, SendResult};
use crate::config::DstpConfig;
use crate::connection::state::{ConnectionState, Effect};
use crate::connection_identity::ConnectionIdentity;
use crate::dispatcher::Reception;
use crate::error::DisconnectReason;
use crate::substrate::PacketSubstrate;

pub use state::{ConnectionStats, ConnectionStatus, TimerEvent};

mod reassembly;
mod send_window;
pub mod state;

/// Connection-local time as seconds since a fixed origin. All connections of a dispatcher share
///  the origin, and it is based on tokio's clock so that it follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    origin: Instant,
}

impl Clock {
    pub fn new() -> Clock {
        Clock { origin: Instant::now() }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

pub(crate) enum ConnectionEvent {
    Inbound(Bytes),
    Send { data: Bytes, completion: oneshot::Sender<SendResult> },
    Timer(TimerEvent),
    Stats(oneshot::Sender<ConnectionStats>),
    Shutdown,
}

/// A handle to the connection to a single peer on a single channel. Handles are cheap to clone;
///  all state lives in a task that processes the connection's events one at a time.
#[derive(Clone)]
pub struct Connection {
    identity: ConnectionIdentity,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection{{{:?}}}", self.identity)
    }
}

impl Connection {
    /// Spawns the connection's task, which runs until [Connection::shutdown] is called or all
    ///  handles are dropped
    pub(crate) fn spawn(
        identity: ConnectionIdentity,
        config: Arc<DstpConfig>,
        substrate: Arc<dyn PacketSubstrate>,
        receptions: broadcast::Sender<Reception>,
        clock: Clock,
    ) -> Connection {
        let (events_send, events_recv) = mpsc::unbounded_channel();

        let worker = ConnectionWorker {
            identity: identity.clone(),
            transport_id: config.transport_id,
            state: ConnectionState::new(config),
            substrate,
            receptions,
            timers: events_send.downgrade(),
            clock,
        };

        let span = span!(Level::DEBUG, "connection", channel = %String::from_utf8_lossy(identity.channel()), peer = %identity.address());
        tokio::spawn(worker.run(events_recv).instrument(span));

        Connection {
            identity,
            events: events_send,
        }
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Queues `data` for reliable, ordered delivery to the peer, establishing a connection if
    ///  necessary. The returned receipt resolves when all of the data was acknowledged, or when
    ///  the connection is killed before that.
    pub fn send(&self, data: impl Into<Bytes>) -> SendReceipt {
        let (completion, receipt) = completion_channel();
        // if the worker is gone, the completion is dropped and the receipt resolves accordingly
        let _ = self.events.send(ConnectionEvent::Send { data: data.into(), completion });
        receipt
    }

    /// Feeds a raw inbound message from the substrate into the connection
    pub fn receive(&self, raw: Bytes) {
        if self.events.send(ConnectionEvent::Inbound(raw)).is_err() {
            debug!("dropping inbound message for terminated connection {:?}", self.identity);
        }
    }

    /// `None` if the connection was shut down
    pub async fn stats(&self) -> Option<ConnectionStats> {
        let (send, recv) = oneshot::channel();
        self.events.send(ConnectionEvent::Stats(send)).ok()?;
        recv.await.ok()
    }

    /// Terminates the connection's task, failing all pending sends
    pub fn shutdown(&self) {
        let _ = self.events.send(ConnectionEvent::Shutdown);
    }

    pub fn is_shut_down(&self) -> bool {
        self.events.is_closed()
    }
}

struct ConnectionWorker {
    identity: ConnectionIdentity,
    transport_id: u8,
    state: ConnectionState,
    substrate: Arc<dyn PacketSubstrate>,
    receptions: broadcast::Sender<Reception>,
    /// weak so that pending timers do not keep the worker alive
    timers: mpsc::WeakUnboundedSender<ConnectionEvent>,
    clock: Clock,
}

impl ConnectionWorker {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
        trace!("starting connection worker");

        while let Some(event) = events.recv().await {
            let now = self.clock.now();
            match event {
                ConnectionEvent::Inbound(raw) => self.state.on_message(raw, now),
                ConnectionEvent::Send { data, completion } => self.state.send(data, completion, now),
                ConnectionEvent::Timer(timer_event) => self.state.on_timer(timer_event, now),
                ConnectionEvent::Stats(reply) => {
                    let _ = reply.send(self.state.stats());
                }
                ConnectionEvent::Shutdown => break,
            }
            self.execute_effects().await;
        }

        events.close();
        self.state.kill(DisconnectReason::Shutdown);
        // pending sends that were never picked up
        while let Ok(event) = events.try_recv() {
            if let ConnectionEvent::Send { completion, .. } = event {
                let _ = completion.send(Err(DisconnectReason::Shutdown));
            }
        }
        debug!("connection worker terminated");
    }

    async fn execute_effects(&mut self) {
        for effect in self.state.take_effects() {
            match effect {
                Effect::Transmit(data) => {
                    if let Err(e) = self.substrate.send(data, self.identity.channel().clone(), self.transport_id, self.identity.address().clone()).await {
                        warn!("error sending to {:?}: {}", self.identity.address(), e);
                    }
                }
                Effect::Deliver(data) => {
                    trace!("delivering {} bytes", data.len());
                    let reception = Reception {
                        data,
                        channel: self.identity.channel().clone(),
                        address: self.identity.address().clone(),
                    };
                    if self.receptions.send(reception).is_err() {
                        debug!("no subscribers - dropping received data");
                    }
                }
                Effect::ArmTimer(timer_event, delay) => {
                    let timers = self.timers.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(events) = timers.upgrade() {
                            let _ = events.send(ConnectionEvent::Timer(timer_event));
                        }
                    });
                }
            }
        }
    }
}
