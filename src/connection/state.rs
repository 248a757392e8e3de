use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};
use crate::chunk::Chunk;
use crate::chunk_tracker::SendResult;
use crate::config::DstpConfig;
use crate::connection::reassembly::Reassembly;
use crate::connection::send_window::SendWindow;
use crate::error::DisconnectReason;
use crate::message::DstpMessage;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Timers are identified by the 'incarnation' they were armed in, so that a timer outliving a
///  state change is recognized as stale and ignored
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimerEvent {
    ConnectTimeout { attempt: u64 },
    PingDeadline { keepalive_epoch: u64 },
}

/// Side effects of processing an event. They are collected while the state is updated, and
///  executed afterwards.
#[derive(Debug)]
pub(crate) enum Effect {
    Transmit(Bytes),
    Deliver(Bytes),
    ArmTimer(TimerEvent, Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub status: ConnectionStatus,
    pub window_size: f32,
    pub num_in_flight: usize,
    pub num_queued: usize,
    pub num_pending_sends: usize,
    /// seconds
    pub round_trip_delay: f64,
    pub num_buffered_chunks: usize,
    pub ping_failures: u32,
}

/// The protocol logic of a single connection. Time is passed in explicitly as seconds since an
///  arbitrary origin, and there is no I/O: everything that should happen as a consequence of an
///  event is recorded as an [Effect].
pub(crate) struct ConnectionState {
    config: Arc<DstpConfig>,
    status: ConnectionStatus,

    connect_attempt: u64,
    keepalive_epoch: u64,
    last_ping_sent: f64,
    pong_outstanding: bool,
    ping_failures: u32,

    send_window: SendWindow,
    reassembly: Reassembly,

    effects: Vec<Effect>,
}

impl ConnectionState {
    pub fn new(config: Arc<DstpConfig>) -> ConnectionState {
        ConnectionState {
            send_window: SendWindow::new(&config),
            reassembly: Reassembly::new(&config),
            config,
            status: ConnectionStatus::Disconnected,
            connect_attempt: 0,
            keepalive_epoch: 0,
            last_ping_sent: 0.0,
            pong_outstanding: false,
            ping_failures: 0,
            effects: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            status: self.status,
            window_size: self.send_window.window_size(),
            num_in_flight: self.send_window.num_in_flight(),
            num_queued: self.send_window.num_queued(),
            num_pending_sends: self.send_window.num_trackers(),
            round_trip_delay: self.send_window.round_trip_delay(),
            num_buffered_chunks: self.reassembly.num_buffered_chunks(),
            ping_failures: self.ping_failures,
        }
    }

    pub fn send(&mut self, data: Bytes, completion: oneshot::Sender<SendResult>, now: f64) {
        self.send_window.enqueue(&data, completion);

        match self.status {
            ConnectionStatus::Connected => self.drain(now),
            ConnectionStatus::Connecting => {}
            ConnectionStatus::Disconnected => self.connect(),
        }
    }

    /// Starts a handshake if there is neither a connection nor a pending handshake
    pub fn connect(&mut self) {
        if self.status != ConnectionStatus::Disconnected {
            return;
        }

        self.connect_attempt += 1;
        debug!("requesting connection (attempt #{})", self.connect_attempt);
        self.status = ConnectionStatus::Connecting;
        self.transmit(DstpMessage::ConnectionRequest);
        self.effects.push(Effect::ArmTimer(TimerEvent::ConnectTimeout { attempt: self.connect_attempt }, self.config.connect_timeout));
    }

    /// Discards all connection state, failing pending sends with `reason`
    pub fn kill(&mut self, reason: DisconnectReason) {
        if self.status != ConnectionStatus::Disconnected || self.send_window.num_trackers() > 0 {
            info!("connection killed: {}", reason);
        }

        self.status = ConnectionStatus::Disconnected;
        self.keepalive_epoch += 1;
        self.ping_failures = 0;
        self.last_ping_sent = 0.0;
        self.pong_outstanding = false;

        self.send_window.reset(reason);
        self.reassembly.reset();
    }

    pub fn on_timer(&mut self, event: TimerEvent, now: f64) {
        match event {
            TimerEvent::ConnectTimeout { attempt } => {
                if self.status == ConnectionStatus::Connecting && attempt == self.connect_attempt {
                    warn!("connection request #{} was not accepted", attempt);
                    self.kill(DisconnectReason::HandshakeTimeout);
                }
            }
            TimerEvent::PingDeadline { keepalive_epoch } => {
                if self.status == ConnectionStatus::Connected && keepalive_epoch == self.keepalive_epoch {
                    self.on_ping_deadline(now);
                }
            }
        }
    }

    pub fn on_message(&mut self, raw: Bytes, now: f64) {
        let msg = match DstpMessage::try_deser(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("dropping malformed message: {}", e);
                return;
            }
        };
        trace!("received {:?}", msg);

        match msg {
            DstpMessage::ConnectionRequest => self.on_connection_request(now),
            DstpMessage::ConnectionAccept => self.on_connection_accept(now),
            DstpMessage::ConnectionReset => {
                self.kill(DisconnectReason::RemoteReset);
                self.connect();
            }
            DstpMessage::Disconnect => self.kill(DisconnectReason::RemoteDisconnect),
            DstpMessage::Ping => match self.status {
                ConnectionStatus::Connected => self.transmit(DstpMessage::Pong),
                ConnectionStatus::Disconnected => self.transmit(DstpMessage::Disconnect),
                ConnectionStatus::Connecting => {}
            },
            DstpMessage::Pong => self.on_pong(now),
            DstpMessage::Chunk(chunk) => self.on_chunk(chunk),
            DstpMessage::ChunkAck { id, time_sent } => {
                if self.status == ConnectionStatus::Connected {
                    self.send_window.on_ack(id, time_sent, now);
                    self.drain(now);
                }
            }
            DstpMessage::ChunkNack { id } => {
                if self.status == ConnectionStatus::Connected {
                    match self.send_window.on_nack(id, now) {
                        Some(chunk) => {
                            debug!("resending {:?} after negative acknowledgement", chunk.id);
                            self.transmit(DstpMessage::Chunk(chunk));
                        }
                        None => trace!("negative acknowledgement for {:?}, which is not in flight", id),
                    }
                }
            }
        }
    }

    fn on_connection_request(&mut self, now: f64) {
        if self.status == ConnectionStatus::Connected {
            // the peer lost its state: make it start over, and start over ourselves
            debug!("connection request on established connection - resetting");
            self.transmit(DstpMessage::ConnectionReset);
            self.kill(DisconnectReason::RemoteReset);
            return;
        }

        self.transmit(DstpMessage::ConnectionAccept);
        self.establish(now);
    }

    fn on_connection_accept(&mut self, now: f64) {
        if self.status == ConnectionStatus::Connected {
            self.drain(now);
            return;
        }
        self.establish(now);
    }

    fn establish(&mut self, now: f64) {
        debug!("connection established");
        self.status = ConnectionStatus::Connected;
        self.keepalive_epoch += 1;
        self.ping_failures = 0;
        self.ping(now);
        self.drain(now);
    }

    fn ping(&mut self, now: f64) {
        self.last_ping_sent = now;
        self.pong_outstanding = true;
        self.transmit(DstpMessage::Ping);
        self.effects.push(Effect::ArmTimer(
            TimerEvent::PingDeadline { keepalive_epoch: self.keepalive_epoch },
            self.config.ping_interval,
        ));
    }

    fn on_ping_deadline(&mut self, now: f64) {
        if self.pong_outstanding {
            self.ping_failures += 1;
            debug!("no pong for ping sent at {} ({} consecutive failures)", self.last_ping_sent, self.ping_failures);
            if self.ping_failures > self.config.max_ping_failures {
                self.kill(DisconnectReason::KeepaliveExhausted);
                return;
            }
        }
        self.ping(now);
    }

    fn on_pong(&mut self, now: f64) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        if self.pong_outstanding {
            self.pong_outstanding = false;
            self.send_window.set_round_trip_delay(now - self.last_ping_sent);
        }
        else {
            trace!("duplicate or late pong - not sampling round trip delay");
        }
        self.ping_failures = 0;
        self.drain(now);
    }

    fn on_chunk(&mut self, chunk: Chunk) {
        match self.status {
            ConnectionStatus::Connected => {}
            ConnectionStatus::Disconnected => {
                self.transmit(DstpMessage::Disconnect);
                return;
            }
            ConnectionStatus::Connecting => {
                trace!("dropping {:?} received before the handshake completed", chunk.id);
                return;
            }
        }

        if !chunk.is_valid() {
            debug!("checksum mismatch for {:?}", chunk.id);
            self.transmit(DstpMessage::ChunkNack { id: chunk.id });
            return;
        }

        // duplicates are acknowledged as well: the original acknowledgement may have been lost
        self.transmit(DstpMessage::ChunkAck { id: chunk.id, time_sent: chunk.time_sent });

        if let Some(data) = self.reassembly.on_chunk(chunk) {
            self.effects.push(Effect::Deliver(data));
        }

        if self.reassembly.is_over_limit() {
            warn!("{} chunks ({} bytes) buffered out of order", self.reassembly.num_buffered_chunks(), self.reassembly.num_buffered_bytes());
            self.transmit(DstpMessage::Disconnect);
            self.kill(DisconnectReason::ReassemblyOverflow);
        }
    }

    fn drain(&mut self, now: f64) {
        for chunk in self.send_window.drain(now) {
            self.transmit(DstpMessage::Chunk(chunk));
        }
    }

    fn transmit(&mut self, msg: DstpMessage) {
        trace!("sending {:?}", msg);
        self.effects.push(Effect::Transmit(msg.to_bytes()));
    }
}
