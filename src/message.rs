//! Wire format of DSTP messages: a single leading type byte, followed by a type specific body.
//!  All numbers are in network byte order (BE).
//!
//! ```ascii
//! CONNECTION_REQUEST, CONNECTION_ACCEPT, CONNECTION_RESET, DISCONNECT, PING, PONG:
//!   [no body]
//!
//! CHUNK:
//!   chunk frame, see [crate::chunk]
//!
//! CHUNK_ACK:
//!   0: chunk id (u128)
//!  16: send time echoed from the acknowledged chunk (f64)
//!
//! CHUNK_NACK:
//!   0: chunk id (u128)
//! ```

use std::fmt::{Debug, Formatter};
use anyhow::anyhow;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use crate::chunk::{Chunk, ChunkId};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
pub enum MessageKind {
    Chunk = 0x02,
    ConnectionRequest = 0x05,
    ChunkAck = 0x06,
    ConnectionAccept = 0x0D,
    ConnectionReset = 0x10,
    ChunkNack = 0x15,
    Disconnect = 0x18,
    Ping = 0x50,
    Pong = 0x70,
}

#[derive(Clone)]
pub enum DstpMessage {
    ConnectionRequest,
    ConnectionAccept,
    ConnectionReset,
    Disconnect,
    Ping,
    Pong,
    /// NB: A chunk that failed checksum verification is still a well-formed message
    Chunk(Chunk),
    ChunkAck { id: ChunkId, time_sent: f64 },
    ChunkNack { id: ChunkId },
}

impl Debug for DstpMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DstpMessage::Chunk(chunk) => write!(f, "CHUNK {:?}", chunk),
            DstpMessage::ChunkAck { id, time_sent } => write!(f, "CHUNK_ACK {:?} @{}", id, time_sent),
            DstpMessage::ChunkNack { id } => write!(f, "CHUNK_NACK {:?}", id),
            other => write!(f, "{:?}", other.kind()),
        }
    }
}

impl DstpMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            DstpMessage::ConnectionRequest => MessageKind::ConnectionRequest,
            DstpMessage::ConnectionAccept => MessageKind::ConnectionAccept,
            DstpMessage::ConnectionReset => MessageKind::ConnectionReset,
            DstpMessage::Disconnect => MessageKind::Disconnect,
            DstpMessage::Ping => MessageKind::Ping,
            DstpMessage::Pong => MessageKind::Pong,
            DstpMessage::Chunk(_) => MessageKind::Chunk,
            DstpMessage::ChunkAck { .. } => MessageKind::ChunkAck,
            DstpMessage::ChunkNack { .. } => MessageKind::ChunkNack,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind().into());
        match self {
            DstpMessage::Chunk(chunk) => chunk.ser(buf),
            DstpMessage::ChunkAck { id, time_sent } => {
                id.ser(buf);
                buf.put_f64(*time_sent);
            }
            DstpMessage::ChunkNack { id } => id.ser(buf),
            _ => {}
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.ser(&mut buf);
        buf.freeze()
    }

    pub fn try_deser(mut buf: Bytes) -> anyhow::Result<DstpMessage> {
        let raw_kind = buf.try_get_u8()?;
        let kind = MessageKind::try_from(raw_kind)
            .map_err(|_| anyhow!("unknown message type {:#04x}", raw_kind))?;

        let msg = match kind {
            MessageKind::ConnectionRequest => DstpMessage::ConnectionRequest,
            MessageKind::ConnectionAccept => DstpMessage::ConnectionAccept,
            MessageKind::ConnectionReset => DstpMessage::ConnectionReset,
            MessageKind::Disconnect => DstpMessage::Disconnect,
            MessageKind::Ping => DstpMessage::Ping,
            MessageKind::Pong => DstpMessage::Pong,
            MessageKind::Chunk => DstpMessage::Chunk(Chunk::try_deser(buf)?),
            MessageKind::ChunkAck => {
                let id = ChunkId::try_deser(&mut buf)?;
                let time_sent = buf.try_get_f64()?;
                DstpMessage::ChunkAck { id, time_sent }
            }
            MessageKind::ChunkNack => DstpMessage::ChunkNack { id: ChunkId::try_deser(&mut buf)? },
        };
        Ok(msg)
    }
}
