//! A chunk is the unit of transmission: a piece of at most [MAX_CHUNK_PAYLOAD] bytes of an
//!  outbound message, carrying a link to the chunk that precedes it in send order.
//!
//! Chunk frame - all numbers in network byte order (BE):
//!
//! ```ascii
//!  0: send time (f64) - seconds, refreshed on every (re)transmission, echoed in CHUNK_ACK
//!  8: rolling checksum (u32) - Adler-32 over the payload
//! 12: full checksum (16 bytes) - MD5 over id, previous id and payload, or all zeros if not
//!      used
//! 28: chunk id (u128)
//! 44: previous chunk id (u128) - all zeros for the first chunk of a connection
//! 60: payload
//! ```

use std::fmt::{Debug, Formatter};
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use uuid::Uuid;
use crate::config::MAX_CHUNK_PAYLOAD;

#[derive(Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChunkId(Uuid);

impl ChunkId {
    /// This is the 'previous id' of the first chunk on a connection, and the initial position
    ///  of the receiver's reassembly cursor
    pub const ZERO: ChunkId = ChunkId(Uuid::nil());

    pub fn random() -> ChunkId {
        ChunkId(Uuid::new_v4())
    }

    pub const fn from_raw(raw: u128) -> ChunkId {
        ChunkId(Uuid::from_u128(raw))
    }

    pub fn to_raw(&self) -> u128 {
        self.0.as_u128()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u128(self.to_raw());
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<ChunkId> {
        Ok(ChunkId::from_raw(buf.try_get_u128()?))
    }
}

impl Debug for ChunkId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub previous_id: ChunkId,
    pub payload: Bytes,
    /// seconds on the sender's clock
    pub time_sent: f64,
    pub rolling_checksum: u32,
    pub full_checksum: [u8; 16],
    is_valid: bool,
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Chunk{{id:{:?}, previous:{:?}, len:{}, valid:{}}}", self.id, self.previous_id, self.payload.len(), self.is_valid)
    }
}

impl Chunk {
    pub const HEADER_LEN: usize = std::mem::size_of::<f64>() + std::mem::size_of::<u32>() + 16;
    pub const DATA_HEADER_LEN: usize = 2 * std::mem::size_of::<u128>();
    pub const MIN_SERIALIZED_LEN: usize = Self::HEADER_LEN + Self::DATA_HEADER_LEN;

    pub fn new(payload: Bytes, previous_id: ChunkId, with_full_checksum: bool) -> Chunk {
        debug_assert!(payload.len() <= MAX_CHUNK_PAYLOAD);

        let id = ChunkId::random();
        let full_checksum = if with_full_checksum {
            full_checksum(id, previous_id, &payload)
        }
        else {
            [0u8; 16]
        };

        Chunk {
            id,
            previous_id,
            rolling_checksum: rolling_checksum(&payload),
            payload,
            time_sent: 0.0,
            full_checksum,
            is_valid: true,
        }
    }

    /// Cuts `data` into chunks of `chunk_size` bytes, the last one possibly shorter. Each chunk
    ///  links to its predecessor, the first one to `tail`, and `tail` is advanced to the last
    ///  chunk's id.
    pub fn segment(data: &Bytes, chunk_size: usize, tail: &mut ChunkId, with_full_checksum: bool) -> Vec<Chunk> {
        debug_assert!(chunk_size > 0 && chunk_size <= MAX_CHUNK_PAYLOAD);

        let mut result = Vec::with_capacity(data.len().div_ceil(chunk_size));
        let mut offs = 0;
        while offs < data.len() {
            let end = usize::min(offs + chunk_size, data.len());
            let chunk = Chunk::new(data.slice(offs..end), *tail, with_full_checksum);
            *tail = chunk.id;
            result.push(chunk);
            offs = end;
        }
        result
    }

    /// Only chunks that were deserialized can be invalid: true iff the rolling checksum matches,
    ///  and the full checksum matches as well if one was supplied
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn serialized_len(&self) -> usize {
        Self::MIN_SERIALIZED_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.reserve(self.serialized_len());
        buf.put_f64(self.time_sent);
        buf.put_u32(self.rolling_checksum);
        buf.put_slice(&self.full_checksum);
        self.id.ser(buf);
        self.previous_id.ser(buf);
        buf.put_slice(&self.payload);
    }

    /// Parses a chunk frame that extends to the end of `buf`. Failure means the frame is
    ///  truncated or oversized, i.e. corrupt beyond a checksum mismatch.
    pub fn try_deser(mut buf: Bytes) -> anyhow::Result<Chunk> {
        if buf.len() < Self::MIN_SERIALIZED_LEN {
            bail!("chunk frame has {} bytes, which is less than the minimum of {}", buf.len(), Self::MIN_SERIALIZED_LEN);
        }

        let time_sent = buf.try_get_f64()?;
        let received_rolling_checksum = buf.try_get_u32()?;
        let mut received_full_checksum = [0u8; 16];
        buf.try_copy_to_slice(&mut received_full_checksum)?;
        let id = ChunkId::try_deser(&mut buf)?;
        let previous_id = ChunkId::try_deser(&mut buf)?;
        let payload = buf;

        if payload.len() > MAX_CHUNK_PAYLOAD {
            bail!("chunk payload of {} bytes exceeds the maximum of {}", payload.len(), MAX_CHUNK_PAYLOAD);
        }

        let is_valid = rolling_checksum(&payload) == received_rolling_checksum
            && (received_full_checksum == [0u8; 16] || full_checksum(id, previous_id, &payload) == received_full_checksum);

        Ok(Chunk {
            id,
            previous_id,
            payload,
            time_sent,
            rolling_checksum: received_rolling_checksum,
            full_checksum: received_full_checksum,
            is_valid,
        })
    }
}

fn rolling_checksum(payload: &[u8]) -> u32 {
    adler2::adler32_slice(payload)
}

fn full_checksum(id: ChunkId, previous_id: ChunkId, payload: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(id.to_raw().to_be_bytes());
    hasher.update(previous_id.to_raw().to_be_bytes());
    hasher.update(payload);
    let digest = hasher.finalize();

    let mut result = [0u8; 16];
    result.copy_from_slice(&digest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn serialized(chunk: &Chunk) -> BytesMut {
        let mut buf = BytesMut::new();
        chunk.ser(&mut buf);
        buf
    }

    #[test]
    fn test_ser_layout() {
        let mut chunk = Chunk::new(Bytes::from_static(b"abc"), ChunkId::from_raw(7), false);
        chunk.time_sent = 1.5;

        let buf = serialized(&chunk);
        assert_eq!(buf.len(), 63);
        assert_eq!(&buf[..8], &1.5f64.to_be_bytes());
        assert_eq!(&buf[8..12], &rolling_checksum(b"abc").to_be_bytes());
        assert_eq!(&buf[12..28], &[0u8; 16]);
        assert_eq!(&buf[28..44], &chunk.id.to_raw().to_be_bytes());
        assert_eq!(&buf[44..60], &7u128.to_be_bytes());
        assert_eq!(&buf[60..], b"abc");
    }

    #[rstest]
    #[case::empty(b"", 0x0000_0001)]
    #[case::abc(b"abc", 0x024d_0127)]
    #[case::wikipedia(b"Wikipedia", 0x11e6_0398)]
    fn test_rolling_checksum_is_adler32(#[case] payload: &'static [u8], #[case] expected: u32) {
        assert_eq!(rolling_checksum(payload), expected);
    }

    #[test]
    fn test_full_checksum_is_md5_over_data_section() {
        let expected = [
            0xe7, 0x5c, 0x43, 0xdb, 0xbe, 0x96, 0xf2, 0xf7,
            0xed, 0x08, 0x89, 0xca, 0x69, 0xbb, 0x02, 0xb8,
        ];
        assert_eq!(full_checksum(ChunkId::from_raw(7), ChunkId::from_raw(3), b"abc"), expected);
    }

    #[rstest]
    #[case::empty_payload(b"", false)]
    #[case::short(b"hello", false)]
    #[case::full_checksum(b"hello", true)]
    fn test_deser_valid(#[case] payload: &'static [u8], #[case] with_full_checksum: bool) {
        let mut chunk = Chunk::new(Bytes::from_static(payload), ChunkId::random(), with_full_checksum);
        chunk.time_sent = 12345.25;

        let deser = Chunk::try_deser(serialized(&chunk).freeze()).unwrap();
        assert!(deser.is_valid());
        assert_eq!(deser.id, chunk.id);
        assert_eq!(deser.previous_id, chunk.previous_id);
        assert_eq!(deser.payload, chunk.payload);
        assert_eq!(deser.time_sent, 12345.25);
        assert_eq!(deser.full_checksum == [0u8; 16], !with_full_checksum);
    }

    #[rstest]
    #[case::first_payload_bit(60, 0x01, false, false)]
    #[case::last_payload_bit(67, 0x80, false, false)]
    #[case::payload_with_full_checksum(62, 0x10, true, false)]
    #[case::rolling_checksum(9, 0x01, false, false)]
    #[case::id_without_full_checksum(30, 0x01, false, true)]
    #[case::id_with_full_checksum(30, 0x01, true, false)]
    #[case::previous_id_with_full_checksum(50, 0x01, true, false)]
    #[case::full_checksum(20, 0x01, true, false)]
    #[case::time_sent(3, 0x01, true, true)]
    fn test_tampered(#[case] offset: usize, #[case] mask: u8, #[case] with_full_checksum: bool, #[case] expected_valid: bool) {
        let chunk = Chunk::new(Bytes::from_static(b"abcdefgh"), ChunkId::random(), with_full_checksum);
        let mut buf = serialized(&chunk);
        buf[offset] ^= mask;

        let deser = Chunk::try_deser(buf.freeze()).unwrap();
        assert_eq!(deser.is_valid(), expected_valid);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::header_only(28)]
    #[case::one_short(59)]
    fn test_deser_truncated(#[case] len: usize) {
        let chunk = Chunk::new(Bytes::from_static(b"abc"), ChunkId::random(), false);
        let buf = serialized(&chunk).freeze();
        assert!(Chunk::try_deser(buf.slice(..len)).is_err());
    }

    #[test]
    fn test_deser_oversized() {
        let mut buf = BytesMut::new();
        buf.put_bytes(0, Chunk::MIN_SERIALIZED_LEN + MAX_CHUNK_PAYLOAD + 1);
        assert!(Chunk::try_deser(buf.freeze()).is_err());
    }

    #[rstest]
    #[case::empty(0, 4096, vec![])]
    #[case::single_byte(1, 4096, vec![1])]
    #[case::exact(4096, 4096, vec![4096])]
    #[case::ten_thousand(10_000, 4096, vec![4096, 4096, 1808])]
    #[case::small_chunks(10, 3, vec![3, 3, 3, 1])]
    fn test_segment(#[case] len: usize, #[case] chunk_size: usize, #[case] expected_lengths: Vec<usize>) {
        let data: Bytes = (0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
        let initial_tail = ChunkId::random();
        let mut tail = initial_tail;

        let chunks = Chunk::segment(&data, chunk_size, &mut tail, false);

        assert_eq!(chunks.iter().map(|c| c.payload.len()).collect::<Vec<_>>(), expected_lengths);

        let mut expected_previous = initial_tail;
        let mut reassembled = Vec::new();
        for chunk in &chunks {
            assert_eq!(chunk.previous_id, expected_previous);
            expected_previous = chunk.id;
            reassembled.extend_from_slice(&chunk.payload);
        }
        assert_eq!(tail, expected_previous);
        assert_eq!(&reassembled[..], &data[..]);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn test_new_rejects_oversized_payload() {
        Chunk::new(Bytes::from(vec![0u8; MAX_CHUNK_PAYLOAD + 1]), ChunkId::ZERO, false);
    }

    #[test]
    fn test_segment_chains_across_calls() {
        let mut tail = ChunkId::ZERO;
        let first = Chunk::segment(&Bytes::from_static(b"abcdef"), 4, &mut tail, false);
        let second = Chunk::segment(&Bytes::from_static(b"xyz"), 4, &mut tail, false);

        assert_eq!(first[0].previous_id, ChunkId::ZERO);
        assert_eq!(second[0].previous_id, first[1].id);
        assert_eq!(tail, second[0].id);
    }
}
