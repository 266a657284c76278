//! Wire format for the two datagram kinds exchanged by server and client.
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! Data frame (12-byte header + payload):
//! +-------+---------+----------+----------+--------+----------+-------+-----------+
//! | final | request | src port | dst port | length | checksum |  seq  | payload   |
//! |  1 B  |   1 B   |   2 B    |   2 B    |  2 B   |   2 B    |  2 B  | length-12 |
//! +-------+---------+----------+----------+--------+----------+-------+-----------+
//!
//! ACK frame (7 bytes):
//! +-------+------------+----------+----------+
//! | final | ack number | checksum | src port |
//! |  1 B  |    2 B     |   2 B    |   2 B    |
//! +-------+------------+----------+----------+
//! ```
//!
//! The data checksum covers the whole frame with the checksum field zeroed.
//! The ACK checksum covers only `final` and `ack number`: the source port is
//! carried on the wire but is not protected.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::checksum::internet_checksum;

/// Size of the fixed data-frame header. Anything shorter is classified as an ACK.
pub const DATA_HEADER_LEN: usize = 12;
/// Size of an encoded ACK frame.
pub const ACK_FRAME_LEN: usize = 7;
/// Largest payload whose frame length still fits the 16-bit `length` field.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - DATA_HEADER_LEN;

const OFF_FINAL: usize = 0;
const OFF_REQUEST: usize = 1;
const OFF_SRC_PORT: usize = 2;
const OFF_DST_PORT: usize = 4;
const OFF_LENGTH: usize = 6;
const OFF_CHECKSUM: usize = 8;
const OFF_SEQ: usize = 10;

const ACK_OFF_FINAL: usize = 0;
const ACK_OFF_NUMBER: usize = 1;
const ACK_OFF_CHECKSUM: usize = 3;
const ACK_OFF_SRC_PORT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Data,
    Ack,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Data => f.write_str("data"),
            FrameKind::Ack => f.write_str("ack"),
        }
    }
}

/// A datagram that cannot be interpreted at all, or a payload that no frame
/// can carry.
///
/// Checksum mismatches are not errors; they set the packet's corrupted flag.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("{kind} frame truncated: {len} bytes, need at least {min}")]
    Truncated {
        kind: FrameKind,
        len: usize,
        min: usize,
    },
    #[error("payload of {len} bytes exceeds the {max}-byte frame limit")]
    PayloadTooLarge { len: usize, max: usize },
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// One fragment of a file, or a client's request for a file.
///
/// `length` and `checksum` are derived from the other fields, so an
/// uncorrupted packet always encodes to a frame that decodes equal to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub source_port: u16,
    pub dest_port: u16,
    pub seq: u16,
    pub is_final: bool,
    pub is_file_request: bool,
    payload: Bytes,
    length: u16,
    corrupted: bool,
}

impl DataPacket {
    /// Build a data packet, rejecting payloads over [`MAX_PAYLOAD_LEN`].
    pub fn new(
        source_port: u16,
        dest_port: u16,
        seq: u16,
        payload: impl Into<Bytes>,
    ) -> Result<Self, FrameError> {
        let payload = payload.into();
        Ok(Self {
            source_port,
            dest_port,
            seq,
            is_final: false,
            is_file_request: false,
            length: frame_length(payload.len())?,
            payload,
            corrupted: false,
        })
    }

    /// A request for `file_name`, sent from the client's receive port.
    pub fn file_request(
        source_port: u16,
        dest_port: u16,
        file_name: &str,
    ) -> Result<Self, FrameError> {
        let mut packet = Self::new(
            source_port,
            dest_port,
            0,
            Bytes::copy_from_slice(file_name.as_bytes()),
        )?;
        packet.is_file_request = true;
        Ok(packet)
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Header plus payload length, as carried on the wire.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Checksum of the frame this packet encodes to.
    pub fn checksum(&self) -> u16 {
        internet_checksum(&self.write_frame())
    }

    /// The requested file name, for a well-formed file request.
    pub fn file_name(&self) -> Option<&str> {
        if !self.is_file_request {
            return None;
        }
        std::str::from_utf8(&self.payload)
            .ok()
            .filter(|name| !name.is_empty())
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Treat the packet as if its checksum had failed verification.
    pub fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = self.write_frame();
        let checksum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&checksum.to_be_bytes());
        buf.freeze()
    }

    /// Parse a data frame and verify its checksum.
    ///
    /// The payload runs to the end of the datagram. A checksum mismatch, or a
    /// `length` field that disagrees with the datagram size, marks the packet
    /// corrupted instead of failing.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < DATA_HEADER_LEN {
            return Err(FrameError::Truncated {
                kind: FrameKind::Data,
                len: buf.len(),
                min: DATA_HEADER_LEN,
            });
        }

        let payload = &buf[DATA_HEADER_LEN..];
        let length = frame_length(payload.len())?;

        let mut scratch = buf.to_vec();
        scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].fill(0);
        let corrupted = internet_checksum(&scratch) != read_u16(buf, OFF_CHECKSUM)
            || read_u16(buf, OFF_LENGTH) != length;

        Ok(Self {
            source_port: read_u16(buf, OFF_SRC_PORT),
            dest_port: read_u16(buf, OFF_DST_PORT),
            seq: read_u16(buf, OFF_SEQ),
            is_final: buf[OFF_FINAL] != 0,
            is_file_request: buf[OFF_REQUEST] != 0,
            payload: Bytes::copy_from_slice(payload),
            length,
            corrupted,
        })
    }

    /// Frame bytes with the checksum field left zero.
    fn write_frame(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(usize::from(self.length));
        buf.put_u8(u8::from(self.is_final));
        buf.put_u8(u8::from(self.is_file_request));
        buf.put_u16(self.source_port);
        buf.put_u16(self.dest_port);
        buf.put_u16(self.length);
        buf.put_u16(0);
        buf.put_u16(self.seq);
        buf.put_slice(&self.payload);
        buf
    }
}

fn frame_length(payload_len: usize) -> Result<u16, FrameError> {
    u16::try_from(DATA_HEADER_LEN + payload_len).map_err(|_| FrameError::PayloadTooLarge {
        len: payload_len,
        max: MAX_PAYLOAD_LEN,
    })
}

/// Acknowledgment of a single data packet, keyed by its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPacket {
    pub ack_number: u16,
    /// The client's receive port; the server routes on it.
    pub source_port: u16,
    pub is_final: bool,
    corrupted: bool,
}

impl AckPacket {
    pub fn new(ack_number: u16, source_port: u16, is_final: bool) -> Self {
        Self {
            ack_number,
            source_port,
            is_final,
            corrupted: false,
        }
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// Checksum over `final` and `ack number` only.
    pub fn checksum(&self) -> u16 {
        let [hi, lo] = self.ack_number.to_be_bytes();
        internet_checksum(&[u8::from(self.is_final), hi, lo])
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACK_FRAME_LEN);
        buf.put_u8(u8::from(self.is_final));
        buf.put_u16(self.ack_number);
        buf.put_u16(self.checksum());
        buf.put_u16(self.source_port);
        buf.freeze()
    }

    /// Parse an ACK frame. Bytes past [`ACK_FRAME_LEN`] are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < ACK_FRAME_LEN {
            return Err(FrameError::Truncated {
                kind: FrameKind::Ack,
                len: buf.len(),
                min: ACK_FRAME_LEN,
            });
        }

        let mut ack = Self::new(
            read_u16(buf, ACK_OFF_NUMBER),
            read_u16(buf, ACK_OFF_SRC_PORT),
            buf[ACK_OFF_FINAL] != 0,
        );
        ack.corrupted = ack.checksum() != read_u16(buf, ACK_OFF_CHECKSUM);
        Ok(ack)
    }
}

/// A datagram arriving at the server, classified by its length alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Data(DataPacket),
    Ack(AckPacket),
}

impl Inbound {
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < DATA_HEADER_LEN {
            AckPacket::decode(buf).map(Inbound::Ack)
        } else {
            DataPacket::decode(buf).map(Inbound::Data)
        }
    }

    pub fn is_corrupted(&self) -> bool {
        match self {
            Inbound::Data(packet) => packet.is_corrupted(),
            Inbound::Ack(ack) => ack.is_corrupted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: u16, payload: &'static [u8]) -> DataPacket {
        DataPacket::new(1, 2, seq, payload).unwrap()
    }

    #[test]
    fn data_layout_matches_wire_format() {
        let packet = DataPacket::new(0x0102, 0x0304, 0x0506, &b"hi"[..])
            .unwrap()
            .with_final(true);
        let bytes = packet.encode();

        assert_eq!(bytes.len(), DATA_HEADER_LEN + 2);
        assert_eq!(bytes[OFF_FINAL], 1);
        assert_eq!(bytes[OFF_REQUEST], 0);
        assert_eq!(&bytes[OFF_SRC_PORT..OFF_SRC_PORT + 2], &[0x01, 0x02]);
        assert_eq!(&bytes[OFF_DST_PORT..OFF_DST_PORT + 2], &[0x03, 0x04]);
        assert_eq!(&bytes[OFF_LENGTH..OFF_LENGTH + 2], &[0x00, 14]);
        assert_eq!(
            &bytes[OFF_CHECKSUM..OFF_CHECKSUM + 2],
            &packet.checksum().to_be_bytes()
        );
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 2], &[0x05, 0x06]);
        assert_eq!(&bytes[DATA_HEADER_LEN..], b"hi");
    }

    #[test]
    fn length_counts_header_and_payload() {
        let packet = DataPacket::new(1, 2, 0, vec![0u8; 1000]).unwrap();
        assert_eq!(packet.length(), 1012);
    }

    #[test]
    fn data_roundtrip_is_exact() {
        let packet = DataPacket::new(5000, 6000, 7, &b"payload bytes"[..])
            .unwrap()
            .with_final(true);
        let decoded = DataPacket::decode(&packet.encode()).unwrap();

        assert!(!decoded.is_corrupted());
        assert_eq!(decoded, packet);
        assert_eq!(decoded.checksum(), packet.checksum());
    }

    #[test]
    fn field_updates_keep_frame_consistent() {
        let mut packet = data(3, b"abc");
        let before = packet.checksum();
        packet.is_final = true;
        packet.seq = 4;
        assert_ne!(packet.checksum(), before);

        let decoded = DataPacket::decode(&packet.encode()).unwrap();
        assert!(!decoded.is_corrupted());
        assert_eq!(decoded, packet);
    }

    #[test]
    fn largest_payload_fits_length_field() {
        let packet = DataPacket::new(1, 2, 0, vec![0u8; MAX_PAYLOAD_LEN]).unwrap();
        assert_eq!(packet.length(), u16::MAX);
        assert!(!DataPacket::decode(&packet.encode()).unwrap().is_corrupted());
    }

    #[test]
    fn oversized_payload_is_rejected() {
        assert_eq!(
            DataPacket::new(1, 2, 0, vec![0u8; MAX_PAYLOAD_LEN + 1]),
            Err(FrameError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1,
                max: MAX_PAYLOAD_LEN,
            })
        );
        assert!(matches!(
            DataPacket::decode(&vec![0u8; DATA_HEADER_LEN + 70_000]),
            Err(FrameError::PayloadTooLarge { len: 70_000, .. })
        ));
    }

    #[test]
    fn file_request_carries_name() {
        let request = DataPacket::file_request(6000, 5000, "input.txt").unwrap();
        let decoded = DataPacket::decode(&request.encode()).unwrap();

        assert!(decoded.is_file_request);
        assert!(!decoded.is_corrupted());
        assert_eq!(decoded.file_name(), Some("input.txt"));
        assert_eq!(decoded.source_port, 6000);
    }

    #[test]
    fn plain_data_has_no_file_name() {
        assert_eq!(data(3, b"input.txt").file_name(), None);
    }

    #[test]
    fn marked_packet_reports_corrupted() {
        let mut packet = DataPacket::decode(&data(3, b"x").encode()).unwrap();
        assert!(!packet.is_corrupted());
        packet.mark_corrupted();
        assert!(packet.is_corrupted());
    }

    #[test]
    fn flipped_payload_byte_is_corrupted() {
        let mut bytes = data(3, b"abcdef").encode().to_vec();
        bytes[DATA_HEADER_LEN + 2] ^= 0x40;
        assert!(DataPacket::decode(&bytes).unwrap().is_corrupted());
    }

    #[test]
    fn length_disagreeing_with_datagram_is_corrupted() {
        let mut bytes = data(3, b"abcdef").encode().to_vec();
        bytes.push(0);
        assert!(DataPacket::decode(&bytes).unwrap().is_corrupted());
    }

    #[test]
    fn short_data_frame_is_an_error() {
        assert_eq!(
            DataPacket::decode(&[0u8; DATA_HEADER_LEN - 1]),
            Err(FrameError::Truncated {
                kind: FrameKind::Data,
                len: DATA_HEADER_LEN - 1,
                min: DATA_HEADER_LEN,
            })
        );
    }

    #[test]
    fn ack_layout_matches_wire_format() {
        let bytes = AckPacket::new(0x0A0B, 0x1770, true).encode();
        assert_eq!(bytes.len(), ACK_FRAME_LEN);
        assert_eq!(bytes[ACK_OFF_FINAL], 1);
        assert_eq!(&bytes[ACK_OFF_NUMBER..ACK_OFF_NUMBER + 2], &[0x0A, 0x0B]);
        assert_eq!(&bytes[ACK_OFF_SRC_PORT..ACK_OFF_SRC_PORT + 2], &[0x17, 0x70]);
    }

    #[test]
    fn ack_roundtrip_is_exact() {
        let mut ack = AckPacket::new(42, 6000, false);
        ack.is_final = true;
        let decoded = AckPacket::decode(&ack.encode()).unwrap();
        assert!(!decoded.is_corrupted());
        assert_eq!(decoded, ack);
    }

    #[test]
    fn ack_source_port_is_not_checksummed() {
        let mut bytes = AckPacket::new(9, 6000, false).encode().to_vec();
        bytes[ACK_OFF_SRC_PORT + 1] ^= 0x01;
        let decoded = AckPacket::decode(&bytes).unwrap();

        assert!(!decoded.is_corrupted());
        assert_eq!(decoded.source_port, 6001);
    }

    #[test]
    fn ack_number_is_checksummed() {
        let mut bytes = AckPacket::new(9, 6000, false).encode().to_vec();
        bytes[ACK_OFF_NUMBER + 1] ^= 0x01;
        assert!(AckPacket::decode(&bytes).unwrap().is_corrupted());
    }

    #[test]
    fn short_ack_frame_is_an_error() {
        for len in 0..ACK_FRAME_LEN {
            assert!(matches!(
                AckPacket::decode(&vec![0u8; len]),
                Err(FrameError::Truncated { kind: FrameKind::Ack, .. })
            ));
        }
    }

    #[test]
    fn classification_uses_length_alone() {
        let ack = AckPacket::new(3, 6000, false).encode();
        let frame = data(3, b"").encode();

        assert!(matches!(Inbound::decode(&ack), Ok(Inbound::Ack(_))));
        assert!(matches!(Inbound::decode(&frame), Ok(Inbound::Data(_))));
        assert!(Inbound::decode(&[1, 2, 3]).is_err());
    }
}
