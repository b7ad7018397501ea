//! Packet structures and serialization.
//!
//! Every datagram starts with a 128-bit header of four 32-bit fields in
//! network byte order. Bit 31 of the first field distinguishes control
//! packets (set) from data packets (clear). Data packets carry one
//! complete application message; the transport runs in message mode only.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the packet header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Live-mode maximum payload for a single message (1500 MTU minus IP/UDP
/// and packet headers).
pub const MAX_PAYLOAD_SIZE: usize = 1456;

/// Control packet flag, bit 31 of the first header field.
const CONTROL_FLAG: u32 = 0x8000_0000;

/// Mask for the 31-bit sequence number.
const SEQ_MASK: u32 = 0x7FFF_FFFF;

/// Mask for the 26-bit message number.
const MSG_NO_MASK: u32 = 0x03FF_FFFF;

/// Control packet types understood by the transport.
///
/// Unknown types parse to `None` and are dropped by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlType {
    /// Connection handshake (induction, conclusion, agreement, rejection).
    Handshake = 0,
    /// Link keep-alive.
    KeepAlive = 1,
    /// Receipt acknowledgement.
    Ack = 2,
    /// Orderly connection teardown.
    Shutdown = 5,
    /// Fatal peer-side error.
    PeerError = 8,
}

impl ControlType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(ControlType::Handshake),
            1 => Some(ControlType::KeepAlive),
            2 => Some(ControlType::Ack),
            5 => Some(ControlType::Shutdown),
            8 => Some(ControlType::PeerError),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Message boundary flags, bits 30-31 of the message field.
///
/// The transport sends solo messages only, but the codec keeps the full
/// range so foreign packets still parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MessageBoundary {
    Middle = 0b00,
    Last = 0b01,
    First = 0b10,
    #[default]
    Solo = 0b11,
}

impl MessageBoundary {
    pub fn from_bits(value: u8) -> Self {
        match value & 0b11 {
            0b00 => MessageBoundary::Middle,
            0b01 => MessageBoundary::Last,
            0b10 => MessageBoundary::First,
            _ => MessageBoundary::Solo,
        }
    }

    pub fn as_bits(self) -> u8 {
        self as u8
    }
}

/// Message field of a data packet: boundary, delivery flags and the
/// 26-bit message number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageFlags {
    /// Message boundary (bits 30-31).
    pub boundary: MessageBoundary,
    /// In-order delivery requested (bit 29).
    pub in_order: bool,
    /// Payload is encrypted (bit 28).
    pub encrypted: bool,
    /// Message number (bits 0-25).
    pub number: u32,
}

impl MessageFlags {
    pub fn new(number: u32) -> Self {
        MessageFlags {
            boundary: MessageBoundary::Solo,
            in_order: false,
            encrypted: false,
            number: number & MSG_NO_MASK,
        }
    }

    pub fn from_raw(raw: u32) -> Self {
        MessageFlags {
            boundary: MessageBoundary::from_bits(((raw >> 30) & 0b11) as u8),
            in_order: (raw & (1 << 29)) != 0,
            encrypted: (raw & (1 << 28)) != 0,
            number: raw & MSG_NO_MASK,
        }
    }

    pub fn to_raw(self) -> u32 {
        let mut raw = self.number & MSG_NO_MASK;
        raw |= (self.boundary.as_bits() as u32) << 30;
        if self.in_order {
            raw |= 1 << 29;
        }
        if self.encrypted {
            raw |= 1 << 28;
        }
        raw
    }
}

/// Common 16-byte packet header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Sequence number (data) or control type and subtype (control).
    pub seq_or_control: u32,
    /// Message flags (data) or additional info (control).
    pub msg_or_info: u32,
    /// Timestamp, microseconds since the connection epoch.
    pub timestamp: u32,
    /// Destination socket id.
    pub dest_socket_id: u32,
}

impl PacketHeader {
    pub fn new_data(
        seq: SeqNumber,
        flags: MessageFlags,
        timestamp: u32,
        dest_socket_id: u32,
    ) -> Self {
        PacketHeader {
            seq_or_control: seq.as_raw() & SEQ_MASK,
            msg_or_info: flags.to_raw(),
            timestamp,
            dest_socket_id,
        }
    }

    pub fn new_control(
        control_type: ControlType,
        additional_info: u32,
        timestamp: u32,
        dest_socket_id: u32,
    ) -> Self {
        PacketHeader {
            seq_or_control: CONTROL_FLAG | ((control_type.as_u16() as u32) << 16),
            msg_or_info: additional_info,
            timestamp,
            dest_socket_id,
        }
    }

    #[inline]
    pub fn is_control(&self) -> bool {
        (self.seq_or_control & CONTROL_FLAG) != 0
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        !self.is_control()
    }

    /// Sequence number, data packets only.
    pub fn seq_number(&self) -> Option<SeqNumber> {
        self.is_data()
            .then(|| SeqNumber::new_unchecked(self.seq_or_control & SEQ_MASK))
    }

    /// Control type, control packets only. `None` for unknown types.
    pub fn control_type(&self) -> Option<ControlType> {
        if self.is_control() {
            ControlType::from_u16(((self.seq_or_control >> 16) & 0x7FFF) as u16)
        } else {
            None
        }
    }

    /// Message flags, data packets only.
    pub fn message_flags(&self) -> Option<MessageFlags> {
        self.is_data().then(|| MessageFlags::from_raw(self.msg_or_info))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PacketError::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Ok(PacketHeader {
            seq_or_control: buf.get_u32(),
            msg_or_info: buf.get_u32(),
            timestamp: buf.get_u32(),
            dest_socket_id: buf.get_u32(),
        })
    }

    pub fn to_bytes(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq_or_control);
        buf.put_u32(self.msg_or_info);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.dest_socket_id);
    }
}

/// Data packet: header plus one complete message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub header: PacketHeader,
    pub payload: Bytes,
}

impl DataPacket {
    pub fn new(
        seq: SeqNumber,
        flags: MessageFlags,
        timestamp: u32,
        dest_socket_id: u32,
        payload: Bytes,
    ) -> Self {
        DataPacket {
            header: PacketHeader::new_data(seq, flags, timestamp, dest_socket_id),
            payload,
        }
    }

    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber::new_unchecked(self.header.seq_or_control & SEQ_MASK)
    }

    pub fn message_flags(&self) -> MessageFlags {
        MessageFlags::from_raw(self.header.msg_or_info)
    }

    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.payload);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;
        if !header.is_data() {
            return Err(PacketError::WrongKind {
                expected: "data",
                actual: "control",
            });
        }

        Ok(DataPacket {
            header,
            payload: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// Control packet: header plus type-specific control information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub header: PacketHeader,
    pub control_info: Bytes,
}

impl ControlPacket {
    pub fn new(
        control_type: ControlType,
        additional_info: u32,
        timestamp: u32,
        dest_socket_id: u32,
        control_info: Bytes,
    ) -> Self {
        ControlPacket {
            header: PacketHeader::new_control(
                control_type,
                additional_info,
                timestamp,
                dest_socket_id,
            ),
            control_info,
        }
    }

    /// Control type of this packet.
    ///
    /// Parsing guarantees the type is known, so this does not fail.
    pub fn control_type(&self) -> ControlType {
        ControlType::from_u16(((self.header.seq_or_control >> 16) & 0x7FFF) as u16)
            .unwrap_or(ControlType::PeerError)
    }

    pub fn size(&self) -> usize {
        HEADER_SIZE + self.control_info.len()
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size());
        self.header.to_bytes(&mut buf);
        buf.put_slice(&self.control_info);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;
        if !header.is_control() {
            return Err(PacketError::WrongKind {
                expected: "control",
                actual: "data",
            });
        }

        let raw_type = ((header.seq_or_control >> 16) & 0x7FFF) as u16;
        if ControlType::from_u16(raw_type).is_none() {
            return Err(PacketError::UnknownControlType(raw_type));
        }

        Ok(ControlPacket {
            header,
            control_info: Bytes::copy_from_slice(&bytes[HEADER_SIZE..]),
        })
    }
}

/// A parsed datagram, either kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Data(DataPacket),
    Control(ControlPacket),
}

impl Packet {
    pub fn header(&self) -> &PacketHeader {
        match self {
            Packet::Data(p) => &p.header,
            Packet::Control(p) => &p.header,
        }
    }

    pub fn dest_socket_id(&self) -> u32 {
        self.header().dest_socket_id
    }

    pub fn to_bytes(&self) -> BytesMut {
        match self {
            Packet::Data(p) => p.to_bytes(),
            Packet::Control(p) => p.to_bytes(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        let header = PacketHeader::from_bytes(bytes)?;
        if header.is_data() {
            Ok(Packet::Data(DataPacket::from_bytes(bytes)?))
        } else {
            Ok(Packet::Control(ControlPacket::from_bytes(bytes)?))
        }
    }
}

/// Packet parsing and validation errors.
#[derive(Error, Debug)]
pub enum PacketError {
    #[error("truncated packet: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("wrong packet kind: expected {expected}, got {actual}")]
    WrongKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unknown control type: {0}")]
    UnknownControlType(u16),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}
