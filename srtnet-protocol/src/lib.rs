//! Wire format for the srtnet transport.
//!
//! This crate defines the packet layout shared by callers and listeners:
//! the 16-byte header with its data/control discrimination, 31-bit
//! wrapping sequence numbers, the connection handshake with its extension
//! blocks, and the receive-side reorder window.

pub mod handshake;
pub mod packet;
pub mod reorder;
pub mod sequence;

pub use handshake::{
    Capabilities, Handshake, HandshakeError, HandshakeType, RejectReason, SRT_VERSION,
};
pub use packet::{
    ControlPacket, ControlType, DataPacket, MessageBoundary, MessageFlags, Packet, PacketError,
    HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use reorder::ReorderWindow;
pub use sequence::SeqNumber;
