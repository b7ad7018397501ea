//! Connection handshake.
//!
//! The handshake runs in two rounds. The caller sends an induction and
//! gets a cookie back; it then sends a conclusion carrying the extension
//! blocks (capabilities and latency, optional stream id, optional
//! authentication tag) and the listener answers with an agreement or a
//! rejection. Rejection reasons travel in the handshake-type field.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Protocol version advertised in the capabilities extension, 1.5.0.
pub const SRT_VERSION: u32 = 0x0001_0500;

/// Handshake structure version carried in the base block.
pub const HANDSHAKE_VERSION: u32 = 5;

/// Size of the fixed base block in bytes: six 32-bit fields plus the
/// 16-byte peer address.
pub const BASE_SIZE: usize = 40;

/// Rejection codes start here in the handshake-type field.
const REJECTION_BASE: i32 = 1000;

const EXT_CAPABILITIES: u16 = 1;
const EXT_STREAM_ID: u16 = 5;
const EXT_AUTH_TAG: u16 = 8;

/// Length of the authentication tag extension (HMAC-SHA256).
pub const AUTH_TAG_SIZE: usize = 32;

/// Handshake parsing and validation errors.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("handshake block too short: {0} bytes")]
    Truncated(usize),

    #[error("incompatible handshake version: {0}")]
    IncompatibleVersion(u32),

    #[error("unknown handshake type: {0}")]
    UnknownType(i32),

    #[error("malformed extension block (type {0})")]
    MalformedExtension(u16),

    #[error("stream id is not valid UTF-8")]
    InvalidStreamId,
}

/// Why a listener refused a conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Generic peer-side refusal.
    Peer,
    /// Authentication tag missing or wrong: passphrase mismatch.
    BadSecret,
    /// Exactly one side uses a passphrase.
    Unsecure,
    /// The listener is not accepting connections.
    Closed,
}

impl RejectReason {
    fn code(self) -> i32 {
        match self {
            RejectReason::Peer => 1,
            RejectReason::BadSecret => 2,
            RejectReason::Unsecure => 3,
            RejectReason::Closed => 4,
        }
    }

    fn from_code(code: i32) -> Self {
        match code {
            2 => RejectReason::BadSecret,
            3 => RejectReason::Unsecure,
            4 => RejectReason::Closed,
            _ => RejectReason::Peer,
        }
    }
}

/// Handshake phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeType {
    /// First caller round, and the listener's cookie answer.
    Induction,
    /// Second caller round with extensions.
    Conclusion,
    /// Listener acceptance with negotiated values.
    Agreement,
    /// Listener refusal.
    Rejected(RejectReason),
}

impl HandshakeType {
    fn to_raw(self) -> i32 {
        match self {
            HandshakeType::Induction => 1,
            HandshakeType::Conclusion => -1,
            HandshakeType::Agreement => -2,
            HandshakeType::Rejected(reason) => REJECTION_BASE + reason.code(),
        }
    }

    fn from_raw(raw: i32) -> Result<Self, HandshakeError> {
        match raw {
            1 => Ok(HandshakeType::Induction),
            -1 => Ok(HandshakeType::Conclusion),
            -2 => Ok(HandshakeType::Agreement),
            r if r >= REJECTION_BASE => {
                Ok(HandshakeType::Rejected(RejectReason::from_code(r - REJECTION_BASE)))
            }
            other => Err(HandshakeError::UnknownType(other)),
        }
    }
}

/// Capability flags exchanged in the conclusion/agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Timestamp-based packet delivery.
    pub tsbpd: bool,
    /// Payload encryption in use.
    pub encryption: bool,
    /// Too-late packet drop.
    pub too_late_packet_drop: bool,
    /// Message mode (always set by this implementation).
    pub message_api: bool,
    /// Peer protocol version.
    pub srt_version: u32,
    /// Receiver-side latency budget, milliseconds.
    pub recv_latency_ms: u16,
    /// Sender-side latency budget, milliseconds.
    pub send_latency_ms: u16,
}

impl Capabilities {
    pub fn new(recv_latency_ms: u16, encryption: bool) -> Self {
        Capabilities {
            tsbpd: true,
            encryption,
            too_late_packet_drop: true,
            message_api: true,
            srt_version: SRT_VERSION,
            recv_latency_ms,
            send_latency_ms: recv_latency_ms,
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.tsbpd {
            flags |= 1 << 0;
        }
        if self.encryption {
            flags |= 1 << 1;
        }
        if self.too_late_packet_drop {
            flags |= 1 << 2;
        }
        if self.message_api {
            flags |= 1 << 3;
        }
        flags
    }

    fn from_parts(srt_version: u32, flags: u32, recv: u16, send: u16) -> Self {
        Capabilities {
            tsbpd: flags & (1 << 0) != 0,
            encryption: flags & (1 << 1) != 0,
            too_late_packet_drop: flags & (1 << 2) != 0,
            message_api: flags & (1 << 3) != 0,
            srt_version,
            recv_latency_ms: recv,
            send_latency_ms: send,
        }
    }
}

/// A complete handshake block: fixed base plus extensions.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub version: u32,
    pub hs_type: HandshakeType,
    /// Sender's socket id.
    pub socket_id: u32,
    /// Sender's initial data sequence number.
    pub initial_seq: u32,
    /// Largest payload the sender will emit.
    pub max_payload: u32,
    /// Listener-issued cookie; zero in the first induction.
    pub cookie: u32,
    /// Sender's view of the peer address, raw 16 bytes.
    pub peer_addr: [u8; 16],
    pub capabilities: Option<Capabilities>,
    pub stream_id: Option<String>,
    pub auth_tag: Option<[u8; AUTH_TAG_SIZE]>,
}

impl Handshake {
    pub fn new(hs_type: HandshakeType, socket_id: u32, initial_seq: u32, max_payload: u32) -> Self {
        Handshake {
            version: HANDSHAKE_VERSION,
            hs_type,
            socket_id,
            initial_seq,
            max_payload,
            cookie: 0,
            peer_addr: [0u8; 16],
            capabilities: None,
            stream_id: None,
            auth_tag: None,
        }
    }

    /// Record the peer address in the base block.
    pub fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = encode_addr(addr.ip());
    }

    /// Decode the recorded peer address, if any was set.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        decode_addr(&self.peer_addr)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(BASE_SIZE + 64);

        buf.put_u32(self.version);
        buf.put_i32(self.hs_type.to_raw());
        buf.put_u32(self.socket_id);
        buf.put_u32(self.initial_seq);
        buf.put_u32(self.max_payload);
        buf.put_u32(self.cookie);
        buf.put_slice(&self.peer_addr);

        if let Some(caps) = &self.capabilities {
            buf.put_u16(EXT_CAPABILITIES);
            buf.put_u16(12);
            buf.put_u32(caps.srt_version);
            buf.put_u32(caps.flags());
            buf.put_u16(caps.recv_latency_ms);
            buf.put_u16(caps.send_latency_ms);
        }
        if let Some(stream_id) = &self.stream_id {
            buf.put_u16(EXT_STREAM_ID);
            buf.put_u16(stream_id.len() as u16);
            buf.put_slice(stream_id.as_bytes());
        }
        if let Some(tag) = &self.auth_tag {
            buf.put_u16(EXT_AUTH_TAG);
            buf.put_u16(AUTH_TAG_SIZE as u16);
            buf.put_slice(tag);
        }

        buf.freeze()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() < BASE_SIZE {
            return Err(HandshakeError::Truncated(bytes.len()));
        }

        let mut buf = bytes;
        let version = buf.get_u32();
        if version != HANDSHAKE_VERSION {
            return Err(HandshakeError::IncompatibleVersion(version));
        }
        let hs_type = HandshakeType::from_raw(buf.get_i32())?;
        let socket_id = buf.get_u32();
        let initial_seq = buf.get_u32();
        let max_payload = buf.get_u32();
        let cookie = buf.get_u32();
        let mut peer_addr = [0u8; 16];
        buf.copy_to_slice(&mut peer_addr);

        let mut handshake = Handshake {
            version,
            hs_type,
            socket_id,
            initial_seq,
            max_payload,
            cookie,
            peer_addr,
            capabilities: None,
            stream_id: None,
            auth_tag: None,
        };

        while buf.remaining() >= 4 {
            let ext_type = buf.get_u16();
            let ext_len = buf.get_u16() as usize;
            if buf.remaining() < ext_len {
                return Err(HandshakeError::MalformedExtension(ext_type));
            }

            match ext_type {
                EXT_CAPABILITIES => {
                    if ext_len != 12 {
                        return Err(HandshakeError::MalformedExtension(ext_type));
                    }
                    let srt_version = buf.get_u32();
                    let flags = buf.get_u32();
                    let recv = buf.get_u16();
                    let send = buf.get_u16();
                    handshake.capabilities =
                        Some(Capabilities::from_parts(srt_version, flags, recv, send));
                }
                EXT_STREAM_ID => {
                    let raw = buf.copy_to_bytes(ext_len);
                    let id = String::from_utf8(raw.to_vec())
                        .map_err(|_| HandshakeError::InvalidStreamId)?;
                    handshake.stream_id = Some(id);
                }
                EXT_AUTH_TAG => {
                    if ext_len != AUTH_TAG_SIZE {
                        return Err(HandshakeError::MalformedExtension(ext_type));
                    }
                    let mut tag = [0u8; AUTH_TAG_SIZE];
                    buf.copy_to_slice(&mut tag);
                    handshake.auth_tag = Some(tag);
                }
                // Skip extensions this implementation does not understand.
                _ => buf.advance(ext_len),
            }
        }

        Ok(handshake)
    }
}

/// Render a packed protocol version as the dotted form, e.g. "1.5.0".
pub fn version_string(version: u32) -> String {
    format!(
        "{}.{}.{}",
        (version >> 16) & 0xFF,
        (version >> 8) & 0xFF,
        version & 0xFF
    )
}

fn encode_addr(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => {
            let mut raw = [0u8; 16];
            raw[..4].copy_from_slice(&v4.octets());
            // Flag byte so an unspecified v4 address is distinguishable
            // from "not recorded".
            raw[15] = 4;
            raw
        }
        IpAddr::V6(v6) => v6.octets(),
    }
}

fn decode_addr(raw: &[u8; 16]) -> Option<IpAddr> {
    if raw[15] == 4 && raw[4..15].iter().all(|&b| b == 0) {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&raw[..4]);
        return Some(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if raw.iter().all(|&b| b == 0) {
        return None;
    }
    Some(IpAddr::V6(Ipv6Addr::from(*raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_roundtrip() {
        let mut hs = Handshake::new(HandshakeType::Induction, 0xAABB, 1000, 1456);
        hs.cookie = 0x1234_5678;
        hs.set_peer_addr("127.0.0.1:9000".parse().unwrap());

        let decoded = Handshake::from_bytes(&hs.to_bytes()).unwrap();
        assert_eq!(decoded.hs_type, HandshakeType::Induction);
        assert_eq!(decoded.socket_id, 0xAABB);
        assert_eq!(decoded.cookie, 0x1234_5678);
        assert_eq!(decoded.peer_ip(), Some("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn extensions_roundtrip() {
        let mut hs = Handshake::new(HandshakeType::Conclusion, 7, 42, 1456);
        hs.capabilities = Some(Capabilities::new(120, true));
        hs.stream_id = Some("An example Stream ID".to_string());
        hs.auth_tag = Some([0x5A; AUTH_TAG_SIZE]);

        let decoded = Handshake::from_bytes(&hs.to_bytes()).unwrap();
        let caps = decoded.capabilities.unwrap();
        assert!(caps.encryption);
        assert!(caps.message_api);
        assert_eq!(caps.recv_latency_ms, 120);
        assert_eq!(caps.srt_version, SRT_VERSION);
        assert_eq!(decoded.stream_id.as_deref(), Some("An example Stream ID"));
        assert_eq!(decoded.auth_tag, Some([0x5A; AUTH_TAG_SIZE]));
    }

    #[test]
    fn rejection_codes_roundtrip() {
        for reason in [
            RejectReason::Peer,
            RejectReason::BadSecret,
            RejectReason::Unsecure,
            RejectReason::Closed,
        ] {
            let hs = Handshake::new(HandshakeType::Rejected(reason), 0, 0, 0);
            let decoded = Handshake::from_bytes(&hs.to_bytes()).unwrap();
            assert_eq!(decoded.hs_type, HandshakeType::Rejected(reason));
        }
    }

    #[test]
    fn ipv6_peer_addr() {
        let mut hs = Handshake::new(HandshakeType::Conclusion, 1, 0, 1456);
        hs.set_peer_addr("[::1]:9000".parse().unwrap());

        let decoded = Handshake::from_bytes(&hs.to_bytes()).unwrap();
        assert_eq!(decoded.peer_ip(), Some("::1".parse().unwrap()));
    }

    #[test]
    fn incompatible_version_rejected() {
        let mut raw = Handshake::new(HandshakeType::Induction, 1, 0, 0)
            .to_bytes()
            .to_vec();
        raw[3] = 9;
        assert!(matches!(
            Handshake::from_bytes(&raw),
            Err(HandshakeError::IncompatibleVersion(9))
        ));
    }

    #[test]
    fn version_formatting() {
        assert_eq!(version_string(SRT_VERSION), "1.5.0");
    }
}
