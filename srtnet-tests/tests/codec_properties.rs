//! Property-based tests for the wire codecs.
//!
//! Random packets and handshakes must round-trip losslessly, and
//! sequence-number ordering must stay consistent across the wrap
//! boundary.

use bytes::Bytes;
use proptest::prelude::*;
use srtnet_protocol::handshake::{
    Capabilities, Handshake, HandshakeType, RejectReason, AUTH_TAG_SIZE,
};
use srtnet_protocol::packet::{
    ControlPacket, ControlType, DataPacket, MessageBoundary, MessageFlags, Packet,
};
use srtnet_protocol::sequence::{SeqNumber, MAX_SEQ_NUMBER};

fn seq_strategy() -> impl Strategy<Value = SeqNumber> {
    (0..=MAX_SEQ_NUMBER).prop_map(SeqNumber::new)
}

fn boundary_strategy() -> impl Strategy<Value = MessageBoundary> {
    prop_oneof![
        Just(MessageBoundary::Middle),
        Just(MessageBoundary::Last),
        Just(MessageBoundary::First),
        Just(MessageBoundary::Solo),
    ]
}

fn flags_strategy() -> impl Strategy<Value = MessageFlags> {
    (
        boundary_strategy(),
        any::<bool>(),
        any::<bool>(),
        0u32..=0x03FF_FFFF,
    )
        .prop_map(|(boundary, in_order, encrypted, number)| MessageFlags {
            boundary,
            in_order,
            encrypted,
            number,
        })
}

fn control_type_strategy() -> impl Strategy<Value = ControlType> {
    prop_oneof![
        Just(ControlType::Handshake),
        Just(ControlType::KeepAlive),
        Just(ControlType::Ack),
        Just(ControlType::Shutdown),
        Just(ControlType::PeerError),
    ]
}

fn payload_strategy() -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 0..=512).prop_map(Bytes::from)
}

fn handshake_type_strategy() -> impl Strategy<Value = HandshakeType> {
    prop_oneof![
        Just(HandshakeType::Induction),
        Just(HandshakeType::Conclusion),
        Just(HandshakeType::Agreement),
        Just(HandshakeType::Rejected(RejectReason::Peer)),
        Just(HandshakeType::Rejected(RejectReason::BadSecret)),
        Just(HandshakeType::Rejected(RejectReason::Unsecure)),
        Just(HandshakeType::Rejected(RejectReason::Closed)),
    ]
}

proptest! {
    #[test]
    fn data_packet_roundtrip(
        seq in seq_strategy(),
        flags in flags_strategy(),
        timestamp in any::<u32>(),
        dest in any::<u32>(),
        payload in payload_strategy(),
    ) {
        let packet = DataPacket::new(seq, flags, timestamp, dest, payload.clone());
        let decoded = DataPacket::from_bytes(&packet.to_bytes()).unwrap();

        prop_assert_eq!(decoded.seq_number(), seq);
        prop_assert_eq!(decoded.message_flags(), flags);
        prop_assert_eq!(decoded.header.timestamp, timestamp);
        prop_assert_eq!(decoded.header.dest_socket_id, dest);
        prop_assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn control_packet_roundtrip(
        control_type in control_type_strategy(),
        info in any::<u32>(),
        timestamp in any::<u32>(),
        dest in any::<u32>(),
        control_info in payload_strategy(),
    ) {
        let packet = ControlPacket::new(control_type, info, timestamp, dest, control_info.clone());
        let decoded = ControlPacket::from_bytes(&packet.to_bytes()).unwrap();

        prop_assert_eq!(decoded.control_type(), control_type);
        prop_assert_eq!(decoded.control_info, control_info);
    }

    #[test]
    fn packet_kind_detection(
        seq in seq_strategy(),
        flags in flags_strategy(),
        payload in payload_strategy(),
    ) {
        let data = DataPacket::new(seq, flags, 0, 0, payload).to_bytes();
        prop_assert!(matches!(Packet::from_bytes(&data).unwrap(), Packet::Data(_)));
    }

    #[test]
    fn handshake_roundtrip(
        hs_type in handshake_type_strategy(),
        socket_id in any::<u32>(),
        initial_seq in 0..=MAX_SEQ_NUMBER,
        cookie in any::<u32>(),
        latency in any::<u16>(),
        encryption in any::<bool>(),
        stream_id in prop::option::of("[ -~]{0,64}"),
        tag in prop::option::of(prop::array::uniform32(any::<u8>())),
    ) {
        let mut handshake = Handshake::new(hs_type, socket_id, initial_seq, 1456);
        handshake.cookie = cookie;
        handshake.capabilities = Some(Capabilities::new(latency, encryption));
        handshake.stream_id = stream_id.clone();
        handshake.auth_tag = tag;

        let decoded = Handshake::from_bytes(&handshake.to_bytes()).unwrap();

        prop_assert_eq!(decoded.hs_type, hs_type);
        prop_assert_eq!(decoded.socket_id, socket_id);
        prop_assert_eq!(decoded.initial_seq, initial_seq);
        prop_assert_eq!(decoded.cookie, cookie);
        let caps = decoded.capabilities.unwrap();
        prop_assert_eq!(caps.recv_latency_ms, latency);
        prop_assert_eq!(caps.encryption, encryption);
        prop_assert_eq!(decoded.stream_id, stream_id);
        prop_assert_eq!(decoded.auth_tag.map(|t| t.len()), tag.map(|_| AUTH_TAG_SIZE));
    }

    #[test]
    fn sequence_ordering_is_antisymmetric(a in seq_strategy(), b in seq_strategy()) {
        prop_assert_eq!(a.distance_to(b), -b.distance_to(a));
        if a != b {
            prop_assert!(a.precedes(b) != b.precedes(a));
        }
    }

    #[test]
    fn sequence_next_advances_by_one(a in seq_strategy()) {
        prop_assert_eq!(a.distance_to(a.next()), 1);
        prop_assert!(a.precedes(a.next()));
    }
}
