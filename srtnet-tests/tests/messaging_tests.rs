//! Data-path scenarios: echo round-trips, statistics mirroring, oversize
//! rejection, callback preference, context identity, stream ids, IPv6.

mod common;

use common::{client_config, server_config, wait_until, VALID_PSK};
use bytes::Bytes;
use srtnet::{MsgCtrl, NetworkConnection, SrtNet, SrtSocket, MAX_PAYLOAD_SIZE};
use srtnet::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn echo_round_trip_with_statistics() {
    let server = Arc::new(SrtNet::new());
    let client = SrtNet::new();

    let payload = vec![0x01u8; 1000];

    let server_got_data = Arc::new(AtomicBool::new(false));
    let client_socket_slot: Arc<Mutex<Option<SrtSocket>>> = Arc::new(Mutex::new(None));

    server.set_client_connected_callback(|_peer, _socket, _ctx, _info| {
        Some(Arc::new(NetworkConnection::new(1111i32)))
    });
    let expected = payload.clone();
    let echoer = server.clone();
    let slot = client_socket_slot.clone();
    let server_flag = server_got_data.clone();
    server.set_received_data_callback(move |data, _ctrl, ctx, socket| {
        assert_eq!(&data[..], &expected[..]);
        assert_eq!(
            ctx.and_then(|c| c.downcast_ref::<i32>()),
            Some(&1111),
            "the context handed back must be the one returned at accept"
        );
        *slot.lock().unwrap() = Some(socket.clone());

        let mut ctrl = MsgCtrl::default();
        echoer
            .send_data(&data, &mut ctrl, Some(socket))
            .expect("echo send");
        server_flag.store(true, Ordering::SeqCst);
    });

    let client_got_data = Arc::new(AtomicBool::new(false));
    let expected_back = payload.clone();
    let client_flag = client_got_data.clone();
    client.set_received_data_callback(move |data, _ctrl, ctx, _socket| {
        assert_eq!(&data[..], &expected_back[..]);
        assert_eq!(ctx.and_then(|c| c.downcast_ref::<i32>()), Some(&42));
        client_flag.store(true, Ordering::SeqCst);
    });

    server
        .start_server(server_config("127.0.0.1", 0, VALID_PSK), None)
        .unwrap();
    client
        .start_client(
            client_config("127.0.0.1", server.locally_bound_port(), VALID_PSK, true),
            Some(Arc::new(NetworkConnection::new(42i32))),
        )
        .unwrap();
    assert!(client.is_connected_to_server());

    let mut ctrl = MsgCtrl::default();
    client.send_data(&payload, &mut ctrl, None).unwrap();

    assert!(wait_until(|| server_got_data.load(Ordering::SeqCst), Duration::from_secs(2)));
    assert!(wait_until(|| client_got_data.load(Ordering::SeqCst), Duration::from_secs(2)));

    // One packet each way, mirrored on both ends.
    let client_stats = client.statistics(false, true, None).expect("client stats");
    let server_target = client_socket_slot.lock().unwrap().clone().expect("peer socket");
    let server_stats = server
        .statistics(false, true, Some(&server_target))
        .expect("server stats");

    assert_eq!(client_stats.pkt_sent_total, 1);
    assert_eq!(client_stats.pkt_recv_total, 1);
    assert_eq!(client_stats.pkt_sent_total, server_stats.pkt_recv_total);
    assert_eq!(client_stats.pkt_recv_total, server_stats.pkt_sent_total);

    // Sending to a stopped client's socket fails.
    assert!(client.stop());
    std::thread::sleep(Duration::from_secs(1));
    let mut ctrl = MsgCtrl::default();
    assert!(matches!(
        server.send_data(&payload, &mut ctrl, Some(&server_target)),
        Err(Error::SendFailed)
    ));
}

#[test]
fn oversize_send_is_rejected_without_side_effects() {
    let server = Arc::new(SrtNet::new());
    let client = SrtNet::new();

    server.set_client_connected_callback(|_peer, _socket, _ctx, _info| {
        Some(Arc::new(NetworkConnection::default()))
    });

    server
        .start_server(server_config("127.0.0.1", 0, VALID_PSK), None)
        .unwrap();
    client
        .start_client(
            client_config("127.0.0.1", server.locally_bound_port(), VALID_PSK, true),
            None,
        )
        .unwrap();
    assert!(client.is_connected_to_server());

    let oversize = vec![0x01u8; MAX_PAYLOAD_SIZE + 1];
    let mut ctrl = MsgCtrl::default();
    assert!(matches!(
        client.send_data(&oversize, &mut ctrl, None),
        Err(Error::MessageTooLarge { .. })
    ));

    // The connection state is untouched.
    assert!(client.is_connected_to_server());
    let stats = client.statistics(false, true, None).unwrap();
    assert_eq!(stats.pkt_sent_total, 0);
    let mut ctrl = MsgCtrl::default();
    client
        .send_data(&vec![0x01u8; MAX_PAYLOAD_SIZE], &mut ctrl, None)
        .unwrap();
}

#[test]
fn no_copy_callback_is_preferred() {
    let server = Arc::new(SrtNet::new());
    let client = SrtNet::new();

    server.set_client_connected_callback(|_peer, _socket, _ctx, _info| {
        Some(Arc::new(NetworkConnection::default()))
    });

    let no_copy_hits = Arc::new(AtomicUsize::new(0));
    let owning_hits = Arc::new(AtomicUsize::new(0));

    let no_copy = no_copy_hits.clone();
    server.set_received_data_no_copy_callback(move |data, _ctrl, _ctx, _socket| {
        assert_eq!(data, &[0x55u8; 64][..]);
        no_copy.fetch_add(1, Ordering::SeqCst);
    });
    let owning = owning_hits.clone();
    server.set_received_data_callback(move |_data: Bytes, _ctrl, _ctx, _socket| {
        owning.fetch_add(1, Ordering::SeqCst);
    });

    server
        .start_server(server_config("127.0.0.1", 0, ""), None)
        .unwrap();
    client
        .start_client(
            client_config("127.0.0.1", server.locally_bound_port(), "", true),
            None,
        )
        .unwrap();

    let mut ctrl = MsgCtrl::default();
    client.send_data(&[0x55u8; 64], &mut ctrl, None).unwrap();

    assert!(wait_until(
        || no_copy_hits.load(Ordering::SeqCst) == 1,
        Duration::from_secs(2)
    ));
    assert_eq!(owning_hits.load(Ordering::SeqCst), 0);
}

#[test]
fn context_identity_is_preserved() {
    let server = Arc::new(SrtNet::new());
    let client = SrtNet::new();

    let original: Arc<Mutex<Option<Arc<NetworkConnection>>>> = Arc::new(Mutex::new(None));
    let disconnect_matches = Arc::new(AtomicBool::new(false));

    let create_slot = original.clone();
    server.set_client_connected_callback(move |_peer, _socket, _ctx, _info| {
        let ctx = Arc::new(NetworkConnection::new(1111i32));
        *create_slot.lock().unwrap() = Some(ctx.clone());
        Some(ctx)
    });

    let data_slot = original.clone();
    let data_matches = Arc::new(AtomicBool::new(false));
    let data_flag = data_matches.clone();
    server.set_received_data_callback(move |_data, _ctrl, ctx, _socket| {
        let expected = data_slot.lock().unwrap().clone().unwrap();
        if ctx.is_some_and(|c| Arc::ptr_eq(c, &expected)) {
            data_flag.store(true, Ordering::SeqCst);
        }
    });

    let disconnect_slot = original.clone();
    let disconnect_flag = disconnect_matches.clone();
    server.set_client_disconnected_callback(move |ctx, _socket| {
        let expected = disconnect_slot.lock().unwrap().clone().unwrap();
        if ctx.is_some_and(|c| Arc::ptr_eq(c, &expected)) {
            disconnect_flag.store(true, Ordering::SeqCst);
        }
    });

    server
        .start_server(server_config("127.0.0.1", 0, ""), None)
        .unwrap();
    client
        .start_client(
            client_config("127.0.0.1", server.locally_bound_port(), "", true),
            None,
        )
        .unwrap();

    let mut ctrl = MsgCtrl::default();
    client.send_data(b"identity", &mut ctrl, None).unwrap();
    assert!(wait_until(|| data_matches.load(Ordering::SeqCst), Duration::from_secs(2)));

    assert!(client.stop());
    assert!(wait_until(
        || disconnect_matches.load(Ordering::SeqCst),
        Duration::from_secs(2)
    ));
}

#[test]
fn stream_id_is_readable_in_accept_callback() {
    let server = SrtNet::new();
    let client = SrtNet::new();
    let stream_id = "An example Stream ID";

    let seen = Arc::new(AtomicBool::new(false));
    let seen_flag = seen.clone();
    server.set_client_connected_callback(move |_peer, socket, _ctx, _info| {
        if socket.stream_id().as_deref() == Some("An example Stream ID") {
            seen_flag.store(true, Ordering::SeqCst);
        }
        Some(Arc::new(NetworkConnection::default()))
    });

    server
        .start_server(server_config("127.0.0.1", 0, VALID_PSK), None)
        .unwrap();

    let mut config = client_config("127.0.0.1", server.locally_bound_port(), VALID_PSK, true);
    config.stream_id = stream_id.to_string();
    client.start_client(config, None).unwrap();

    assert!(wait_until(|| seen.load(Ordering::SeqCst), Duration::from_secs(2)));
}

#[test]
fn echo_round_trip_over_ipv6() {
    let server = Arc::new(SrtNet::new());
    let client = SrtNet::new();

    server.set_client_connected_callback(|_peer, _socket, _ctx, _info| {
        Some(Arc::new(NetworkConnection::default()))
    });
    let echoer = server.clone();
    let server_got = Arc::new(AtomicBool::new(false));
    let server_flag = server_got.clone();
    server.set_received_data_callback(move |data, _ctrl, _ctx, socket| {
        let mut ctrl = MsgCtrl::default();
        echoer.send_data(&data, &mut ctrl, Some(socket)).unwrap();
        server_flag.store(true, Ordering::SeqCst);
    });

    let client_got = Arc::new(AtomicBool::new(false));
    let client_flag = client_got.clone();
    client.set_received_data_callback(move |data, _ctrl, _ctx, _socket| {
        assert_eq!(&data[..], &[0x01u8; 1000][..]);
        client_flag.store(true, Ordering::SeqCst);
    });

    server
        .start_server(server_config("::", 0, ""), None)
        .unwrap();
    client
        .start_client(
            client_config("::1", server.locally_bound_port(), "", true),
            None,
        )
        .unwrap();
    assert!(client.is_connected_to_server());

    let mut ctrl = MsgCtrl::default();
    client.send_data(&[0x01u8; 1000], &mut ctrl, None).unwrap();

    assert!(wait_until(|| server_got.load(Ordering::SeqCst), Duration::from_secs(2)));
    assert!(wait_until(|| client_got.load(Ordering::SeqCst), Duration::from_secs(2)));
}
