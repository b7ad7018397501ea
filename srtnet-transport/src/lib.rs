//! Blocking, handle-based SRT-style transport.
//!
//! The crate exposes the surface a connection-lifecycle layer needs:
//! listener and caller sockets with blocking accept, connect, send and
//! receive; an option set applied before bind/connect; per-socket
//! statistics; and a multi-socket readiness poller classifying events as
//! readable or broken. One UDP multiplexer per bound port carries any
//! number of connections plus an optional listener.

mod error;
mod mux;
mod options;
mod poller;
mod socket;
mod stats;
mod udp;

pub use error::TransportError;
pub use options::{SocketOptions, MAX_MTU, MIN_MTU};
pub use poller::{Event, Poller};
pub use socket::{ConnectionInfo, EventKind, MsgCtrl, SrtSocket};
pub use stats::SocketStats;

// Wire-level types callers interact with directly.
pub use srtnet_crypto::Passphrase;
pub use srtnet_protocol::handshake::{version_string, RejectReason, SRT_VERSION};
pub use srtnet_protocol::packet::{MessageBoundary, MAX_PAYLOAD_SIZE};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn listen_local(options: SocketOptions) -> SrtSocket {
        SrtSocket::listen("127.0.0.1:0".parse().unwrap(), options).unwrap()
    }

    fn connect_local(listener: &SrtSocket, options: SocketOptions) -> SrtSocket {
        SrtSocket::connect(listener.local_addr(), None, options, TIMEOUT).unwrap()
    }

    fn psk() -> Passphrase {
        Passphrase::new("Th1$_is_4n_0pt10N4L_P$k").unwrap()
    }

    #[test]
    fn connect_accept_exchange() {
        let listener = listen_local(SocketOptions::default());
        let caller = connect_local(&listener, SocketOptions::default());
        let (accepted, peer) = listener.accept(TIMEOUT).unwrap().unwrap();

        assert_eq!(peer, caller.local_addr());
        assert_eq!(accepted.peer_addr(), Some(caller.local_addr()));

        let mut ctrl = MsgCtrl::default();
        caller.send(b"one message", &mut ctrl).unwrap();

        let (payload, recv_ctrl) = accepted.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(&payload[..], b"one message");
        assert_eq!(recv_ctrl.msg_number, ctrl.msg_number);

        caller.close();
        listener.close();
        accepted.close();
    }

    #[test]
    fn encrypted_exchange() {
        let mut server_options = SocketOptions::default();
        server_options.passphrase = Some(psk());
        let mut client_options = SocketOptions::default();
        client_options.passphrase = Some(psk());

        let listener = listen_local(server_options);
        let caller = connect_local(&listener, client_options);
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        let mut ctrl = MsgCtrl::default();
        caller.send(&[1u8; 1000], &mut ctrl).unwrap();
        let (payload, _) = accepted.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(payload, vec![1u8; 1000]);

        caller.close();
        listener.close();
        accepted.close();
    }

    #[test]
    fn passphrase_mismatch_is_rejected() {
        let mut server_options = SocketOptions::default();
        server_options.passphrase = Some(psk());
        let mut client_options = SocketOptions::default();
        client_options.passphrase = Some(Passphrase::new("Th1$_is_4_F4k3_P$k").unwrap());

        let listener = listen_local(server_options);
        let result = SrtSocket::connect(
            listener.local_addr(),
            None,
            client_options,
            TIMEOUT,
        );

        assert!(matches!(
            result,
            Err(TransportError::ConnectionRejected(RejectReason::BadSecret))
        ));
        listener.close();
    }

    #[test]
    fn one_sided_passphrase_is_rejected() {
        let listener = listen_local(SocketOptions::default());
        let mut client_options = SocketOptions::default();
        client_options.passphrase = Some(psk());

        let result = SrtSocket::connect(
            listener.local_addr(),
            None,
            client_options,
            TIMEOUT,
        );

        assert!(matches!(
            result,
            Err(TransportError::ConnectionRejected(RejectReason::Unsecure))
        ));
        listener.close();
    }

    #[test]
    fn connect_to_nothing_times_out() {
        let result = SrtSocket::connect(
            "127.0.0.1:1".parse().unwrap(),
            None,
            SocketOptions::default(),
            Duration::from_millis(400),
        );
        assert!(matches!(result, Err(TransportError::ConnectTimeout)));
    }

    #[test]
    fn stream_id_is_readable_on_accepted_socket() {
        let listener = listen_local(SocketOptions::default());
        let mut client_options = SocketOptions::default();
        client_options.stream_id = Some("An example Stream ID".to_string());

        let caller = connect_local(&listener, client_options);
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        assert_eq!(accepted.stream_id().as_deref(), Some("An example Stream ID"));

        caller.close();
        listener.close();
        accepted.close();
    }

    #[test]
    fn close_breaks_the_peer() {
        let listener = listen_local(SocketOptions::default());
        let caller = connect_local(&listener, SocketOptions::default());
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        caller.close();

        let result = accepted.recv_timeout(TIMEOUT);
        assert!(matches!(result, Err(TransportError::Broken)));

        listener.close();
        accepted.close();
    }

    #[test]
    fn poller_reports_readable_then_broken() {
        let listener = listen_local(SocketOptions::default());
        let caller = connect_local(&listener, SocketOptions::default());
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        let poller = Poller::new();
        poller.add(&accepted);
        poller.add(&accepted); // idempotent
        assert_eq!(poller.len(), 1);

        let mut ctrl = MsgCtrl::default();
        caller.send(b"wake up", &mut ctrl).unwrap();

        let events = poller.wait(TIMEOUT, 5);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Readable);
        assert!(events[0].socket.try_recv().unwrap().is_some());

        caller.close();
        let events = poller.wait(TIMEOUT, 5);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Broken);

        poller.remove(&accepted);
        assert!(poller.is_empty());

        listener.close();
        accepted.close();
    }

    #[test]
    fn oversize_send_fails_fast() {
        let listener = listen_local(SocketOptions::default());
        let caller = connect_local(&listener, SocketOptions::default());
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        let mut ctrl = MsgCtrl::default();
        let result = caller.send(&vec![1u8; MAX_PAYLOAD_SIZE + 1], &mut ctrl);
        assert!(matches!(
            result,
            Err(TransportError::PayloadTooLarge { .. })
        ));

        // The connection is untouched and still works.
        caller.send(&vec![1u8; MAX_PAYLOAD_SIZE], &mut ctrl).unwrap();
        let (payload, _) = accepted.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(payload.len(), MAX_PAYLOAD_SIZE);

        caller.close();
        listener.close();
        accepted.close();
    }

    #[test]
    fn listener_close_keeps_connections_alive() {
        let listener = listen_local(SocketOptions::default());
        let caller = connect_local(&listener, SocketOptions::default());
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        listener.close();

        // A second caller is refused while the port still serves the
        // established connection.
        let refused = SrtSocket::connect(
            accepted.local_addr(),
            None,
            SocketOptions::default(),
            TIMEOUT,
        );
        assert!(matches!(
            refused,
            Err(TransportError::ConnectionRejected(RejectReason::Closed))
        ));

        let mut ctrl = MsgCtrl::default();
        caller.send(b"still alive", &mut ctrl).unwrap();
        let (payload, _) = accepted.recv_timeout(TIMEOUT).unwrap().unwrap();
        assert_eq!(&payload[..], b"still alive");

        caller.close();
        accepted.close();
    }

    #[test]
    fn statistics_count_data_packets() {
        let listener = listen_local(SocketOptions::default());
        let caller = connect_local(&listener, SocketOptions::default());
        let (accepted, _) = listener.accept(TIMEOUT).unwrap().unwrap();

        let mut ctrl = MsgCtrl::default();
        caller.send(&[1u8; 100], &mut ctrl).unwrap();
        accepted.recv_timeout(TIMEOUT).unwrap().unwrap();

        let caller_stats = caller.statistics(false, true).unwrap();
        let accepted_stats = accepted.statistics(false, true).unwrap();
        assert_eq!(caller_stats.pkt_sent_total, 1);
        assert_eq!(accepted_stats.pkt_recv_total, 1);
        assert_eq!(accepted_stats.bytes_recv_total, 100);
        assert!(listener.statistics(false, true).is_none());

        caller.close();
        listener.close();
        accepted.close();
    }
}
