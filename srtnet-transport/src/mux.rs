//! UDP multiplexer.
//!
//! One multiplexer owns each bound UDP port. Its reader thread
//! demultiplexes datagrams to connections by peer address, answers
//! handshakes while a listener is attached, and runs per-connection
//! housekeeping (keep-alives, peer-idle detection). The port stays alive
//! while either a listener or any established connection uses it, so a
//! listener can be torn down without dropping the connections it
//! accepted.

use crate::error::TransportError;
use crate::options::SocketOptions;
use crate::socket::{next_socket_id, ConnCore, ConnSetup, ConnectionInfo, ListenerCore, SrtSocket};
use crate::udp::UdpChannel;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use srtnet_crypto::{derive_key, verify_auth_tag, Direction, PayloadCipher};
use srtnet_protocol::handshake::{Capabilities, Handshake, HandshakeType, RejectReason};
use srtnet_protocol::packet::{ControlPacket, ControlType, Packet};
use srtnet_protocol::sequence::SeqNumber;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Cadence for repeating unanswered handshake rounds.
pub(crate) const HANDSHAKE_RETRANSMIT: Duration = Duration::from_millis(250);

/// Salt for the handshake authentication key.
pub(crate) const HS_AUTH_SALT: &[u8] = b"srtnet-handshake-auth";

/// A keep-alive goes out after this long without any outbound packet.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Housekeeping cadence of the reader thread.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(100);

/// Half-open handshakes are forgotten after this long.
const PENDING_TTL: Duration = Duration::from_secs(10);

/// Bytes covered by the handshake authentication tag.
pub(crate) fn auth_material(
    cookie: u32,
    socket_id: u32,
    initial_seq: u32,
    stream_id: Option<&str>,
) -> Vec<u8> {
    let mut material = Vec::with_capacity(12 + stream_id.map_or(0, str::len));
    material.extend_from_slice(&cookie.to_be_bytes());
    material.extend_from_slice(&socket_id.to_be_bytes());
    material.extend_from_slice(&initial_seq.to_be_bytes());
    if let Some(stream_id) = stream_id {
        material.extend_from_slice(stream_id.as_bytes());
    }
    material
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    cookie: u32,
    created: Instant,
}

pub(crate) struct Multiplexer {
    channel: UdpChannel,
    options: SocketOptions,
    conns: RwLock<HashMap<SocketAddr, Arc<ConnCore>>>,
    listener: RwLock<Option<Arc<ListenerCore>>>,
    pending: Mutex<HashMap<SocketAddr, Pending>>,
    running: AtomicBool,
    started: AtomicBool,
    last_housekeeping: Mutex<Instant>,
}

impl Multiplexer {
    pub(crate) fn bind(
        addr: SocketAddr,
        options: SocketOptions,
    ) -> Result<Arc<Self>, TransportError> {
        let channel = UdpChannel::bind(addr, &options)?;
        Ok(Arc::new(Multiplexer {
            channel,
            options,
            conns: RwLock::new(HashMap::new()),
            listener: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            last_housekeeping: Mutex::new(Instant::now()),
        }))
    }

    pub(crate) fn channel(&self) -> &UdpChannel {
        &self.channel
    }

    pub(crate) fn options(&self) -> &SocketOptions {
        &self.options
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.channel.local_addr()
    }

    pub(crate) fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<(), TransportError> {
        self.channel.send_to(buf, target)
    }

    pub(crate) fn attach_listener(&self, listener: &Arc<ListenerCore>) {
        *self.listener.write() = Some(listener.clone());
    }

    pub(crate) fn detach_listener(&self, id: u32) {
        {
            let mut slot = self.listener.write();
            if slot.as_ref().is_some_and(|l| l.id() == id) {
                *slot = None;
            }
        }
        self.stop_if_unused();
    }

    pub(crate) fn insert_conn(&self, conn: Arc<ConnCore>) {
        self.conns.write().insert(conn.peer(), conn);
    }

    pub(crate) fn remove_conn(&self, peer: SocketAddr, id: u32) {
        {
            let mut conns = self.conns.write();
            if conns.get(&peer).is_some_and(|c| c.id() == id) {
                conns.remove(&peer);
            }
        }
        self.stop_if_unused();
    }

    /// Let the reader exit once neither a listener nor any connection
    /// uses the port.
    fn stop_if_unused(&self) {
        if self.listener.read().is_none() && self.conns.read().is_empty() {
            self.running.store(false, Ordering::Release);
        }
    }

    /// Start the reader thread. Idempotent.
    pub(crate) fn spawn_reader(mux: &Arc<Multiplexer>) -> Result<(), TransportError> {
        if mux.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        mux.running.store(true, Ordering::Release);

        let runner = mux.clone();
        thread::Builder::new()
            .name(format!("srtnet-mux-{}", mux.local_addr().port()))
            .spawn(move || runner.run())
            .map_err(TransportError::Io)?;
        Ok(())
    }

    fn run(self: &Arc<Self>) {
        let mut buf = vec![0u8; 65536];
        while self.running.load(Ordering::Acquire) {
            match self.channel.recv_from(&mut buf) {
                Ok(Some((n, from))) => self.dispatch(&buf[..n], from),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "reader receive failed");
                }
            }
            self.housekeeping();
        }
        tracing::debug!(addr = %self.local_addr(), "multiplexer stopped");
    }

    fn dispatch(self: &Arc<Self>, data: &[u8], from: SocketAddr) {
        let packet = match Packet::from_bytes(data) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping unparseable datagram");
                return;
            }
        };

        if let Packet::Control(control) = &packet {
            if control.control_type() == ControlType::Handshake {
                self.handle_handshake(control, from);
                return;
            }
        }

        let Some(conn) = self.conns.read().get(&from).cloned() else {
            tracing::trace!(%from, "dropping datagram from unknown peer");
            return;
        };

        match packet {
            Packet::Data(data_packet) => conn.handle_data(data_packet),
            Packet::Control(control) => match control.control_type() {
                ControlType::KeepAlive | ControlType::Ack => conn.handle_keepalive(),
                ControlType::Shutdown => conn.handle_shutdown(),
                ControlType::PeerError => conn.mark_broken(),
                ControlType::Handshake => {}
            },
        }
    }

    fn handle_handshake(self: &Arc<Self>, control: &ControlPacket, from: SocketAddr) {
        let handshake = match Handshake::from_bytes(&control.control_info) {
            Ok(handshake) => handshake,
            Err(e) => {
                tracing::debug!(%from, error = %e, "dropping malformed handshake");
                return;
            }
        };

        match handshake.hs_type {
            HandshakeType::Induction => self.handle_induction(handshake, from),
            HandshakeType::Conclusion => self.handle_conclusion(handshake, from),
            // Caller-side phases are consumed by the blocking connect;
            // anything arriving here is a late duplicate.
            HandshakeType::Agreement | HandshakeType::Rejected(_) => {}
        }
    }

    fn handle_induction(self: &Arc<Self>, handshake: Handshake, from: SocketAddr) {
        if self.conns.read().contains_key(&from) {
            return;
        }
        if self.accepting_listener().is_none() {
            self.send_rejection(from, RejectReason::Closed, handshake.socket_id);
            return;
        }

        let cookie = {
            let mut pending = self.pending.lock();
            let entry = pending.entry(from).or_insert_with(|| Pending {
                cookie: next_socket_id(),
                created: Instant::now(),
            });
            entry.cookie
        };

        let mut response = Handshake::new(
            HandshakeType::Induction,
            0,
            0,
            self.options.max_payload() as u32,
        );
        response.cookie = cookie;
        response.set_peer_addr(from);
        self.send_handshake(from, &response, handshake.socket_id);
    }

    fn handle_conclusion(self: &Arc<Self>, handshake: Handshake, from: SocketAddr) {
        // A repeated conclusion means our agreement was lost; repeat it.
        if let Some(conn) = self.conns.read().get(&from).cloned() {
            if let Some(wire) = &conn.agreement {
                let _ = self.channel.send_to(wire, from);
            }
            return;
        }

        let Some(pending) = self.pending.lock().get(&from).copied() else {
            return;
        };
        if handshake.cookie != pending.cookie {
            tracing::debug!(%from, "conclusion with stale cookie");
            return;
        }

        let Some(listener) = self.accepting_listener() else {
            self.pending.lock().remove(&from);
            self.send_rejection(from, RejectReason::Closed, handshake.socket_id);
            return;
        };

        match (&self.options.passphrase, &handshake.auth_tag) {
            (None, None) => {}
            (Some(_), None) | (None, Some(_)) => {
                tracing::info!(%from, "rejecting peer: one-sided passphrase");
                self.pending.lock().remove(&from);
                self.send_rejection(from, RejectReason::Unsecure, handshake.socket_id);
                return;
            }
            (Some(passphrase), Some(tag)) => {
                let key = derive_key(passphrase, HS_AUTH_SALT);
                let material = auth_material(
                    pending.cookie,
                    handshake.socket_id,
                    handshake.initial_seq,
                    handshake.stream_id.as_deref(),
                );
                if !verify_auth_tag(&key, &material, tag) {
                    tracing::info!(%from, "rejecting peer: passphrase mismatch");
                    self.pending.lock().remove(&from);
                    self.send_rejection(from, RejectReason::BadSecret, handshake.socket_id);
                    return;
                }
            }
        }

        let caps = handshake
            .capabilities
            .unwrap_or_else(|| Capabilities::new(self.options.latency_ms, false));
        let negotiated_latency = caps.recv_latency_ms.max(self.options.latency_ms);

        let conn_id = next_socket_id();
        let initial_seq = SeqNumber::new(rand::random::<u32>());
        let cipher = self.options.passphrase.as_ref().map(|passphrase| {
            PayloadCipher::session(passphrase, pending.cookie, handshake.socket_id, conn_id)
        });

        let mut agreement = Handshake::new(
            HandshakeType::Agreement,
            conn_id,
            initial_seq.as_raw(),
            self.options.max_payload() as u32,
        );
        agreement.cookie = pending.cookie;
        agreement.set_peer_addr(from);
        agreement.capabilities = Some(Capabilities::new(negotiated_latency, cipher.is_some()));
        let agreement_wire: Bytes =
            ControlPacket::new(ControlType::Handshake, 0, 0, handshake.socket_id, agreement.to_bytes())
                .to_bytes()
                .freeze();

        let conn = ConnCore::new(
            self.clone(),
            ConnSetup {
                id: conn_id,
                remote_id: handshake.socket_id,
                peer: from,
                options: self.options.clone(),
                cipher,
                direction_out: Direction::ListenerToCaller,
                info: ConnectionInfo {
                    peer_srt_version: caps.srt_version,
                    negotiated_latency_ms: negotiated_latency as i32,
                },
                stream_id: handshake.stream_id.clone(),
            },
            Some(initial_seq),
            Some(agreement_wire.clone()),
        );

        self.conns.write().insert(from, conn.clone());
        self.pending.lock().remove(&from);
        let _ = self.channel.send_to(&agreement_wire, from);

        tracing::debug!(socket = conn_id, peer = %from, "accepted connection");
        listener.push_accepted(SrtSocket::from_conn(conn), from);
    }

    fn housekeeping(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_housekeeping.lock();
            if now.duration_since(*last) < HOUSEKEEPING_INTERVAL {
                return;
            }
            *last = now;
        }

        self.pending
            .lock()
            .retain(|_, pending| now.duration_since(pending.created) < PENDING_TTL);

        let conns: Vec<_> = self.conns.read().values().cloned().collect();
        for conn in conns {
            conn.tick(now, KEEPALIVE_INTERVAL);
        }

        self.stop_if_unused();
    }

    fn accepting_listener(&self) -> Option<Arc<ListenerCore>> {
        self.listener.read().clone().filter(|l| l.is_accepting())
    }

    fn send_handshake(&self, to: SocketAddr, handshake: &Handshake, dest_socket_id: u32) {
        let wire = ControlPacket::new(
            ControlType::Handshake,
            0,
            0,
            dest_socket_id,
            handshake.to_bytes(),
        )
        .to_bytes();
        if let Err(e) = self.channel.send_to(&wire, to) {
            tracing::debug!(%to, error = %e, "failed to send handshake");
        }
    }

    fn send_rejection(&self, to: SocketAddr, reason: RejectReason, dest_socket_id: u32) {
        let handshake = Handshake::new(HandshakeType::Rejected(reason), 0, 0, 0);
        self.send_handshake(to, &handshake, dest_socket_id);
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("local_addr", &self.local_addr())
            .field("conns", &self.conns.read().len())
            .finish_non_exhaustive()
    }
}
