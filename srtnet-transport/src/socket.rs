//! Socket handles.
//!
//! An [`SrtSocket`] is a cheap cloneable handle to either a listener or an
//! established connection on a UDP multiplexer. All blocking operations
//! are bounded and observe close/broken promptly through condvars, so a
//! caller never sleeps past one timeout quantum after cancellation.

use crate::error::TransportError;
use crate::mux::{auth_material, Multiplexer, HANDSHAKE_RETRANSMIT, HS_AUTH_SALT};
use crate::options::SocketOptions;
use crate::poller::PollerShared;
use crate::stats::{SocketStats, StatsTracker};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use srtnet_crypto::{auth_tag, derive_key, Direction, PayloadCipher};
use srtnet_protocol::handshake::{Capabilities, Handshake, HandshakeType};
use srtnet_protocol::packet::{
    ControlPacket, ControlType, DataPacket, MessageBoundary, MessageFlags, Packet,
};
use srtnet_protocol::reorder::ReorderWindow;
use srtnet_protocol::sequence::SeqNumber;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Message control block exchanged with `send` and filled by `recv`.
#[derive(Debug, Clone)]
pub struct MsgCtrl {
    /// Time-to-live for the message in milliseconds; -1 keeps it alive
    /// indefinitely. Carried for API compatibility.
    pub ttl_ms: i32,
    /// Request in-order delivery.
    pub in_order: bool,
    /// Message boundary; this transport sends solo messages.
    pub boundary: MessageBoundary,
    /// Sender timestamp, microseconds since its connection epoch.
    pub src_time_us: u64,
    /// Sequence number of the carrying packet.
    pub pkt_seq: u32,
    /// Message number.
    pub msg_number: u32,
}

impl Default for MsgCtrl {
    fn default() -> Self {
        MsgCtrl {
            ttl_ms: -1,
            in_order: false,
            boundary: MessageBoundary::Solo,
            src_time_us: 0,
            pkt_seq: 0,
            msg_number: 0,
        }
    }
}

/// Facts negotiated during the handshake.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionInfo {
    /// Peer protocol version, packed; 0 when unknown.
    pub peer_srt_version: u32,
    /// Negotiated latency in milliseconds; -1 when unknown.
    pub negotiated_latency_ms: i32,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        ConnectionInfo {
            peer_srt_version: 0,
            negotiated_latency_ms: -1,
        }
    }
}

/// Allocate a non-zero 31-bit socket id.
pub(crate) fn next_socket_id() -> u32 {
    loop {
        let id = rand::random::<u32>() & 0x7FFF_FFFF;
        if id != 0 {
            return id;
        }
    }
}

fn random_seq() -> SeqNumber {
    SeqNumber::new(rand::random::<u32>())
}

#[derive(Debug)]
pub(crate) struct ConnState {
    rx: VecDeque<(Bytes, MsgCtrl)>,
    window: ReorderWindow,
    broken: bool,
    closed: bool,
}

/// Everything the multiplexer or `connect` knows about a new connection.
pub(crate) struct ConnSetup {
    pub id: u32,
    pub remote_id: u32,
    pub peer: SocketAddr,
    pub options: SocketOptions,
    pub cipher: Option<PayloadCipher>,
    pub direction_out: Direction,
    pub info: ConnectionInfo,
    pub stream_id: Option<String>,
}

/// One established connection.
pub(crate) struct ConnCore {
    id: u32,
    remote_id: u32,
    peer: SocketAddr,
    mux: Arc<Multiplexer>,
    options: SocketOptions,
    cipher: Option<PayloadCipher>,
    direction_out: Direction,
    info: ConnectionInfo,
    stream_id: Option<String>,
    /// Serialized agreement packet, kept so a lost one can be repeated
    /// when the peer retransmits its conclusion. Listener side only.
    pub(crate) agreement: Option<Bytes>,
    state: Mutex<ConnState>,
    cv: Condvar,
    send_seq: Mutex<SeqNumber>,
    send_msg: AtomicU32,
    stats: StatsTracker,
    watchers: Mutex<Vec<Weak<PollerShared>>>,
    last_recv: Mutex<Instant>,
    last_sent: Mutex<Instant>,
    epoch: Instant,
}

impl ConnCore {
    pub(crate) fn new(
        mux: Arc<Multiplexer>,
        setup: ConnSetup,
        initial_send_seq: Option<SeqNumber>,
        agreement: Option<Bytes>,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(ConnCore {
            id: setup.id,
            remote_id: setup.remote_id,
            peer: setup.peer,
            mux,
            state: Mutex::new(ConnState {
                rx: VecDeque::new(),
                window: ReorderWindow::new(setup.options.reorder_tolerance),
                broken: false,
                closed: false,
            }),
            cipher: setup.cipher,
            direction_out: setup.direction_out,
            info: setup.info,
            stream_id: setup.stream_id,
            options: setup.options,
            agreement,
            cv: Condvar::new(),
            send_seq: Mutex::new(initial_send_seq.unwrap_or_else(random_seq)),
            send_msg: AtomicU32::new(0),
            stats: StatsTracker::new(),
            watchers: Mutex::new(Vec::new()),
            last_recv: Mutex::new(now),
            last_sent: Mutex::new(now),
            epoch: now,
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn timestamp(&self) -> u32 {
        self.epoch.elapsed().as_micros() as u32
    }

    fn direction_in(&self) -> Direction {
        match self.direction_out {
            Direction::CallerToListener => Direction::ListenerToCaller,
            Direction::ListenerToCaller => Direction::CallerToListener,
        }
    }

    fn notify(&self) {
        self.cv.notify_all();
        let mut watchers = self.watchers.lock();
        watchers.retain(|w| match w.upgrade() {
            Some(shared) => {
                shared.notify();
                true
            }
            None => false,
        });
    }

    pub(crate) fn add_watcher(&self, watcher: Weak<PollerShared>) {
        self.watchers.lock().push(watcher);
    }

    /// Route one incoming data packet: decrypt, reorder, queue.
    pub(crate) fn handle_data(&self, packet: DataPacket) {
        let flags = packet.message_flags();
        if flags.encrypted != self.cipher.is_some() {
            tracing::debug!(
                socket = self.id,
                "dropping data packet with mismatched protection"
            );
            return;
        }

        let seq = packet.seq_number();
        let payload = match &self.cipher {
            Some(cipher) => {
                match cipher.decrypt(
                    self.direction_in(),
                    seq.as_raw(),
                    flags.number,
                    &packet.payload,
                ) {
                    Ok(plain) => Bytes::from(plain),
                    Err(e) => {
                        tracing::debug!(socket = self.id, error = %e, "payload failed to decrypt");
                        return;
                    }
                }
            }
            None => packet.payload.clone(),
        };

        *self.last_recv.lock() = Instant::now();
        self.stats.on_received(payload.len());

        let mut state = self.state.lock();
        if state.closed || state.broken {
            return;
        }

        state.window.push(DataPacket {
            header: packet.header,
            payload,
        });

        let mut delivered = false;
        while let Some(ready) = state.window.next_ready() {
            let flags = ready.message_flags();
            let ctrl = MsgCtrl {
                ttl_ms: -1,
                in_order: flags.in_order,
                boundary: flags.boundary,
                src_time_us: ready.header.timestamp as u64,
                pkt_seq: ready.seq_number().as_raw(),
                msg_number: flags.number,
            };
            state.rx.push_back((ready.payload, ctrl));
            delivered = true;
        }
        drop(state);

        if delivered {
            self.notify();
        }
    }

    pub(crate) fn handle_keepalive(&self) {
        *self.last_recv.lock() = Instant::now();
    }

    pub(crate) fn handle_shutdown(&self) {
        tracing::debug!(socket = self.id, peer = %self.peer, "peer shut the connection down");
        self.mark_broken();
    }

    pub(crate) fn mark_broken(&self) {
        {
            let mut state = self.state.lock();
            if state.broken {
                return;
            }
            state.broken = true;
        }
        self.notify();
    }

    /// Periodic housekeeping driven by the multiplexer reader.
    pub(crate) fn tick(&self, now: Instant, keepalive_after: Duration) {
        {
            let state = self.state.lock();
            if state.broken || state.closed {
                return;
            }
        }

        let idle = now.duration_since(*self.last_recv.lock());
        if idle > self.options.peer_idle_timeout {
            tracing::debug!(socket = self.id, peer = %self.peer, ?idle, "peer idle timeout");
            self.mark_broken();
            return;
        }

        let mut last_sent = self.last_sent.lock();
        if now.duration_since(*last_sent) > keepalive_after {
            let packet = ControlPacket::new(
                ControlType::KeepAlive,
                0,
                self.timestamp(),
                self.remote_id,
                Bytes::new(),
            );
            let _ = self.mux.send_to(&packet.to_bytes(), self.peer);
            *last_sent = now;
        }
    }

    fn send(&self, payload: &[u8], ctrl: &mut MsgCtrl) -> Result<(), TransportError> {
        let max = self.options.max_payload();
        if payload.len() > max {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        {
            let state = self.state.lock();
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.broken {
                return Err(TransportError::Broken);
            }
        }

        let seq = {
            let mut send_seq = self.send_seq.lock();
            let current = *send_seq;
            *send_seq = send_seq.next();
            current
        };
        let msg_number = self.send_msg.fetch_add(1, Ordering::Relaxed) & 0x03FF_FFFF;

        let mut flags = MessageFlags::new(msg_number);
        flags.in_order = ctrl.in_order;
        flags.boundary = MessageBoundary::Solo;

        let wire_payload = match &self.cipher {
            Some(cipher) => {
                flags.encrypted = true;
                Bytes::from(cipher.encrypt(self.direction_out, seq.as_raw(), msg_number, payload)?)
            }
            None => Bytes::copy_from_slice(payload),
        };

        let timestamp = self.timestamp();
        let packet = DataPacket::new(seq, flags, timestamp, self.remote_id, wire_payload);
        self.mux.send_to(&packet.to_bytes(), self.peer)?;

        ctrl.boundary = flags.boundary;
        ctrl.pkt_seq = seq.as_raw();
        ctrl.msg_number = msg_number;
        ctrl.src_time_us = timestamp as u64;

        self.stats.on_sent(payload.len());
        *self.last_sent.lock() = Instant::now();
        Ok(())
    }

    fn recv_deadline(
        &self,
        deadline: Option<Instant>,
    ) -> Result<Option<(Bytes, MsgCtrl)>, TransportError> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.rx.pop_front() {
                return Ok(Some(entry));
            }
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.broken {
                return Err(TransportError::Broken);
            }

            let Some(deadline) = deadline else {
                return Ok(None);
            };
            if Instant::now() >= deadline || self.cv.wait_until(&mut state, deadline).timed_out() {
                // One last look: the queue may have been filled right at
                // the deadline.
                if let Some(entry) = state.rx.pop_front() {
                    return Ok(Some(entry));
                }
                if state.closed {
                    return Err(TransportError::Closed);
                }
                if state.broken {
                    return Err(TransportError::Broken);
                }
                return Ok(None);
            }
        }
    }

    fn close(&self) {
        let send_shutdown = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            !state.broken
        };

        if send_shutdown {
            let packet = ControlPacket::new(
                ControlType::Shutdown,
                0,
                self.timestamp(),
                self.remote_id,
                Bytes::new(),
            );
            let _ = self.mux.send_to(&packet.to_bytes(), self.peer);
        }

        self.notify();
        self.mux.remove_conn(self.peer, self.id);
    }

    fn readiness(&self) -> Option<EventKind> {
        let state = self.state.lock();
        if !state.rx.is_empty() {
            Some(EventKind::Readable)
        } else if state.broken || state.closed {
            Some(EventKind::Broken)
        } else {
            None
        }
    }

    fn is_broken(&self) -> bool {
        self.state.lock().broken
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn statistics(&self, clear: bool, instantaneous: bool) -> SocketStats {
        let (dropped, belated) = {
            let state = self.state.lock();
            (state.window.skipped(), state.window.belated())
        };
        self.stats.snapshot(clear, instantaneous, dropped, belated)
    }
}

impl fmt::Debug for ConnCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnCore")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Listener state: a backlog of handshaken connections.
pub(crate) struct ListenerCore {
    id: u32,
    mux: Arc<Multiplexer>,
    backlog: Mutex<VecDeque<(SrtSocket, SocketAddr)>>,
    cv: Condvar,
    closed: AtomicBool,
}

impl ListenerCore {
    fn new(mux: Arc<Multiplexer>) -> Arc<Self> {
        Arc::new(ListenerCore {
            id: next_socket_id(),
            mux,
            backlog: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn is_accepting(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn push_accepted(&self, socket: SrtSocket, peer: SocketAddr) {
        self.backlog.lock().push_back((socket, peer));
        self.cv.notify_all();
    }

    fn accept(&self, timeout: Duration) -> Result<Option<(SrtSocket, SocketAddr)>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut backlog = self.backlog.lock();
        loop {
            if let Some(entry) = backlog.pop_front() {
                return Ok(Some(entry));
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            if Instant::now() >= deadline || self.cv.wait_until(&mut backlog, deadline).timed_out()
            {
                return match backlog.pop_front() {
                    Some(entry) => Ok(Some(entry)),
                    None if self.closed.load(Ordering::Acquire) => Err(TransportError::Closed),
                    None => Ok(None),
                };
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cv.notify_all();
        self.mux.detach_listener(self.id);

        // Connections sitting unaccepted in the backlog are orphaned.
        let orphans: std::collections::VecDeque<_> = std::mem::take(&mut *self.backlog.lock());
        for (socket, _) in orphans {
            socket.close();
        }
    }
}

impl fmt::Debug for ListenerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerCore").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Readiness classification reported by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// At least one message is queued for `recv`.
    Readable,
    /// The connection is broken or closed.
    Broken,
}

#[derive(Clone)]
enum SocketKind {
    Listener(Arc<ListenerCore>),
    Connection(Arc<ConnCore>),
}

/// Handle to a listener or connection.
///
/// Clones refer to the same underlying socket; equality and hashing use
/// the socket id.
#[derive(Clone)]
pub struct SrtSocket {
    kind: SocketKind,
}

impl SrtSocket {
    /// Bind a listener and start accepting handshakes.
    pub fn listen(addr: SocketAddr, options: SocketOptions) -> Result<SrtSocket, TransportError> {
        options.validate()?;
        let mux = Multiplexer::bind(addr, options)?;
        let listener = ListenerCore::new(mux.clone());
        mux.attach_listener(&listener);
        Multiplexer::spawn_reader(&mux)?;
        tracing::debug!(addr = %mux.local_addr(), socket = listener.id(), "listener started");
        Ok(SrtSocket {
            kind: SocketKind::Listener(listener),
        })
    }

    /// Connect to a listener, blocking until the handshake completes or
    /// `timeout` expires. A rejection by the peer is reported distinctly
    /// from a timeout.
    pub fn connect(
        remote: SocketAddr,
        local: Option<SocketAddr>,
        options: SocketOptions,
        timeout: Duration,
    ) -> Result<SrtSocket, TransportError> {
        options.validate()?;

        let local = local.unwrap_or_else(|| {
            if remote.is_ipv4() {
                "0.0.0.0:0".parse().expect("constant address parses")
            } else {
                "[::]:0".parse().expect("constant address parses")
            }
        });
        if local.is_ipv4() != remote.is_ipv4() {
            return Err(TransportError::InvalidAddress);
        }

        let mut caller_options = options.clone();
        caller_options.ipv6_only = false;

        let mux = Multiplexer::bind(local, caller_options.clone())?;
        let socket_id = next_socket_id();
        let initial_seq = random_seq();
        let max_payload = options.max_payload() as u32;
        let deadline = Instant::now() + timeout;

        // Round one: induction, fetching the listener's cookie.
        let mut induction =
            Handshake::new(HandshakeType::Induction, socket_id, initial_seq.as_raw(), max_payload);
        induction.set_peer_addr(remote);
        let cookie = exchange(&mux, remote, &induction, deadline, |hs| match hs.hs_type {
            HandshakeType::Induction => Some(Ok(hs.cookie)),
            HandshakeType::Rejected(reason) => {
                Some(Err(TransportError::ConnectionRejected(reason)))
            }
            _ => None,
        })?;

        // Round two: conclusion with capabilities, stream id and proof of
        // the passphrase.
        let mut conclusion =
            Handshake::new(HandshakeType::Conclusion, socket_id, initial_seq.as_raw(), max_payload);
        conclusion.cookie = cookie;
        conclusion.set_peer_addr(remote);
        conclusion.capabilities = Some(Capabilities::new(
            options.latency_ms,
            options.passphrase.is_some(),
        ));
        conclusion.stream_id = options.stream_id.clone();
        if let Some(passphrase) = &options.passphrase {
            let key = derive_key(passphrase, HS_AUTH_SALT);
            let material = auth_material(
                cookie,
                socket_id,
                initial_seq.as_raw(),
                options.stream_id.as_deref(),
            );
            conclusion.auth_tag = Some(auth_tag(&key, &material));
        }

        let agreement = exchange(&mux, remote, &conclusion, deadline, |hs| match hs.hs_type {
            HandshakeType::Agreement => Some(Ok(hs)),
            HandshakeType::Rejected(reason) => {
                Some(Err(TransportError::ConnectionRejected(reason)))
            }
            _ => None,
        })?;

        let caps = agreement
            .capabilities
            .unwrap_or_else(|| Capabilities::new(options.latency_ms, false));
        let info = ConnectionInfo {
            peer_srt_version: caps.srt_version,
            negotiated_latency_ms: caps.recv_latency_ms.max(options.latency_ms) as i32,
        };
        let cipher = options
            .passphrase
            .as_ref()
            .map(|psk| PayloadCipher::session(psk, cookie, socket_id, agreement.socket_id));

        let conn = ConnCore::new(
            mux.clone(),
            ConnSetup {
                id: socket_id,
                remote_id: agreement.socket_id,
                peer: remote,
                options: caller_options,
                cipher,
                direction_out: Direction::CallerToListener,
                info,
                stream_id: options.stream_id.clone(),
            },
            Some(initial_seq),
            None,
        );
        mux.insert_conn(conn.clone());
        Multiplexer::spawn_reader(&mux)?;

        tracing::debug!(
            socket = socket_id,
            peer = %remote,
            local = %mux.local_addr(),
            "caller connected"
        );
        Ok(SrtSocket {
            kind: SocketKind::Connection(conn),
        })
    }

    pub(crate) fn from_conn(conn: Arc<ConnCore>) -> SrtSocket {
        SrtSocket {
            kind: SocketKind::Connection(conn),
        }
    }

    /// Stable socket id, unique per process.
    pub fn id(&self) -> u32 {
        match &self.kind {
            SocketKind::Listener(listener) => listener.id(),
            SocketKind::Connection(conn) => conn.id(),
        }
    }

    /// Accept the next handshaken connection. `Ok(None)` on timeout.
    pub fn accept(
        &self,
        timeout: Duration,
    ) -> Result<Option<(SrtSocket, SocketAddr)>, TransportError> {
        match &self.kind {
            SocketKind::Listener(listener) => listener.accept(timeout),
            SocketKind::Connection(_) => Err(TransportError::WrongRole),
        }
    }

    /// Send one message. Fails fast on oversize payloads without touching
    /// the socket.
    pub fn send(&self, payload: &[u8], ctrl: &mut MsgCtrl) -> Result<(), TransportError> {
        match &self.kind {
            SocketKind::Connection(conn) => conn.send(payload, ctrl),
            SocketKind::Listener(_) => Err(TransportError::WrongRole),
        }
    }

    /// Receive one message, waiting up to `timeout`. `Ok(None)` on
    /// timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<(Bytes, MsgCtrl)>, TransportError> {
        match &self.kind {
            SocketKind::Connection(conn) => conn.recv_deadline(Some(Instant::now() + timeout)),
            SocketKind::Listener(_) => Err(TransportError::WrongRole),
        }
    }

    /// Receive one message if one is already queued.
    pub fn try_recv(&self) -> Result<Option<(Bytes, MsgCtrl)>, TransportError> {
        match &self.kind {
            SocketKind::Connection(conn) => conn.recv_deadline(None),
            SocketKind::Listener(_) => Err(TransportError::WrongRole),
        }
    }

    /// Close the socket. Connections send a shutdown to the peer;
    /// listeners stop accepting but leave established connections alive.
    pub fn close(&self) {
        match &self.kind {
            SocketKind::Listener(listener) => listener.close(),
            SocketKind::Connection(conn) => conn.close(),
        }
    }

    pub fn is_listener(&self) -> bool {
        matches!(self.kind, SocketKind::Listener(_))
    }

    pub fn is_broken(&self) -> bool {
        match &self.kind {
            SocketKind::Connection(conn) => conn.is_broken(),
            SocketKind::Listener(_) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.kind {
            SocketKind::Connection(conn) => conn.is_closed(),
            SocketKind::Listener(listener) => !listener.is_accepting(),
        }
    }

    /// Local address of the owning multiplexer.
    pub fn local_addr(&self) -> SocketAddr {
        match &self.kind {
            SocketKind::Listener(listener) => listener.mux.local_addr(),
            SocketKind::Connection(conn) => conn.mux.local_addr(),
        }
    }

    /// Peer address; `None` for listeners.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match &self.kind {
            SocketKind::Connection(conn) => Some(conn.peer()),
            SocketKind::Listener(_) => None,
        }
    }

    /// Stream id: the peer's on an accepted socket, the configured one on
    /// a caller socket.
    pub fn stream_id(&self) -> Option<String> {
        match &self.kind {
            SocketKind::Connection(conn) => conn.stream_id.clone(),
            SocketKind::Listener(_) => None,
        }
    }

    /// Handshake facts; defaults for listeners.
    pub fn connection_info(&self) -> ConnectionInfo {
        match &self.kind {
            SocketKind::Connection(conn) => conn.info,
            SocketKind::Listener(_) => ConnectionInfo::default(),
        }
    }

    /// Traffic statistics; `None` for listeners.
    pub fn statistics(&self, clear: bool, instantaneous: bool) -> Option<SocketStats> {
        match &self.kind {
            SocketKind::Connection(conn) => Some(conn.statistics(clear, instantaneous)),
            SocketKind::Listener(_) => None,
        }
    }

    /// Largest message `send` accepts.
    pub fn max_payload_size(&self) -> usize {
        match &self.kind {
            SocketKind::Connection(conn) => conn.options.max_payload(),
            SocketKind::Listener(listener) => listener.mux.options().max_payload(),
        }
    }

    pub(crate) fn readiness(&self) -> Option<EventKind> {
        match &self.kind {
            SocketKind::Connection(conn) => conn.readiness(),
            SocketKind::Listener(listener) => {
                if !listener.is_accepting() {
                    Some(EventKind::Broken)
                } else if !listener.backlog.lock().is_empty() {
                    Some(EventKind::Readable)
                } else {
                    None
                }
            }
        }
    }

    pub(crate) fn add_watcher(&self, watcher: Weak<PollerShared>) {
        if let SocketKind::Connection(conn) = &self.kind {
            conn.add_watcher(watcher);
        }
    }
}

impl PartialEq for SrtSocket {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SrtSocket {}

impl std::hash::Hash for SrtSocket {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for SrtSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match &self.kind {
            SocketKind::Listener(_) => "listener",
            SocketKind::Connection(_) => "connection",
        };
        f.debug_struct("SrtSocket")
            .field("id", &self.id())
            .field("role", &role)
            .finish()
    }
}

/// Drive one handshake round: retransmit the request on a fixed cadence
/// and hand every handshake answer from the peer to `accept` until it
/// produces a result or the deadline passes.
fn exchange<T>(
    mux: &Arc<Multiplexer>,
    remote: SocketAddr,
    request: &Handshake,
    deadline: Instant,
    mut accept: impl FnMut(Handshake) -> Option<Result<T, TransportError>>,
) -> Result<T, TransportError> {
    let wire = ControlPacket::new(ControlType::Handshake, 0, 0, 0, request.to_bytes()).to_bytes();
    let mut buf = vec![0u8; 65536];
    let mut next_send = Instant::now();

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::ConnectTimeout);
        }
        if now >= next_send {
            mux.send_to(&wire, remote)?;
            next_send = now + HANDSHAKE_RETRANSMIT;
        }

        if let Some((n, from)) = mux.channel().recv_from(&mut buf)? {
            if from != remote {
                continue;
            }
            let Ok(Packet::Control(control)) = Packet::from_bytes(&buf[..n]) else {
                continue;
            };
            if control.control_type() != ControlType::Handshake {
                continue;
            }
            let Ok(handshake) = Handshake::from_bytes(&control.control_info) else {
                continue;
            };
            if let Some(result) = accept(handshake) {
                return result;
            }
        }
    }
}
