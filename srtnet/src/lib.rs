//! A thin, opinionated façade over an SRT-style media transport.
//!
//! An [`SrtNet`] instance runs in one of three modes. As a server it
//! stands up a listener and accepts one or many concurrent peers; as a
//! client it connects to a listener and transparently reconnects when the
//! link drops. Either way the application exchanges discrete messages and
//! receives per-connection callbacks from a single event-engine thread:
//! `client_connected` happens before any data delivery for a socket, and
//! `client_disconnected` is delivered exactly once after it.
//!
//! Callbacks run on the engine threads; calling [`SrtNet::stop`] from
//! inside a callback of the same instance deadlocks and is not supported.

mod client;
mod config;
mod error;
mod registry;
mod server;

pub use config::{ClientConfig, ServerConfig};
pub use error::Error;
pub use srtnet_transport::{
    version_string, MessageBoundary, MsgCtrl, SocketStats, SrtSocket, MAX_PAYLOAD_SIZE,
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use registry::Registry;
use srtnet_transport::{Poller, TransportError};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Operating mode of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unknown,
    Server,
    Client,
}

/// Opaque per-connection user context.
///
/// The application attaches one of these at connect time and gets the
/// same object back on every event for that socket, until the disconnect
/// callback for the socket has returned. The payload is type-erased; the
/// application downcasts on its own terms.
pub struct NetworkConnection {
    /// The application's payload.
    pub object: Box<dyn Any + Send + Sync>,
}

impl NetworkConnection {
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        NetworkConnection {
            object: Box::new(object),
        }
    }

    /// Borrow the payload as `T`, if that is what was stored.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref()
    }
}

impl Default for NetworkConnection {
    fn default() -> Self {
        NetworkConnection::new(())
    }
}

impl std::fmt::Debug for NetworkConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConnection").finish_non_exhaustive()
    }
}

/// Facts about a peer, fetched when a connection is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInformation {
    /// The peer's protocol version, or "n/a" when unknown.
    pub peer_srt_version: String,
    /// The latency negotiated with the peer, or -1 when unknown.
    pub negotiated_latency_ms: i32,
}

impl Default for ConnectionInformation {
    fn default() -> Self {
        ConnectionInformation {
            peer_srt_version: "n/a".to_string(),
            negotiated_latency_ms: -1,
        }
    }
}

impl ConnectionInformation {
    fn from_socket(socket: &SrtSocket) -> Self {
        let info = socket.connection_info();
        let mut result = ConnectionInformation::default();
        if info.peer_srt_version != 0 {
            result.peer_srt_version = version_string(info.peer_srt_version);
        }
        result.negotiated_latency_ms = info.negotiated_latency_ms;
        result
    }
}

type ClientConnectedCb = Arc<
    dyn Fn(
            SocketAddr,
            &SrtSocket,
            Option<&Arc<NetworkConnection>>,
            &ConnectionInformation,
        ) -> Option<Arc<NetworkConnection>>
        + Send
        + Sync,
>;
type ReceivedDataCb =
    Arc<dyn Fn(Bytes, &MsgCtrl, Option<&Arc<NetworkConnection>>, &SrtSocket) + Send + Sync>;
type ReceivedDataNoCopyCb =
    Arc<dyn Fn(&[u8], &MsgCtrl, Option<&Arc<NetworkConnection>>, &SrtSocket) + Send + Sync>;
type ClientDisconnectedCb =
    Arc<dyn Fn(Option<&Arc<NetworkConnection>>, &SrtSocket) + Send + Sync>;
type ConnectedToServerCb =
    Arc<dyn Fn(Option<&Arc<NetworkConnection>>, &SrtSocket, &ConnectionInformation) + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    client_connected: RwLock<Option<ClientConnectedCb>>,
    received_data: RwLock<Option<ReceivedDataCb>>,
    received_data_no_copy: RwLock<Option<ReceivedDataNoCopyCb>>,
    client_disconnected: RwLock<Option<ClientDisconnectedCb>>,
    connected_to_server: RwLock<Option<ConnectedToServerCb>>,
}

pub(crate) struct Core {
    pub(crate) log_prefix: String,
    /// Serializes start/stop transitions; never held while the worker
    /// loops run.
    api_lock: Mutex<()>,
    mode: Mutex<Mode>,
    pub(crate) server_active: AtomicBool,
    pub(crate) client_active: AtomicBool,
    pub(crate) client_connected_flag: AtomicBool,
    callbacks: Callbacks,
    pub(crate) registry: Registry,
    pub(crate) poller: RwLock<Option<Poller>>,
    pub(crate) bound_socket: RwLock<Option<SrtSocket>>,
    pub(crate) client_socket: RwLock<Option<SrtSocket>>,
    pub(crate) server_ctx: RwLock<Option<Arc<NetworkConnection>>>,
    pub(crate) client_ctx: RwLock<Option<Arc<NetworkConnection>>>,
    pub(crate) server_config: RwLock<Option<config::ResolvedServer>>,
    pub(crate) client_config: RwLock<Option<config::ResolvedClient>>,
    worker_thread: Mutex<Option<JoinHandle<()>>>,
    event_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    pub(crate) fn poller(&self) -> Option<Poller> {
        self.poller.read().clone()
    }

    pub(crate) fn listener(&self) -> Option<SrtSocket> {
        self.bound_socket.read().clone()
    }

    /// Run the connect-validation callback. `None` (including a missing
    /// callback) rejects the connection.
    pub(crate) fn on_client_connected(
        &self,
        peer: SocketAddr,
        socket: &SrtSocket,
    ) -> Option<Arc<NetworkConnection>> {
        // Clone the slots first; the lock must not be held across user
        // code.
        let callback = self.callbacks.client_connected.read().clone()?;
        let info = ConnectionInformation::from_socket(socket);
        let server_ctx = self.server_ctx.read().clone();
        callback(peer, socket, server_ctx.as_ref(), &info)
    }

    /// Deliver one received message, preferring the no-copy callback when
    /// both are installed.
    pub(crate) fn dispatch_received(
        &self,
        socket: &SrtSocket,
        payload: Bytes,
        ctrl: &MsgCtrl,
        ctx: Option<&Arc<NetworkConnection>>,
    ) {
        let no_copy = self.callbacks.received_data_no_copy.read().clone();
        if let Some(callback) = no_copy {
            callback(&payload, ctrl, ctx, socket);
            return;
        }
        let owning = self.callbacks.received_data.read().clone();
        if let Some(callback) = owning {
            callback(payload, ctrl, ctx, socket);
        }
    }

    pub(crate) fn dispatch_disconnected(
        &self,
        ctx: Option<&Arc<NetworkConnection>>,
        socket: &SrtSocket,
    ) {
        let callback = self.callbacks.client_disconnected.read().clone();
        if let Some(callback) = callback {
            callback(ctx, socket);
        }
    }

    pub(crate) fn dispatch_connected_to_server(&self, socket: &SrtSocket) {
        let callback = self.callbacks.connected_to_server.read().clone();
        if let Some(callback) = callback {
            let info = ConnectionInformation::from_socket(socket);
            let ctx = self.client_ctx.read().clone();
            callback(ctx.as_ref(), socket, &info);
        }
    }
}

/// The façade instance.
///
/// Starting transitions the mode from `Unknown` to `Server` or `Client`;
/// [`SrtNet::stop`] returns it to `Unknown` and is idempotent. Dropping
/// the instance stops it.
pub struct SrtNet {
    core: Arc<Core>,
}

impl Default for SrtNet {
    fn default() -> Self {
        SrtNet::new()
    }
}

impl SrtNet {
    pub fn new() -> Self {
        SrtNet::with_log_prefix("")
    }

    /// Create an instance whose own log lines carry `log_prefix`. Lines
    /// emitted by the transport are not affected.
    pub fn with_log_prefix(log_prefix: &str) -> Self {
        SrtNet {
            core: Arc::new(Core {
                log_prefix: log_prefix.to_string(),
                api_lock: Mutex::new(()),
                mode: Mutex::new(Mode::Unknown),
                server_active: AtomicBool::new(false),
                client_active: AtomicBool::new(false),
                client_connected_flag: AtomicBool::new(false),
                callbacks: Callbacks::default(),
                registry: Registry::default(),
                poller: RwLock::new(None),
                bound_socket: RwLock::new(None),
                client_socket: RwLock::new(None),
                server_ctx: RwLock::new(None),
                client_ctx: RwLock::new(None),
                server_config: RwLock::new(None),
                client_config: RwLock::new(None),
                worker_thread: Mutex::new(None),
                event_thread: Mutex::new(None),
            }),
        }
    }

    // --- callback installation -------------------------------------------

    /// Install the connect-validation callback (server mode, required).
    /// Returning `None` rejects the connection; it is closed and never
    /// enters the registry.
    pub fn set_client_connected_callback<F>(&self, callback: F)
    where
        F: Fn(
                SocketAddr,
                &SrtSocket,
                Option<&Arc<NetworkConnection>>,
                &ConnectionInformation,
            ) -> Option<Arc<NetworkConnection>>
            + Send
            + Sync
            + 'static,
    {
        *self.core.callbacks.client_connected.write() = Some(Arc::new(callback));
    }

    /// Install the owning data callback. Ignored for delivery while a
    /// no-copy callback is also installed.
    pub fn set_received_data_callback<F>(&self, callback: F)
    where
        F: Fn(Bytes, &MsgCtrl, Option<&Arc<NetworkConnection>>, &SrtSocket) + Send + Sync + 'static,
    {
        *self.core.callbacks.received_data.write() = Some(Arc::new(callback));
    }

    /// Install the borrowing data callback. The payload reference is only
    /// valid for the duration of the call and must not escape it.
    pub fn set_received_data_no_copy_callback<F>(&self, callback: F)
    where
        F: Fn(&[u8], &MsgCtrl, Option<&Arc<NetworkConnection>>, &SrtSocket) + Send + Sync + 'static,
    {
        *self.core.callbacks.received_data_no_copy.write() = Some(Arc::new(callback));
    }

    /// Install the disconnect callback (server and client mode).
    pub fn set_client_disconnected_callback<F>(&self, callback: F)
    where
        F: Fn(Option<&Arc<NetworkConnection>>, &SrtSocket) + Send + Sync + 'static,
    {
        *self.core.callbacks.client_disconnected.write() = Some(Arc::new(callback));
    }

    /// Install the connected callback (client mode).
    pub fn set_connected_to_server_callback<F>(&self, callback: F)
    where
        F: Fn(Option<&Arc<NetworkConnection>>, &SrtSocket, &ConnectionInformation)
            + Send
            + Sync
            + 'static,
    {
        *self.core.callbacks.connected_to_server.write() = Some(Arc::new(callback));
    }

    // --- lifecycle -------------------------------------------------------

    /// Start a server. Fails without a `client_connected` callback, on a
    /// bad configuration, or when the local endpoint cannot be bound.
    pub fn start_server(
        &self,
        config: ServerConfig,
        ctx: Option<Arc<NetworkConnection>>,
    ) -> Result<(), Error> {
        let core = &self.core;
        let _guard = core.api_lock.lock();

        if *core.mode.lock() != Mode::Unknown {
            return Err(Error::ConfigurationRejected(
                "instance is already started".to_string(),
            ));
        }
        if core.callbacks.client_connected.read().is_none() {
            return Err(Error::ConfigurationRejected(
                "the client_connected callback is required".to_string(),
            ));
        }

        let mut resolved = config::resolve_server(&config)?;
        let listener = SrtSocket::listen(resolved.local_addr, resolved.options.clone())
            .map_err(|e| match e {
                TransportError::InvalidOption(msg) => Error::ConfigurationRejected(msg),
                TransportError::Io(_) => Error::BindFailed,
                _ => Error::ListenFailed,
            })?;
        // Port 0 binds must re-listen on the same port in single-client
        // mode, so pin the actual one.
        resolved.local_addr = listener.local_addr();

        let single_client = resolved.single_client;
        *core.server_ctx.write() = ctx;
        *core.server_config.write() = Some(resolved);
        *core.bound_socket.write() = Some(listener.clone());
        *core.poller.write() = Some(Poller::new());
        core.server_active.store(true, Ordering::Release);
        *core.mode.lock() = Mode::Server;

        tracing::info!(
            "{}server listening on {} (single_client: {})",
            core.log_prefix,
            listener.local_addr(),
            single_client
        );

        if single_client {
            let worker = Arc::clone(core);
            *core.worker_thread.lock() = Some(std::thread::spawn(move || {
                server::single_client_worker(worker);
            }));
        } else {
            let acceptor = Arc::clone(core);
            *core.worker_thread.lock() = Some(std::thread::spawn(move || {
                server::acceptor_loop(acceptor);
            }));
            let engine = Arc::clone(core);
            *core.event_thread.lock() = Some(std::thread::spawn(move || {
                server::event_loop(engine, false);
            }));
        }
        Ok(())
    }

    /// Start a client towards `remote_host:remote_port`, binding an
    /// OS-chosen local endpoint.
    pub fn start_client(
        &self,
        config: ClientConfig,
        ctx: Option<Arc<NetworkConnection>>,
    ) -> Result<(), Error> {
        self.start_client_impl(config, None, ctx)
    }

    /// Start a client with an explicit local bind address. A local port
    /// of 0 lets the OS pick one.
    pub fn start_client_with_bind(
        &self,
        config: ClientConfig,
        local_host: &str,
        local_port: u16,
        ctx: Option<Arc<NetworkConnection>>,
    ) -> Result<(), Error> {
        self.start_client_impl(config, Some((local_host.to_string(), local_port)), ctx)
    }

    fn start_client_impl(
        &self,
        config: ClientConfig,
        local: Option<(String, u16)>,
        ctx: Option<Arc<NetworkConnection>>,
    ) -> Result<(), Error> {
        let core = &self.core;
        let _guard = core.api_lock.lock();

        if *core.mode.lock() != Mode::Unknown {
            return Err(Error::ConfigurationRejected(
                "instance is already started".to_string(),
            ));
        }

        let resolved =
            config::resolve_client(&config, local.as_ref().map(|(h, p)| (h.as_str(), *p)))?;
        let fail_on_connection_error = resolved.fail_on_connection_error;

        *core.client_ctx.write() = ctx;
        *core.client_config.write() = Some(resolved);

        // The first attempt is always synchronous: resolution errors and
        // handshake rejections (a mismatched pre-shared key) fail the
        // call regardless of the retry flag.
        match client::connect_once(core) {
            Ok(socket) => {
                core.client_active.store(true, Ordering::Release);
                *core.mode.lock() = Mode::Client;
                client::on_connected(core, &socket);
            }
            Err(TransportError::ConnectionRejected(reason)) => {
                tracing::info!(
                    "{}connection rejected by server: {:?}",
                    core.log_prefix,
                    reason
                );
                *core.client_config.write() = None;
                *core.client_ctx.write() = None;
                return Err(Error::ConnectFailed);
            }
            Err(e) if fail_on_connection_error => {
                tracing::info!("{}failed to connect to server: {}", core.log_prefix, e);
                *core.client_config.write() = None;
                *core.client_ctx.write() = None;
                return Err(Error::ConnectFailed);
            }
            Err(e) => {
                tracing::debug!(
                    "{}initial connect failed, retrying in the background: {}",
                    core.log_prefix,
                    e
                );
                core.client_active.store(true, Ordering::Release);
                *core.mode.lock() = Mode::Client;
            }
        }

        let worker = Arc::clone(core);
        *core.worker_thread.lock() = Some(std::thread::spawn(move || {
            client::client_worker(worker);
        }));
        Ok(())
    }

    /// Stop the instance. Safe to call in any mode, any number of times.
    /// Returns the instance to `Unknown` mode.
    pub fn stop(&self) -> bool {
        let core = &self.core;
        let _guard = core.api_lock.lock();

        let mode = *core.mode.lock();
        match mode {
            Mode::Unknown => return true,
            Mode::Server => {
                core.server_active.store(false, Ordering::Release);
                if let Some(listener) = core.bound_socket.write().take() {
                    listener.close();
                }
                join(&core.worker_thread);
                join(&core.event_thread);
                // A single-client worker may have re-listened while stop
                // was in flight; it closed that listener on exit.
                *core.bound_socket.write() = None;

                // Drain the registry and deliver the disconnects outside
                // the lock.
                for (socket, ctx) in core.registry.clear() {
                    core.dispatch_disconnected(Some(&ctx), &socket);
                    socket.close();
                }
                *core.poller.write() = None;
                *core.server_config.write() = None;
                *core.server_ctx.write() = None;
            }
            Mode::Client => {
                core.client_active.store(false, Ordering::Release);
                core.client_connected_flag.store(false, Ordering::Release);
                if let Some(socket) = core.client_socket.write().take() {
                    socket.close();
                }
                join(&core.worker_thread);
                *core.client_config.write() = None;
                *core.client_ctx.write() = None;
            }
        }

        *core.mode.lock() = Mode::Unknown;
        tracing::info!("{}stopped", core.log_prefix);
        true
    }

    // --- data path -------------------------------------------------------

    /// Send one message. In server mode `target` picks the destination
    /// socket; in client mode it is ignored. Oversize payloads fail fast
    /// without touching the socket.
    pub fn send_data(
        &self,
        data: &[u8],
        ctrl: &mut MsgCtrl,
        target: Option<&SrtSocket>,
    ) -> Result<(), Error> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let socket = match *self.core.mode.lock() {
            Mode::Server => {
                let target = target.ok_or(Error::SendFailed)?;
                self.core
                    .registry
                    .get_socket(target.id())
                    .ok_or(Error::SendFailed)?
            }
            Mode::Client => {
                if !self.core.client_connected_flag.load(Ordering::Acquire) {
                    return Err(Error::SendFailed);
                }
                self.core.client_socket.read().clone().ok_or(Error::SendFailed)?
            }
            Mode::Unknown => return Err(Error::SendFailed),
        };

        socket.send(data, ctrl).map_err(|e| match e {
            TransportError::PayloadTooLarge { size, max } => Error::MessageTooLarge { size, max },
            _ => Error::SendFailed,
        })
    }

    /// Connection statistics for `target` (server mode) or the connected
    /// server (client mode). `clear` resets the trace window;
    /// `instantaneous` selects current rather than smoothed rates.
    pub fn statistics(
        &self,
        clear: bool,
        instantaneous: bool,
        target: Option<&SrtSocket>,
    ) -> Option<SocketStats> {
        let socket = match *self.core.mode.lock() {
            Mode::Server => self.core.registry.get_socket(target?.id())?,
            Mode::Client => self.core.client_socket.read().clone()?,
            Mode::Unknown => return None,
        };
        socket.statistics(clear, instantaneous)
    }

    // --- introspection ---------------------------------------------------

    /// Snapshot of all active clients and their contexts (server mode).
    pub fn active_clients(&self) -> Vec<(SrtSocket, Arc<NetworkConnection>)> {
        self.core.registry.snapshot()
    }

    /// Snapshot of all active client sockets (server mode).
    pub fn active_client_sockets(&self) -> Vec<SrtSocket> {
        self.core.registry.sockets()
    }

    /// The connected server's socket and the client context, when in
    /// client mode and connected.
    pub fn connected_server(&self) -> Option<(SrtSocket, Option<Arc<NetworkConnection>>)> {
        if !self.core.client_connected_flag.load(Ordering::Acquire) {
            return None;
        }
        let socket = self.core.client_socket.read().clone()?;
        Some((socket, self.core.client_ctx.read().clone()))
    }

    /// Whether the client is currently connected to the remote end.
    /// Always false in server mode.
    pub fn is_connected_to_server(&self) -> bool {
        self.core.client_connected_flag.load(Ordering::Acquire)
    }

    /// The bound socket: the listener in server mode, the caller socket
    /// in client mode.
    pub fn bound_socket(&self) -> Option<SrtSocket> {
        if let Some(listener) = self.core.bound_socket.read().clone() {
            return Some(listener);
        }
        self.core.client_socket.read().clone()
    }

    /// The locally bound port, or 0 when nothing is bound. Reports the
    /// OS-assigned port after starting with local port 0.
    pub fn locally_bound_port(&self) -> u16 {
        self.bound_socket()
            .map(|socket| socket.local_addr().port())
            .unwrap_or(0)
    }

    /// Current operating mode.
    pub fn current_mode(&self) -> Mode {
        *self.core.mode.lock()
    }
}

impl Drop for SrtNet {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join(slot: &Mutex<Option<JoinHandle<()>>>) {
    if let Some(handle) = slot.lock().take() {
        let _ = handle.join();
    }
}
