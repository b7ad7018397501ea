//! Client-side engine: the blocking connect attempt and the reconnecting
//! worker loop.

use crate::Core;
use srtnet_transport::{SrtSocket, TransportError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hard cap on one blocking connect attempt.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Receive wait quantum; shutdown is observed within one of these.
const RECV_WAIT: Duration = Duration::from_millis(500);

/// Floor for one reconnect cycle, so a fast rejection cannot spin the
/// worker.
const MIN_ATTEMPT_INTERVAL: Duration = Duration::from_millis(200);

/// One blocking connection attempt using the stored configuration.
pub(crate) fn connect_once(core: &Core) -> Result<SrtSocket, TransportError> {
    let Some(config) = core.client_config.read().clone() else {
        return Err(TransportError::Closed);
    };
    SrtSocket::connect(
        config.remote_addr,
        config.local_addr,
        config.options,
        CONNECT_TIMEOUT,
    )
}

/// Record a successful connect: cache the socket, flip the connected
/// flag, and deliver the connected callback.
pub(crate) fn on_connected(core: &Core, socket: &SrtSocket) {
    *core.client_socket.write() = Some(socket.clone());
    core.client_connected_flag.store(true, Ordering::Release);

    tracing::info!(
        "{}connected to server {} from {}",
        core.log_prefix,
        socket.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
        socket.local_addr()
    );
    core.dispatch_connected_to_server(socket);
}

/// Worker loop: connect (and reconnect) to the server, then receive and
/// dispatch until the link breaks or the instance stops. There is no
/// back-off beyond the connect timeout itself.
pub(crate) fn client_worker(core: Arc<Core>) {
    while core.client_active.load(Ordering::Acquire) {
        // Snapshot the cached socket before matching on it; the lock must
        // not be held across a connect attempt.
        let cached = core.client_socket.read().clone();
        let socket = match cached {
            Some(socket) => socket,
            None => {
                let attempt_started = Instant::now();
                match connect_once(&core) {
                    Ok(socket) => {
                        on_connected(&core, &socket);
                        socket
                    }
                    Err(e) => {
                        tracing::debug!("{}reconnect attempt failed: {}", core.log_prefix, e);
                        let elapsed = attempt_started.elapsed();
                        if elapsed < MIN_ATTEMPT_INTERVAL {
                            std::thread::sleep(MIN_ATTEMPT_INTERVAL - elapsed);
                        }
                        continue;
                    }
                }
            }
        };

        recv_dispatch(&core, &socket);
    }
    tracing::debug!("{}client worker stopped", core.log_prefix);
}

/// Single-socket receive loop mirroring the server event engine. Returns
/// when the socket breaks (disconnect callback delivered, socket closed,
/// reconnect allowed) or the instance stops.
fn recv_dispatch(core: &Core, socket: &SrtSocket) {
    loop {
        if !core.client_active.load(Ordering::Acquire) {
            return;
        }
        match socket.recv_timeout(RECV_WAIT) {
            Ok(Some((payload, ctrl))) => {
                let ctx = core.client_ctx.read().clone();
                core.dispatch_received(socket, payload, &ctrl, ctx.as_ref());
            }
            Ok(None) => {}
            Err(e) => {
                // Broken link, or our own stop closing the socket.
                if core.client_active.load(Ordering::Acquire) {
                    tracing::info!("{}disconnected from server: {}", core.log_prefix, e);
                    core.client_connected_flag.store(false, Ordering::Release);
                    let ctx = core.client_ctx.read().clone();
                    core.dispatch_disconnected(ctx.as_ref(), socket);
                    socket.close();
                    *core.client_socket.write() = None;
                }
                return;
            }
        }
    }
}
