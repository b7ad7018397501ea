//! Server-side engine loops.
//!
//! Multi-client mode runs two threads: the acceptor drives the blocking
//! accept loop and the event engine turns poller readiness into user
//! callbacks. Single-client mode runs one worker that alternates between
//! accepting a single validated client and serving it until it goes
//! away, tearing the listener down in between.

use crate::config::ResolvedServer;
use crate::Core;
use srtnet_transport::{EventKind, SrtSocket, TransportError};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Poller wait quantum; shutdown is observed within one of these.
pub(crate) const EPOLL_WAIT: Duration = Duration::from_millis(500);

/// Events harvested per poller wait. More ready sockets than this are
/// picked up on the next wait.
pub(crate) const MAX_EVENTS_PER_WAIT: usize = 5;

/// Accept wait quantum.
const ACCEPT_WAIT: Duration = Duration::from_millis(500);

/// Blocking accept loop for multi-client mode.
pub(crate) fn acceptor_loop(core: Arc<Core>) {
    while core.server_active.load(Ordering::Acquire) {
        let Some(listener) = core.listener() else {
            break;
        };

        match listener.accept(ACCEPT_WAIT) {
            Ok(Some((socket, peer))) => {
                handle_accept(&core, socket, peer);
            }
            Ok(None) => {}
            Err(TransportError::Closed) => break,
            Err(e) => {
                tracing::warn!("{}accept failed: {}", core.log_prefix, e);
            }
        }
    }
    tracing::debug!("{}acceptor stopped", core.log_prefix);
}

/// Validate one accepted connection and wire it into the registry and
/// poller, or close it.
///
/// Returns true when the connection was admitted.
fn handle_accept(core: &Core, socket: SrtSocket, peer: SocketAddr) -> bool {
    match core.on_client_connected(peer, &socket) {
        Some(ctx) => {
            core.registry.insert(socket.clone(), ctx);
            if let Some(poller) = core.poller() {
                poller.add(&socket);
            }
            tracing::info!(
                "{}client {} connected on socket {}",
                core.log_prefix,
                peer,
                socket.id()
            );
            true
        }
        None => {
            tracing::info!("{}client {} rejected by application", core.log_prefix, peer);
            socket.close();
            false
        }
    }
}

/// Event engine: poll, receive one message per readable socket, tear
/// down broken ones. With `single_client` it returns once the lone
/// connection is gone.
pub(crate) fn event_loop(core: Arc<Core>, single_client: bool) {
    let Some(poller) = core.poller() else {
        return;
    };

    while core.server_active.load(Ordering::Acquire) {
        let events = poller.wait(EPOLL_WAIT, MAX_EVENTS_PER_WAIT);
        for event in events {
            if !core.server_active.load(Ordering::Acquire) {
                break;
            }
            match event.kind {
                EventKind::Readable => match event.socket.try_recv() {
                    Ok(Some((payload, ctrl))) => {
                        // A socket torn down earlier in this batch has no
                        // registry entry anymore; its leftover data is
                        // dropped with it.
                        if let Some(ctx) = core.registry.get(&event.socket) {
                            core.dispatch_received(&event.socket, payload, &ctrl, Some(&ctx));
                        }
                    }
                    Ok(None) => {}
                    Err(_) => teardown(&core, &event.socket),
                },
                EventKind::Broken => teardown(&core, &event.socket),
            }
        }

        if single_client && core.registry.is_empty() {
            break;
        }
    }
    tracing::debug!("{}event engine stopped", core.log_prefix);
}

/// Remove a faulty socket from the poller and registry, deliver the
/// disconnect callback outside the registry lock, then close the socket.
fn teardown(core: &Core, socket: &SrtSocket) {
    if let Some(poller) = core.poller() {
        poller.remove(socket);
    }
    let Some(ctx) = core.registry.remove(socket) else {
        // Already torn down by a duplicate event.
        return;
    };

    tracing::info!(
        "{}client {} disconnected from socket {}",
        core.log_prefix,
        socket
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "?".to_string()),
        socket.id()
    );
    core.dispatch_disconnected(Some(&ctx), socket);
    socket.close();
}

/// Combined worker for single-client mode: accept one validated client,
/// close the listener, serve the client inline until it disconnects, then
/// relisten.
pub(crate) fn single_client_worker(core: Arc<Core>) {
    let mut first_cycle = true;

    while core.server_active.load(Ordering::Acquire) {
        let listener = if first_cycle {
            // The listener from start_server; bind errors already
            // surfaced there.
            core.listener()
        } else {
            relisten(&core)
        };
        first_cycle = false;

        let Some(listener) = listener else {
            if core.server_active.load(Ordering::Acquire) {
                continue;
            }
            break;
        };

        if !accept_one(&core, &listener) {
            listener.close();
            break;
        }
        listener.close();

        event_loop(core.clone(), true);
    }
    tracing::debug!("{}single-client worker stopped", core.log_prefix);
}

/// Recreate the listening socket on the pinned local endpoint.
fn relisten(core: &Core) -> Option<SrtSocket> {
    let ResolvedServer {
        local_addr,
        options,
        ..
    } = core.server_config.read().clone()?;

    match SrtSocket::listen(local_addr, options) {
        Ok(listener) => {
            *core.bound_socket.write() = Some(listener.clone());
            tracing::debug!("{}listening again on {}", core.log_prefix, local_addr);
            Some(listener)
        }
        Err(e) => {
            tracing::warn!("{}failed to relisten on {}: {}", core.log_prefix, local_addr, e);
            // The previous port owner may still be winding down.
            std::thread::sleep(Duration::from_millis(100));
            None
        }
    }
}

/// Accept until one connection passes validation. Returns false when the
/// server is shutting down.
fn accept_one(core: &Core, listener: &SrtSocket) -> bool {
    loop {
        if !core.server_active.load(Ordering::Acquire) {
            return false;
        }
        match listener.accept(ACCEPT_WAIT) {
            Ok(Some((socket, peer))) => {
                if handle_accept(core, socket, peer) {
                    return true;
                }
            }
            Ok(None) => {}
            Err(TransportError::Closed) => return false,
            Err(e) => {
                tracing::warn!("{}accept failed: {}", core.log_prefix, e);
            }
        }
    }
}
