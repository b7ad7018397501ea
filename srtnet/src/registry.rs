//! Connection registry.
//!
//! Maps accepted socket handles to their per-connection user contexts.
//! Every operation holds one mutex; user callbacks are never invoked
//! under it. Removal hands the context back so the caller can deliver the
//! disconnect callback outside the lock, exactly once.

use crate::NetworkConnection;
use parking_lot::Mutex;
use srtnet_transport::SrtSocket;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<u32, (SrtSocket, Arc<NetworkConnection>)>>,
}

impl Registry {
    pub(crate) fn insert(&self, socket: SrtSocket, ctx: Arc<NetworkConnection>) {
        self.entries.lock().insert(socket.id(), (socket, ctx));
    }

    pub(crate) fn remove(&self, socket: &SrtSocket) -> Option<Arc<NetworkConnection>> {
        self.entries.lock().remove(&socket.id()).map(|(_, ctx)| ctx)
    }

    pub(crate) fn get(&self, socket: &SrtSocket) -> Option<Arc<NetworkConnection>> {
        self.entries
            .lock()
            .get(&socket.id())
            .map(|(_, ctx)| ctx.clone())
    }

    /// Look a handle up by id, returning the registered socket.
    pub(crate) fn get_socket(&self, id: u32) -> Option<SrtSocket> {
        self.entries.lock().get(&id).map(|(socket, _)| socket.clone())
    }

    pub(crate) fn snapshot(&self) -> Vec<(SrtSocket, Arc<NetworkConnection>)> {
        self.entries.lock().values().cloned().collect()
    }

    pub(crate) fn sockets(&self) -> Vec<SrtSocket> {
        self.entries
            .lock()
            .values()
            .map(|(socket, _)| socket.clone())
            .collect()
    }

    /// Drain every entry, handing them back for teardown.
    pub(crate) fn clear(&self) -> Vec<(SrtSocket, Arc<NetworkConnection>)> {
        self.entries.lock().drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
