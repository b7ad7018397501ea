//! Readiness poller.
//!
//! Tracks a set of connection sockets and reports which became readable
//! or broken. Waits are bounded by the caller's timeout and wake early
//! when a registered socket changes state, so cancellation is observed
//! within one quantum.

use crate::socket::{EventKind, SrtSocket};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One readiness report.
#[derive(Debug, Clone)]
pub struct Event {
    pub socket: SrtSocket,
    pub kind: EventKind,
}

#[derive(Default)]
pub(crate) struct PollerShared {
    registered: Mutex<HashMap<u32, SrtSocket>>,
    cv: Condvar,
}

impl PollerShared {
    pub(crate) fn notify(&self) {
        self.cv.notify_all();
    }
}

/// Multi-socket readiness poller.
///
/// Clones share the same registration set.
#[derive(Clone, Default)]
pub struct Poller {
    shared: Arc<PollerShared>,
}

impl Poller {
    pub fn new() -> Self {
        Poller::default()
    }

    /// Register a socket. Re-adding an already registered socket is a
    /// no-op.
    pub fn add(&self, socket: &SrtSocket) {
        socket.add_watcher(Arc::downgrade(&self.shared));
        self.shared
            .registered
            .lock()
            .insert(socket.id(), socket.clone());
        self.shared.cv.notify_all();
    }

    /// Unregister a socket. Removing an unknown socket is a no-op.
    pub fn remove(&self, socket: &SrtSocket) {
        self.shared.registered.lock().remove(&socket.id());
    }

    /// Currently registered sockets.
    pub fn sockets(&self) -> Vec<SrtSocket> {
        self.shared.registered.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.registered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for readiness, reporting at most
    /// `max_events` sockets. Whatever is not reported now is picked up by
    /// the next wait.
    pub fn wait(&self, timeout: Duration, max_events: usize) -> Vec<Event> {
        let deadline = Instant::now() + timeout;
        let mut registered = self.shared.registered.lock();

        loop {
            let events = scan(&registered, max_events);
            if !events.is_empty() {
                return events;
            }
            if Instant::now() >= deadline
                || self
                    .shared
                    .cv
                    .wait_until(&mut registered, deadline)
                    .timed_out()
            {
                return scan(&registered, max_events);
            }
        }
    }
}

fn scan(registered: &HashMap<u32, SrtSocket>, max_events: usize) -> Vec<Event> {
    let mut events = Vec::new();
    for socket in registered.values() {
        if let Some(kind) = socket.readiness() {
            events.push(Event {
                socket: socket.clone(),
                kind,
            });
            if events.len() >= max_events {
                break;
            }
        }
    }
    events
}
