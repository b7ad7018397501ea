//! Per-socket traffic statistics.
//!
//! Counters cover data packets only; handshake and housekeeping control
//! traffic is not counted. Totals are monotonic for the life of the
//! socket. The trace window is a second set of counters reset whenever a
//! snapshot is taken with `clear`.

use parking_lot::Mutex;
use std::time::Instant;

/// Snapshot of one socket's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocketStats {
    /// Data packets sent since the socket was created.
    pub pkt_sent_total: u64,
    /// Data packets received since the socket was created.
    pub pkt_recv_total: u64,
    pub bytes_sent_total: u64,
    pub bytes_recv_total: u64,
    /// Packets skipped by the reorder window (counted as lost).
    pub pkt_recv_dropped_total: u64,
    /// Duplicate or too-late packets discarded.
    pub pkt_recv_belated_total: u64,

    /// Trace-window counters, reset by a clearing snapshot.
    pub pkt_sent: u64,
    pub pkt_recv: u64,
    pub bytes_sent: u64,
    pub bytes_recv: u64,

    /// Send rate in Mbps: over the trace window when instantaneous,
    /// over the socket lifetime otherwise.
    pub mbps_send_rate: f64,
    /// Receive rate in Mbps, same windows as the send rate.
    pub mbps_recv_rate: f64,
}

#[derive(Debug)]
struct TrackerInner {
    created: Instant,
    window_start: Instant,
    pkt_sent_total: u64,
    pkt_recv_total: u64,
    bytes_sent_total: u64,
    bytes_recv_total: u64,
    pkt_sent: u64,
    pkt_recv: u64,
    bytes_sent: u64,
    bytes_recv: u64,
}

/// Internal counter store updated from the send path and the reader
/// thread.
#[derive(Debug)]
pub(crate) struct StatsTracker {
    inner: Mutex<TrackerInner>,
}

impl StatsTracker {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        StatsTracker {
            inner: Mutex::new(TrackerInner {
                created: now,
                window_start: now,
                pkt_sent_total: 0,
                pkt_recv_total: 0,
                bytes_sent_total: 0,
                bytes_recv_total: 0,
                pkt_sent: 0,
                pkt_recv: 0,
                bytes_sent: 0,
                bytes_recv: 0,
            }),
        }
    }

    pub(crate) fn on_sent(&self, bytes: usize) {
        let mut inner = self.inner.lock();
        inner.pkt_sent_total += 1;
        inner.bytes_sent_total += bytes as u64;
        inner.pkt_sent += 1;
        inner.bytes_sent += bytes as u64;
    }

    pub(crate) fn on_received(&self, bytes: usize) {
        let mut inner = self.inner.lock();
        inner.pkt_recv_total += 1;
        inner.bytes_recv_total += bytes as u64;
        inner.pkt_recv += 1;
        inner.bytes_recv += bytes as u64;
    }

    pub(crate) fn snapshot(
        &self,
        clear: bool,
        instantaneous: bool,
        dropped: u64,
        belated: u64,
    ) -> SocketStats {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let (send_window, recv_window, elapsed) = if instantaneous {
            (
                inner.bytes_sent,
                inner.bytes_recv,
                now.duration_since(inner.window_start),
            )
        } else {
            (
                inner.bytes_sent_total,
                inner.bytes_recv_total,
                now.duration_since(inner.created),
            )
        };
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);

        let stats = SocketStats {
            pkt_sent_total: inner.pkt_sent_total,
            pkt_recv_total: inner.pkt_recv_total,
            bytes_sent_total: inner.bytes_sent_total,
            bytes_recv_total: inner.bytes_recv_total,
            pkt_recv_dropped_total: dropped,
            pkt_recv_belated_total: belated,
            pkt_sent: inner.pkt_sent,
            pkt_recv: inner.pkt_recv,
            bytes_sent: inner.bytes_sent,
            bytes_recv: inner.bytes_recv,
            mbps_send_rate: send_window as f64 * 8.0 / secs / 1_000_000.0,
            mbps_recv_rate: recv_window as f64 * 8.0 / secs / 1_000_000.0,
        };

        if clear {
            inner.pkt_sent = 0;
            inner.pkt_recv = 0;
            inner.bytes_sent = 0;
            inner.bytes_recv = 0;
            inner.window_start = now;
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate() {
        let tracker = StatsTracker::new();
        tracker.on_sent(100);
        tracker.on_sent(200);
        tracker.on_received(50);

        let stats = tracker.snapshot(false, false, 0, 0);
        assert_eq!(stats.pkt_sent_total, 2);
        assert_eq!(stats.bytes_sent_total, 300);
        assert_eq!(stats.pkt_recv_total, 1);
        assert_eq!(stats.bytes_recv_total, 50);
    }

    #[test]
    fn clear_resets_trace_window_only() {
        let tracker = StatsTracker::new();
        tracker.on_sent(100);

        let first = tracker.snapshot(true, true, 0, 0);
        assert_eq!(first.pkt_sent, 1);

        tracker.on_sent(100);
        let second = tracker.snapshot(false, true, 0, 0);
        assert_eq!(second.pkt_sent, 1);
        assert_eq!(second.pkt_sent_total, 2);
    }
}
