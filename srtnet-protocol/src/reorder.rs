//! Receive-side reorder window.
//!
//! Data packets are delivered to the application in sequence order. Out of
//! order arrivals are parked until the gap fills; once more packets are
//! parked than the configured tolerance, the gap is treated as loss and
//! delivery skips ahead. A tolerance of zero delivers in arrival order
//! with no waiting.

use crate::packet::DataPacket;
use crate::sequence::SeqNumber;
use std::collections::{BTreeMap, VecDeque};

/// Reorder window over one connection's incoming data packets.
#[derive(Debug)]
pub struct ReorderWindow {
    tolerance: usize,
    next: Option<SeqNumber>,
    parked: BTreeMap<u32, DataPacket>,
    ready: VecDeque<DataPacket>,
    skipped: u64,
    belated: u64,
}

impl ReorderWindow {
    pub fn new(tolerance: usize) -> Self {
        ReorderWindow {
            tolerance,
            next: None,
            parked: BTreeMap::new(),
            ready: VecDeque::new(),
            skipped: 0,
            belated: 0,
        }
    }

    /// Accept an incoming packet. Anything that became deliverable can be
    /// drained with [`ReorderWindow::next_ready`].
    pub fn push(&mut self, packet: DataPacket) {
        let seq = packet.seq_number();
        let next = match self.next {
            Some(next) => next,
            None => {
                // First packet pins the window.
                self.next = Some(seq);
                seq
            }
        };

        if seq == next {
            self.ready.push_back(packet);
            self.next = Some(next.next());
            self.drain_contiguous();
            return;
        }

        if seq.precedes(next) {
            // Duplicate or arrived after its gap was skipped.
            self.belated += 1;
            return;
        }

        self.parked.insert(seq.as_raw(), packet);
        if self.parked.len() > self.tolerance {
            self.skip_gap();
        }
    }

    /// Next in-order packet, if one is deliverable.
    pub fn next_ready(&mut self) -> Option<DataPacket> {
        self.ready.pop_front()
    }

    /// Packets given up on because the window filled.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Duplicates and too-late arrivals dropped.
    pub fn belated(&self) -> u64 {
        self.belated
    }

    fn drain_contiguous(&mut self) {
        while let Some(next) = self.next {
            match self.parked.remove(&next.as_raw()) {
                Some(packet) => {
                    self.ready.push_back(packet);
                    self.next = Some(next.next());
                }
                None => break,
            }
        }
    }

    fn skip_gap(&mut self) {
        let Some(next) = self.next else { return };
        // Everything parked is ahead of `next`; jump to the oldest parked
        // packet and count the gap as lost.
        let Some(&lowest_raw) = self.parked.keys().next() else {
            return;
        };
        let lowest = SeqNumber::new_unchecked(lowest_raw);
        let gap = next.distance_to(lowest).max(0) as u64;
        self.skipped += gap;
        self.next = Some(lowest);
        self.drain_contiguous();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MessageFlags;
    use bytes::Bytes;

    fn packet(seq: u32) -> DataPacket {
        DataPacket::new(
            SeqNumber::new(seq),
            MessageFlags::new(seq),
            0,
            0,
            Bytes::from(format!("packet {seq}")),
        )
    }

    fn drain(window: &mut ReorderWindow) -> Vec<u32> {
        let mut seqs = Vec::new();
        while let Some(p) = window.next_ready() {
            seqs.push(p.seq_number().as_raw());
        }
        seqs
    }

    #[test]
    fn in_order_passthrough() {
        let mut window = ReorderWindow::new(4);
        for seq in 0..5 {
            window.push(packet(seq));
        }
        assert_eq!(drain(&mut window), vec![0, 1, 2, 3, 4]);
        assert_eq!(window.skipped(), 0);
    }

    #[test]
    fn reordered_within_tolerance() {
        let mut window = ReorderWindow::new(4);
        window.push(packet(0));
        window.push(packet(2));
        window.push(packet(3));
        assert_eq!(drain(&mut window), vec![0]);

        window.push(packet(1));
        assert_eq!(drain(&mut window), vec![1, 2, 3]);
        assert_eq!(window.skipped(), 0);
    }

    #[test]
    fn gap_skipped_when_window_fills() {
        let mut window = ReorderWindow::new(2);
        window.push(packet(0));
        // Packet 1 never arrives.
        window.push(packet(2));
        window.push(packet(3));
        window.push(packet(4));

        assert_eq!(drain(&mut window), vec![0, 2, 3, 4]);
        assert_eq!(window.skipped(), 1);
    }

    #[test]
    fn belated_duplicate_dropped() {
        let mut window = ReorderWindow::new(4);
        window.push(packet(0));
        window.push(packet(1));
        window.push(packet(0));

        assert_eq!(drain(&mut window), vec![0, 1]);
        assert_eq!(window.belated(), 1);
    }

    #[test]
    fn zero_tolerance_skips_immediately() {
        let mut window = ReorderWindow::new(0);
        window.push(packet(0));
        window.push(packet(5));

        assert_eq!(drain(&mut window), vec![0, 5]);
        assert_eq!(window.skipped(), 4);
    }
}
