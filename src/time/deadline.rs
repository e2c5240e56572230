//! One-shot deadline set keyed on the monotonic clock.
//!
//! Backs the loop's `run_at`/`run_after` operations. Deadlines live in a
//! min-heap ordered by expiry then insertion, so callbacks for the same
//! instant fire in submission order. This set is separate from the timer
//! wheel: it trades the wheel's throughput for exact monotonic deadlines.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

use crate::error::Error;

pub(crate) type DeadlineHandler = Box<dyn FnOnce(Error)>;

struct DeadlineEntry {
    at: Instant,
    seq: u64,
    handler: DeadlineHandler,
}

impl PartialEq for DeadlineEntry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for DeadlineEntry {}

impl PartialOrd for DeadlineEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeadlineEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: earliest deadline, then earliest entry.
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending one-shot deadlines.
#[derive(Default)]
pub(crate) struct DeadlineSet {
    entries: BinaryHeap<DeadlineEntry>,
    seq: u64,
}

impl DeadlineSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, handler: DeadlineHandler, at: Instant) {
        let seq = self.seq;
        self.seq += 1;
        self.entries.push(DeadlineEntry { at, seq, handler });
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.peek().map(|entry| entry.at)
    }

    /// Removes and returns every handler whose deadline has passed, in
    /// deadline order.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Vec<DeadlineHandler> {
        let mut due = Vec::new();
        while self.entries.peek().is_some_and(|entry| entry.at <= now) {
            if let Some(entry) = self.entries.pop() {
                due.push(entry.handler);
            }
        }
        due
    }

    /// Removes and returns every handler, due or not.
    pub(crate) fn drain(&mut self) -> Vec<DeadlineHandler> {
        let mut entries: Vec<DeadlineEntry> = self.entries.drain().collect();
        entries.sort_by_key(|entry| (entry.at, entry.seq));
        entries.into_iter().map(|entry| entry.handler).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
