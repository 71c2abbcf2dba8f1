use std::collections::VecDeque;
use std::sync::Arc;

use super::EventEnvelope;

/// Bounded, sequence-ordered buffer of undelivered envelopes for one recipient.
///
/// Reads are non-destructive: entries leave the queue only through
/// [`acknowledge`](Self::acknowledge), by being handed to a live connection
/// ([`pop_front`](Self::pop_front)), or by overflow eviction.
#[derive(Debug)]
pub struct RecipientQueue {
    entries: VecDeque<Arc<EventEnvelope>>,
    max_depth: usize,
    overflow_count: u64,
    trimmed_through: u64,
}

impl RecipientQueue {
    pub fn new(max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            entries: VecDeque::with_capacity(max_depth.min(64)),
            max_depth,
            overflow_count: 0,
            trimmed_through: 0,
        }
    }

    /// Append an envelope, evicting the oldest entries if the depth bound is
    /// exceeded. Returns the evicted envelopes.
    pub fn enqueue(&mut self, envelope: Arc<EventEnvelope>) -> Vec<Arc<EventEnvelope>> {
        debug_assert!(
            self.entries
                .back()
                .map_or(true, |last| last.sequence() < envelope.sequence()),
            "enqueue must preserve ascending sequence order"
        );
        self.entries.push_back(envelope);
        self.evict_overflow()
    }

    /// Re-insert envelopes that were handed to a connection but never
    /// confirmed. Entries already acknowledged or already present are skipped.
    pub fn restore<I>(&mut self, envelopes: I) -> Vec<Arc<EventEnvelope>>
    where
        I: IntoIterator<Item = Arc<EventEnvelope>>,
    {
        for envelope in envelopes {
            let seq = envelope.sequence();
            if seq <= self.trimmed_through {
                continue;
            }
            let idx = self.entries.partition_point(|e| e.sequence() < seq);
            if self.entries.get(idx).is_some_and(|e| e.sequence() == seq) {
                continue;
            }
            self.entries.insert(idx, envelope);
        }
        self.evict_overflow()
    }

    /// All entries with sequence greater than `since_seq`, ascending.
    pub fn drain(&self, since_seq: u64) -> Vec<Arc<EventEnvelope>> {
        let start = self.entries.partition_point(|e| e.sequence() <= since_seq);
        self.entries.range(start..).cloned().collect()
    }

    /// Discard every entry with sequence `<= up_to_seq`. Returns how many
    /// entries were retired.
    pub fn acknowledge(&mut self, up_to_seq: u64) -> usize {
        let cut = self.entries.partition_point(|e| e.sequence() <= up_to_seq);
        self.entries.drain(..cut);
        self.trimmed_through = self.trimmed_through.max(up_to_seq);
        cut
    }

    pub fn pop_front(&mut self) -> Option<Arc<EventEnvelope>> {
        self.entries.pop_front()
    }

    pub fn newest(&self) -> Option<&Arc<EventEnvelope>> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Number of envelopes evicted because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Highest sequence retired by acknowledgment.
    pub fn trimmed_through(&self) -> u64 {
        self.trimmed_through
    }

    fn evict_overflow(&mut self) -> Vec<Arc<EventEnvelope>> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_depth {
            if let Some(oldest) = self.entries.pop_front() {
                self.overflow_count += 1;
                evicted.push(oldest);
            }
        }
        evicted
    }
}
