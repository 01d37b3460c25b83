//! Keeps the earliest event per (user_id, event_type) pair.
//!
//! "Earliest" means the smallest timestamp, then the smallest input position.
//! Output is ordered by the first input position at which each pair appeared.

use std::collections::HashMap;

use funnel_core::types::{DedupedEvent, EventRecord};
use rayon::prelude::*;

#[derive(Debug, Clone)]
struct Candidate {
    first_seen: u64,
    record: EventRecord,
}

/// Incremental single-pass deduplicator. Memory is one slot per distinct pair.
#[derive(Debug, Default)]
pub struct Deduplicator {
    /// user_id -> event_type -> index into `candidates`.
    slots: HashMap<String, HashMap<String, usize>>,
    candidates: Vec<Candidate>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: EventRecord) {
        self.absorb(Candidate {
            first_seen: record.seq,
            record,
        });
    }

    fn slot(&self, record: &EventRecord) -> Option<usize> {
        self.slots
            .get(record.user_id.as_str())?
            .get(record.event_type.as_str())
            .copied()
    }

    /// Keys are only allocated when a pair is seen for the first time.
    fn absorb(&mut self, candidate: Candidate) {
        match self.slot(&candidate.record) {
            Some(slot) => {
                let current = &mut self.candidates[slot];
                current.first_seen = current.first_seen.min(candidate.first_seen);
                if candidate.record.precedes(&current.record) {
                    current.record = candidate.record;
                }
            }
            None => {
                let slot = self.candidates.len();
                let record = &candidate.record;
                if let Some(by_type) = self.slots.get_mut(record.user_id.as_str()) {
                    by_type.insert(record.event_type.clone(), slot);
                } else {
                    self.slots.insert(
                        record.user_id.clone(),
                        HashMap::from([(record.event_type.clone(), slot)]),
                    );
                }
                self.candidates.push(candidate);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Combine two partial results. Associative and commutative, so partial
    /// maps built on any partition of the input merge to the same result.
    pub fn merge(mut self, other: Deduplicator) -> Deduplicator {
        if self.len() < other.len() {
            return other.merge(self);
        }
        for candidate in other.candidates {
            self.absorb(candidate);
        }
        self
    }

    /// Surviving events in slot order: the order pairs were first pushed.
    pub fn finish(self) -> Vec<DedupedEvent> {
        self.candidates.into_iter().map(|c| c.record).collect()
    }

    /// Surviving events ordered by the smallest input position seen for
    /// each pair. Matches [`Deduplicator::finish`] for input pushed in
    /// `seq` order, whatever order the partial results were merged in.
    pub fn finish_by_first_seen(mut self) -> Vec<DedupedEvent> {
        self.candidates.sort_by_key(|c| c.first_seen);
        self.finish()
    }
}

impl Extend<EventRecord> for Deduplicator {
    fn extend<T: IntoIterator<Item = EventRecord>>(&mut self, iter: T) {
        for record in iter {
            self.push(record);
        }
    }
}

/// Sequential reference implementation.
pub fn dedup<I>(records: I) -> Vec<DedupedEvent>
where
    I: IntoIterator<Item = EventRecord>,
{
    let mut deduper = Deduplicator::new();
    deduper.extend(records);
    deduper.finish()
}

/// Same result as [`dedup`], computed with a rayon fold/reduce over the
/// materialized records.
pub fn dedup_parallel(records: Vec<EventRecord>) -> Vec<DedupedEvent> {
    records
        .into_par_iter()
        .fold(Deduplicator::new, |mut deduper, record| {
            deduper.push(record);
            deduper
        })
        .reduce(Deduplicator::new, Deduplicator::merge)
        .finish_by_first_seen()
}
