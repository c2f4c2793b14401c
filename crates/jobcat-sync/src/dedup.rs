use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use jobcat_core::ParsedObservation;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub observed: usize,
    pub distinct: usize,
}

impl DedupStats {
    pub fn collapsed(&self) -> usize {
        self.observed - self.distinct
    }
}

/// Keeps one observation per listing: the most recently modified one.
///
/// A missing modification time ranks below any parsed one. On an exact tie
/// the observation met first is kept. Output is ordered by listing id.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotDeduplicator;

impl SnapshotDeduplicator {
    pub fn apply(&self, items: Vec<ParsedObservation>) -> (Vec<ParsedObservation>, DedupStats) {
        let observed = items.len();
        let mut best: BTreeMap<i64, ParsedObservation> = BTreeMap::new();

        for item in items {
            match best.entry(item.listing_id()) {
                Entry::Vacant(slot) => {
                    slot.insert(item);
                }
                Entry::Occupied(mut slot) => {
                    // Option orders None below every Some.
                    if item.last_modified_at > slot.get().last_modified_at {
                        slot.insert(item);
                    }
                }
            }
        }

        let kept = best.into_values().collect::<Vec<_>>();
        let stats = DedupStats {
            observed,
            distinct: kept.len(),
        };
        (kept, stats)
    }
}
