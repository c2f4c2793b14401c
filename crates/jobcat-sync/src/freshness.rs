use chrono::TimeDelta;
use jobcat_core::{ParsedObservation, Timestamp, RETENTION_WINDOW_HOURS};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FreshnessStats {
    pub kept: usize,
    pub stale: usize,
    pub unparsed: usize,
}

/// Drops observations modified before `now - retention`, and those whose
/// modification time could not be read at all.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessFilter {
    retention: TimeDelta,
}

impl Default for FreshnessFilter {
    fn default() -> Self {
        Self {
            retention: TimeDelta::hours(RETENTION_WINDOW_HOURS),
        }
    }
}

impl FreshnessFilter {
    pub fn new(retention: TimeDelta) -> Self {
        Self { retention }
    }

    pub fn from_hours(hours: i64) -> Option<Self> {
        TimeDelta::try_hours(hours).map(Self::new)
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    /// Oldest modification time still kept. `None` when the window reaches
    /// past the representable range, in which case nothing is stale.
    pub fn cutoff(&self, now: Timestamp) -> Option<Timestamp> {
        now.checked_sub_signed(self.retention)
    }

    pub fn apply(
        &self,
        items: Vec<ParsedObservation>,
        now: Timestamp,
    ) -> (Vec<ParsedObservation>, FreshnessStats) {
        let cutoff = self.cutoff(now);
        let mut stats = FreshnessStats::default();
        let kept = items
            .into_iter()
            .filter(|item| match item.last_modified_at {
                None => {
                    stats.unparsed += 1;
                    false
                }
                Some(modified) if cutoff.is_some_and(|cutoff| modified < cutoff) => {
                    stats.stale += 1;
                    false
                }
                Some(_) => true,
            })
            .collect::<Vec<_>>();
        stats.kept = kept.len();
        (kept, stats)
    }
}
