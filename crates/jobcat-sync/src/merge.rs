use std::sync::Arc;

use jobcat_core::{ListingUpsert, MergeReport, ParsedObservation, Timestamp};
use jobcat_storage::{ListingStore, StoreError};
use tracing::{debug, info};

/// Hands a filtered snapshot to the store as one atomic batch.
#[derive(Clone)]
pub struct ReconciliationMerger {
    store: Arc<dyn ListingStore>,
}

impl ReconciliationMerger {
    pub fn new(store: Arc<dyn ListingStore>) -> Self {
        Self { store }
    }

    pub async fn merge(
        &self,
        items: Vec<ParsedObservation>,
        seen_at: Timestamp,
    ) -> Result<MergeReport, StoreError> {
        if items.is_empty() {
            debug!("nothing to merge");
            return Ok(MergeReport::default());
        }
        let batch = items.into_iter().map(ListingUpsert::from).collect::<Vec<_>>();
        let report = self.store.merge_batch(&batch, seen_at).await?;
        info!(
            merged = report.merged(),
            inserted = report.inserted,
            updated = report.updated,
            "upserted listings"
        );
        Ok(report)
    }
}
