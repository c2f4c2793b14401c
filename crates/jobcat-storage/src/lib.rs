//! Listing persistence and snapshot archiving for jobcat.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use jobcat_core::{reconcile, ListingUpsert, MergeReport, PersistedListing, Timestamp};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

mod archive;
mod pg;

pub use archive::{ArchivedSnapshot, SnapshotArchive};
pub use pg::{connect_options, PgListingStore, DEFAULT_DATABASE};

pub const CRATE_NAME: &str = "jobcat-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("listing {0} appears more than once in the batch")]
    DuplicateListing(i64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Persistent catalog of listings keyed by listing identifier.
///
/// `merge_batch` applies [`jobcat_core::reconcile`] to every entry and is
/// all-or-nothing: on error no entry of the batch is visible.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn merge_batch(
        &self,
        batch: &[ListingUpsert],
        seen_at: Timestamp,
    ) -> Result<MergeReport, StoreError>;

    async fn fetch(&self, listing_id: i64) -> Result<Option<PersistedListing>, StoreError>;

    async fn count(&self) -> Result<u64, StoreError>;
}

/// Identifiers of `batch` in order, rejecting repeats.
pub(crate) fn batch_ids(batch: &[ListingUpsert]) -> Result<Vec<i64>, StoreError> {
    let mut seen = HashSet::with_capacity(batch.len());
    let mut ids = Vec::with_capacity(batch.len());
    for upsert in batch {
        if !seen.insert(upsert.listing_id) {
            return Err(StoreError::DuplicateListing(upsert.listing_id));
        }
        ids.push(upsert.listing_id);
    }
    Ok(ids)
}

#[derive(Debug, Default)]
pub struct InMemoryListingStore {
    listings: Mutex<BTreeMap<i64, PersistedListing>>,
}

impl InMemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn listings(&self) -> Vec<PersistedListing> {
        self.listings.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ListingStore for InMemoryListingStore {
    async fn merge_batch(
        &self,
        batch: &[ListingUpsert],
        seen_at: Timestamp,
    ) -> Result<MergeReport, StoreError> {
        batch_ids(batch)?;

        let mut listings = self.listings.lock().await;
        let mut report = MergeReport::default();
        let staged = batch
            .iter()
            .map(|incoming| {
                let (listing, outcome) =
                    reconcile(listings.get(&incoming.listing_id).cloned(), incoming, seen_at);
                report.record(outcome);
                listing
            })
            .collect::<Vec<_>>();

        for listing in staged {
            listings.insert(listing.listing_id, listing);
        }
        debug!(inserted = report.inserted, updated = report.updated, "merged batch in memory");
        Ok(report)
    }

    async fn fetch(&self, listing_id: i64) -> Result<Option<PersistedListing>, StoreError> {
        Ok(self.listings.lock().await.get(&listing_id).cloned())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.listings.lock().await.len() as u64)
    }
}
