use std::collections::HashMap;

use async_trait::async_trait;
use jobcat_core::{reconcile, ListingUpsert, MergeReport, PersistedListing, Timestamp};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{info, Instrument};

use crate::{batch_ids, ListingStore, StoreError};

/// Database used when neither `DATABASE_URL` nor `PGDATABASE` names one.
pub const DEFAULT_DATABASE: &str = "jobs";

const LISTING_COLUMNS: &str = "job_id, job_title, job_link, company, work_place, career, education, \
     sectors, last_modified_at, deadline_at, start_raw, deadline_raw, first_seen_at, last_seen_at";

// 14 binds per row; keeps every statement far below the 65535 parameter cap.
const UPSERT_CHUNK_ROWS: usize = 1000;

/// Resolves connection options from a URL, or from the libpq `PG*`
/// variables when no URL is given.
pub fn connect_options(database_url: Option<&str>) -> Result<PgConnectOptions, StoreError> {
    match database_url {
        Some(url) => Ok(url.parse::<PgConnectOptions>()?),
        None => {
            let options = PgConnectOptions::new();
            if std::env::var_os("PGDATABASE").is_some() {
                Ok(options)
            } else {
                Ok(options.database(DEFAULT_DATABASE))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgListingStore {
    pool: PgPool,
}

impl PgListingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn merge_in_transaction(
        &self,
        batch: &[ListingUpsert],
        seen_at: Timestamp,
    ) -> Result<MergeReport, StoreError> {
        let ids = batch_ids(batch)?;
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {LISTING_COLUMNS} FROM job_post WHERE job_id = ANY($1) FOR UPDATE");
        let rows = sqlx::query(&select).bind(&ids).fetch_all(&mut *tx).await?;
        let mut existing = HashMap::with_capacity(rows.len());
        for row in &rows {
            let listing = listing_from_row(row)?;
            existing.insert(listing.listing_id, listing);
        }

        let mut report = MergeReport::default();
        let merged = batch
            .iter()
            .map(|incoming| {
                let (listing, outcome) =
                    reconcile(existing.remove(&incoming.listing_id), incoming, seen_at);
                report.record(outcome);
                listing
            })
            .collect::<Vec<_>>();

        for chunk in merged.chunks(UPSERT_CHUNK_ROWS) {
            upsert_chunk(&mut tx, chunk).await?;
        }
        tx.commit().await?;
        Ok(report)
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn merge_batch(
        &self,
        batch: &[ListingUpsert],
        seen_at: Timestamp,
    ) -> Result<MergeReport, StoreError> {
        if batch.is_empty() {
            return Ok(MergeReport::default());
        }
        let span = tracing::info_span!("pg_merge_batch", rows = batch.len());
        let report = self.merge_in_transaction(batch, seen_at).instrument(span).await?;
        info!(
            inserted = report.inserted,
            updated = report.updated,
            "committed listing batch"
        );
        Ok(report)
    }

    async fn fetch(&self, listing_id: i64) -> Result<Option<PersistedListing>, StoreError> {
        let select = format!("SELECT {LISTING_COLUMNS} FROM job_post WHERE job_id = $1");
        let row = sqlx::query(&select)
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(listing_from_row).transpose()?)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_post")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn listing_from_row(row: &PgRow) -> Result<PersistedListing, sqlx::Error> {
    Ok(PersistedListing {
        listing_id: row.try_get("job_id")?,
        title: row.try_get("job_title")?,
        link: row.try_get("job_link")?,
        company: row.try_get("company")?,
        location: row.try_get("work_place")?,
        career: row.try_get("career")?,
        education: row.try_get("education")?,
        sectors: row.try_get::<Json<Vec<String>>, _>("sectors")?.0,
        last_modified_at: row.try_get("last_modified_at")?,
        deadline_at: row.try_get("deadline_at")?,
        start_raw: row.try_get("start_raw")?,
        deadline_raw: row.try_get("deadline_raw")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

/// Writes already-reconciled rows. `first_seen_at` is only written on insert.
///
/// The conflict clause repeats the monotonic and first-known rules so a row
/// inserted after the locking read cannot be regressed.
async fn upsert_chunk(
    tx: &mut Transaction<'_, Postgres>,
    chunk: &[PersistedListing],
) -> Result<(), sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO job_post ({LISTING_COLUMNS}) "));
    builder.push_values(chunk, |mut row, listing| {
        row.push_bind(listing.listing_id)
            .push_bind(listing.title.clone())
            .push_bind(listing.link.clone())
            .push_bind(listing.company.clone())
            .push_bind(listing.location.clone())
            .push_bind(listing.career.clone())
            .push_bind(listing.education.clone())
            .push_bind(Json(listing.sectors.clone()))
            .push_bind(listing.last_modified_at)
            .push_bind(listing.deadline_at)
            .push_bind(listing.start_raw.clone())
            .push_bind(listing.deadline_raw.clone())
            .push_bind(listing.first_seen_at)
            .push_bind(listing.last_seen_at);
    });
    builder.push(
        " ON CONFLICT (job_id) DO UPDATE SET \
           job_title = EXCLUDED.job_title, \
           job_link = EXCLUDED.job_link, \
           company = EXCLUDED.company, \
           work_place = EXCLUDED.work_place, \
           career = EXCLUDED.career, \
           education = EXCLUDED.education, \
           sectors = EXCLUDED.sectors, \
           last_modified_at = CASE \
             WHEN job_post.last_modified_at IS NULL THEN EXCLUDED.last_modified_at \
             WHEN EXCLUDED.last_modified_at IS NULL THEN job_post.last_modified_at \
             ELSE GREATEST(job_post.last_modified_at, EXCLUDED.last_modified_at) END, \
           deadline_at = COALESCE(job_post.deadline_at, EXCLUDED.deadline_at), \
           start_raw = EXCLUDED.start_raw, \
           deadline_raw = EXCLUDED.deadline_raw, \
           last_seen_at = EXCLUDED.last_seen_at",
    );
    builder.build().execute(&mut **tx).await?;
    Ok(())
}
