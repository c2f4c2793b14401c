//! Snapshot sync pipeline: parse, deduplicate, filter, reconcile.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jobcat_core::{reference_now, ParsedObservation, Timestamp, RETENTION_WINDOW_HOURS};
use jobcat_feed::read_snapshot;
use jobcat_storage::{connect_options, ListingStore, PgListingStore, SnapshotArchive};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

mod dedup;
mod freshness;
mod merge;

pub use dedup::{DedupStats, SnapshotDeduplicator};
pub use freshness::{FreshnessFilter, FreshnessStats};
pub use merge::ReconciliationMerger;

pub const CRATE_NAME: &str = "jobcat-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub retention_hours: i64,
    pub archive_dir: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 5,
            retention_hours: RETENTION_WINDOW_HOURS,
            archive_dir: None,
            scheduler_enabled: false,
            sync_cron: "0 0 * * * *".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            db_max_connections: std::env::var("JOBCAT_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.db_max_connections),
            retention_hours: std::env::var("JOBCAT_RETENTION_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|h| *h > 0)
                .unwrap_or(defaults.retention_hours),
            archive_dir: std::env::var("JOBCAT_ARCHIVE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            scheduler_enabled: std::env::var("JOBCAT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.scheduler_enabled),
            sync_cron: std::env::var("JOBCAT_SYNC_CRON").unwrap_or(defaults.sync_cron),
        }
    }

    pub fn freshness_filter(&self) -> Result<FreshnessFilter> {
        FreshnessFilter::from_hours(self.retention_hours)
            .with_context(|| format!("retention of {} hours is out of range", self.retention_hours))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub snapshot: String,
    pub snapshot_sha256: Option<String>,
    pub observed_rows: usize,
    pub distinct_listings: usize,
    pub duplicates_collapsed: usize,
    pub stale_dropped: usize,
    pub unparsed_dropped: usize,
    pub inserted: usize,
    pub updated: usize,
    pub merged: usize,
}

pub struct SyncPipeline {
    config: SyncConfig,
    archive: Option<SnapshotArchive>,
    dedup: SnapshotDeduplicator,
    freshness: FreshnessFilter,
    merger: ReconciliationMerger,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, store: Arc<dyn ListingStore>) -> Result<Self> {
        let freshness = config.freshness_filter()?;
        let archive = config.archive_dir.clone().map(SnapshotArchive::new);
        Ok(Self {
            config,
            archive,
            dedup: SnapshotDeduplicator,
            freshness,
            merger: ReconciliationMerger::new(store),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub async fn run_once(&self, snapshot: &Path) -> Result<SyncRunSummary> {
        self.run_once_at(snapshot, reference_now()).await
    }

    /// Runs every stage for one snapshot file with `now` as the reference
    /// instant for relative dates, the retention cutoff and seen times.
    pub async fn run_once_at(&self, snapshot: &Path, now: Timestamp) -> Result<SyncRunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, snapshot = %snapshot.display());
        self.run_stages(run_id, snapshot, now).instrument(span).await
    }

    async fn run_stages(&self, run_id: Uuid, snapshot: &Path, now: Timestamp) -> Result<SyncRunSummary> {
        let started_at = Utc::now();

        let raw = read_snapshot(snapshot)
            .with_context(|| format!("reading snapshot {}", snapshot.display()))?;

        // Only snapshots that passed the header check are archived.
        let snapshot_sha256 = match &self.archive {
            Some(archive) => {
                let archived = archive.archive_file(now, snapshot).await?;
                info!(
                    path = %archived.absolute_path.display(),
                    deduplicated = archived.deduplicated,
                    "archived snapshot"
                );
                Some(archived.content_hash)
            }
            None => None,
        };

        let observed_rows = raw.len();
        let parsed = raw
            .into_iter()
            .map(|row| ParsedObservation::from_raw(row, now))
            .collect::<Vec<_>>();

        let (deduped, dedup_stats) = self.dedup.apply(parsed);
        let (fresh, freshness_stats) = self.freshness.apply(deduped, now);
        info!(
            observed = observed_rows,
            distinct = dedup_stats.distinct,
            stale = freshness_stats.stale,
            unparsed = freshness_stats.unparsed,
            kept = freshness_stats.kept,
            "snapshot filtered"
        );

        let report = self
            .merger
            .merge(fresh, now)
            .await
            .context("merging snapshot into listing store")?;

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            snapshot: snapshot.display().to_string(),
            snapshot_sha256,
            observed_rows,
            distinct_listings: dedup_stats.distinct,
            duplicates_collapsed: dedup_stats.collapsed(),
            stale_dropped: freshness_stats.stale,
            unparsed_dropped: freshness_stats.unparsed,
            inserted: report.inserted,
            updated: report.updated,
            merged: report.merged(),
        })
    }
}

pub async fn connect_store(config: &SyncConfig) -> Result<PgListingStore> {
    let options = connect_options(config.database_url.as_deref()).context("parsing DATABASE_URL")?;
    PgListingStore::connect(options, config.db_max_connections)
        .await
        .context("connecting to listing database")
}

pub async fn run_sync_once_from_env(snapshot: &Path) -> Result<SyncRunSummary> {
    let config = SyncConfig::from_env();
    let store = connect_store(&config).await?;
    let pipeline = SyncPipeline::new(config, Arc::new(store))?;
    pipeline.run_once(snapshot).await
}

/// Builds a cron scheduler that re-ingests `snapshot` on every tick.
///
/// A tick arriving while the previous run is still going is skipped.
pub async fn maybe_build_scheduler(
    pipeline: Arc<SyncPipeline>,
    snapshot: PathBuf,
) -> Result<Option<JobScheduler>> {
    if !pipeline.config().scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = pipeline.config().sync_cron.clone();
    let in_flight = Arc::new(tokio::sync::Mutex::new(()));
    let job = Job::new_async(&cron, move |_uuid, _lock| {
        let pipeline = pipeline.clone();
        let snapshot = snapshot.clone();
        let in_flight = in_flight.clone();
        Box::pin(async move {
            let Ok(_running) = in_flight.try_lock_owned() else {
                warn!("previous sync still running; skipping tick");
                return;
            };
            match pipeline.run_once(&snapshot).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    merged = summary.merged,
                    "scheduled sync complete"
                ),
                Err(err) => error!(error = ?err, "scheduled sync failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
