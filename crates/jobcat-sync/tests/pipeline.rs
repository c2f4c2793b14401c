use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone};
use jobcat_core::{
    reference_offset, ListingUpsert, MergeReport, ParsedObservation, PersistedListing, RawObservation,
    Timestamp,
};
use jobcat_feed::FeedError;
use jobcat_storage::{InMemoryListingStore, ListingStore, StoreError};
use jobcat_sync::{ReconciliationMerger, SyncConfig, SyncPipeline};
use serde_json::Value as JsonValue;

const HEADER: &str =
    "job_id,job_title,job_link,job_sector,comp_name,work_place,career,education,start_date,deadline";

fn now() -> Timestamp {
    reference_offset()
        .with_ymd_and_hms(2026, 8, 20, 12, 0, 0)
        .single()
        .unwrap()
}

fn write_snapshot(dir: &Path, name: &str, rows: &[&str]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    path
}

fn observation(
    listing_id: i64,
    last_modified_at: Option<Timestamp>,
    deadline_at: Option<Timestamp>,
) -> ParsedObservation {
    ParsedObservation {
        raw: RawObservation {
            listing_id,
            title: format!("공고 {listing_id}"),
            link: format!("https://example.test/{listing_id}"),
            sector: JsonValue::String("['IT','금융']".into()),
            company: Some("(주)예시".into()),
            location: None,
            career: None,
            education: None,
            start_text: None,
            deadline_text: None,
        },
        last_modified_at,
        deadline_at,
    }
}

async fn stored(store: &InMemoryListingStore, listing_id: i64) -> PersistedListing {
    store.fetch(listing_id).await.unwrap().expect("stored listing")
}

#[tokio::test]
async fn last_modified_is_monotonic_across_merges() {
    let store = Arc::new(InMemoryListingStore::new());
    let merger = ReconciliationMerger::new(store.clone());
    let t1 = now() - Duration::hours(2);

    merger.merge(vec![observation(42, Some(t1), None)], now()).await.unwrap();

    let t0 = t1 - Duration::hours(1);
    merger.merge(vec![observation(42, Some(t0), None)], now()).await.unwrap();
    assert_eq!(stored(&store, 42).await.last_modified_at, Some(t1));

    merger.merge(vec![observation(42, None, None)], now()).await.unwrap();
    assert_eq!(stored(&store, 42).await.last_modified_at, Some(t1));

    let t2 = t1 + Duration::minutes(30);
    merger.merge(vec![observation(42, Some(t2), None)], now()).await.unwrap();
    assert_eq!(stored(&store, 42).await.last_modified_at, Some(t2));
}

#[tokio::test]
async fn deadline_keeps_first_known_value() {
    let store = Arc::new(InMemoryListingStore::new());
    let merger = ReconciliationMerger::new(store.clone());
    let d1 = reference_offset().with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap();
    let d2 = reference_offset().with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap();

    merger.merge(vec![observation(1, Some(now()), Some(d1))], now()).await.unwrap();
    merger.merge(vec![observation(1, Some(now()), Some(d2))], now()).await.unwrap();
    assert_eq!(stored(&store, 1).await.deadline_at, Some(d1));

    merger.merge(vec![observation(2, Some(now()), None)], now()).await.unwrap();
    merger.merge(vec![observation(2, Some(now()), Some(d2))], now()).await.unwrap();
    assert_eq!(stored(&store, 2).await.deadline_at, Some(d2));
}

#[tokio::test]
async fn first_seen_is_write_once_and_last_seen_advances() {
    let store = Arc::new(InMemoryListingStore::new());
    let merger = ReconciliationMerger::new(store.clone());
    let first = now();
    let later = now() + Duration::hours(1);

    merger.merge(vec![observation(8, Some(first), None)], first).await.unwrap();
    merger.merge(vec![observation(8, Some(first), None)], later).await.unwrap();

    let listing = stored(&store, 8).await;
    assert_eq!(listing.first_seen_at, first);
    assert_eq!(listing.last_seen_at, later);
    assert_eq!(listing.sectors, vec!["IT", "금융"]);
}

#[tokio::test]
async fn merging_same_snapshot_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_snapshot(
        dir.path(),
        "snapshot.csv",
        &[
            "10,백엔드,https://example.test/10,\"['IT']\",가,서울,,,~08.25(월),1시간 전 수정",
            "11,프론트,https://example.test/11,웹,나,부산,,,~08.31(월),4시간 전 등록",
            "10,백엔드,https://example.test/10,\"['IT']\",가,서울,,,~08.25(월),6시간 전 수정",
        ],
    );
    let store = Arc::new(InMemoryListingStore::new());
    let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();

    let first = pipeline.run_once_at(&path, now()).await.unwrap();
    let once = store.listings().await;
    let second = pipeline.run_once_at(&path, now()).await.unwrap();
    let twice = store.listings().await;

    assert_eq!(first.inserted, 2);
    assert_eq!(first.duplicates_collapsed, 1);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 2);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn remerging_a_batch_only_advances_last_seen() {
    let store = Arc::new(InMemoryListingStore::new());
    let merger = ReconciliationMerger::new(store.clone());
    let d1 = reference_offset().with_ymd_and_hms(2026, 8, 25, 0, 0, 0).unwrap();
    let batch = vec![
        observation(1, Some(now() - Duration::hours(1)), Some(d1)),
        observation(2, Some(now() - Duration::hours(3)), None),
    ];

    merger.merge(batch.clone(), now()).await.unwrap();
    let once = store.listings().await;
    let report = merger.merge(batch, now() + Duration::hours(1)).await.unwrap();
    let twice = store.listings().await;

    assert_eq!(report.updated, 2);
    for (a, b) in once.iter().zip(&twice) {
        assert_eq!(
            PersistedListing {
                last_seen_at: a.last_seen_at,
                ..b.clone()
            },
            *a
        );
        assert_eq!(b.last_seen_at, now() + Duration::hours(1));
    }
}

#[tokio::test]
async fn rescrape_moves_relative_times_forward_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryListingStore::new());
    let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();

    let morning = write_snapshot(
        dir.path(),
        "morning.csv",
        &["20,QA,https://example.test/20,IT,,,,,~09.10(목),2시간 전 수정"],
    );
    pipeline.run_once_at(&morning, now()).await.unwrap();

    // Three hours on, "6시간 전" points before the edit already recorded.
    let later = now() + Duration::hours(3);
    let afternoon = write_snapshot(
        dir.path(),
        "afternoon.csv",
        &["20,QA (수정),https://example.test/20,IT,,,,,~09.15(화),6시간 전 수정"],
    );
    pipeline.run_once_at(&afternoon, later).await.unwrap();

    let listing = stored(&store, 20).await;
    assert_eq!(listing.title, "QA (수정)");
    assert_eq!(listing.last_modified_at, Some(now() - Duration::hours(2)));
    assert_eq!(
        listing.deadline_at,
        Some(reference_offset().with_ymd_and_hms(2026, 9, 10, 0, 0, 0).unwrap())
    );
    assert_eq!(listing.start_raw.as_deref(), Some("~09.15(화)"));
    assert_eq!(listing.last_seen_at, later);
}

#[tokio::test]
async fn saramin_fixture_end_to_end() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/saramin/snapshot.csv");
    let store = Arc::new(InMemoryListingStore::new());
    let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();

    let summary = pipeline.run_once_at(&path, now()).await.unwrap();
    assert_eq!(summary.observed_rows, 6);
    assert_eq!(summary.duplicates_collapsed, 1);
    assert_eq!(summary.stale_dropped, 1);
    assert_eq!(summary.unparsed_dropped, 1);
    assert_eq!(summary.inserted, 3);

    let backend = stored(&store, 49213377).await;
    assert_eq!(backend.last_modified_at, Some(now() - Duration::hours(3)));
    assert_eq!(
        backend.deadline_at,
        Some(reference_offset().with_ymd_and_hms(2026, 9, 12, 0, 0, 0).unwrap())
    );
    assert_eq!(backend.sectors, vec!["IT개발·데이터", "백엔드/서버개발"]);

    // A full day old sits exactly on the cutoff.
    let frontend = stored(&store, 49220150).await;
    assert_eq!(frontend.last_modified_at, Some(now() - Duration::days(1)));
    assert_eq!(frontend.deadline_at, None);
    assert_eq!(frontend.sectors, vec!["웹개발"]);

    assert_eq!(store.fetch(49190021).await.unwrap(), None);
    assert_eq!(store.fetch(49221543).await.unwrap(), None);
}

#[tokio::test]
async fn missing_column_aborts_before_any_merge() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.csv");
    std::fs::write(&path, "job_id,job_title,job_link\n1,A,https://example.test/1\n").unwrap();
    let store = Arc::new(InMemoryListingStore::new());
    let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();

    let err = pipeline.run_once_at(&path, now()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedError>(),
        Some(FeedError::MissingColumns(_))
    ));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_snapshot_is_not_archived() {
    let dir = tempfile::tempdir().unwrap();
    let archive_dir = dir.path().join("archive");
    let path = dir.path().join("broken.csv");
    std::fs::write(&path, "job_id,job_title,job_link\n1,A,https://example.test/1\n").unwrap();
    let config = SyncConfig {
        archive_dir: Some(archive_dir.clone()),
        ..SyncConfig::default()
    };
    let pipeline = SyncPipeline::new(config, Arc::new(InMemoryListingStore::new())).unwrap();

    let err = pipeline.run_once_at(&path, now()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FeedError>(),
        Some(FeedError::MissingColumns(_))
    ));
    let archived = std::fs::read_dir(&archive_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(archived, 0);
}

#[tokio::test]
async fn oversized_retention_keeps_old_rows_instead_of_failing() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_snapshot(
        dir.path(),
        "old.csv",
        &["1,A,https://example.test/1,IT,,,,,,900일 전 등록"],
    );
    let config = SyncConfig {
        retention_hours: 3_000_000_000,
        ..SyncConfig::default()
    };
    let store = Arc::new(InMemoryListingStore::new());
    let pipeline = SyncPipeline::new(config, store.clone()).unwrap();

    let summary = pipeline.run_once_at(&path, now()).await.unwrap();
    assert_eq!(summary.stale_dropped, 0);
    assert_eq!(summary.inserted, 1);
}

struct UnavailableStore {
    calls: AtomicUsize,
}

#[async_trait]
impl ListingStore for UnavailableStore {
    async fn merge_batch(
        &self,
        _batch: &[ListingUpsert],
        _seen_at: Timestamp,
    ) -> Result<MergeReport, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn fetch(&self, _listing_id: i64) -> Result<Option<PersistedListing>, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }
}

#[tokio::test]
async fn store_failure_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_snapshot(
        dir.path(),
        "snapshot.csv",
        &["1,A,https://example.test/1,IT,,,,,,5분 전 등록"],
    );
    let store = Arc::new(UnavailableStore {
        calls: AtomicUsize::new(0),
    });
    let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();

    let err = pipeline.run_once_at(&path, now()).await.unwrap_err();
    assert!(err.downcast_ref::<StoreError>().is_some());
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn nothing_fresh_never_touches_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_snapshot(
        dir.path(),
        "stale.csv",
        &[
            "1,A,https://example.test/1,IT,,,,,,3일 전 등록",
            "2,B,https://example.test/2,IT,,,,,상시채용,채용시",
        ],
    );
    let store = Arc::new(UnavailableStore {
        calls: AtomicUsize::new(0),
    });
    let pipeline = SyncPipeline::new(SyncConfig::default(), store.clone()).unwrap();

    let summary = pipeline.run_once_at(&path, now()).await.unwrap();
    assert_eq!(summary.merged, 0);
    assert_eq!(summary.stale_dropped, 1);
    assert_eq!(summary.unparsed_dropped, 1);
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}
