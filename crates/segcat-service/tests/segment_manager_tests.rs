use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use segcat_core::{CoreError, CoreResult, DataSegment, Interval, SegmentMetadataStore, ShardSpec};
use segcat_metadata::{create_sqlite_pool, SqliteSegmentRepository};
use segcat_service::{PollOutcome, SegmentManager, SegmentManagerConfig};
use uuid::Uuid;

const TABLE: &str = "segments";

struct Row {
    segment: DataSegment,
    used: bool,
}

/// In-memory segment table with call accounting and an injectable failure.
#[derive(Default)]
struct MemoryStore {
    rows: Mutex<Vec<Row>>,
    fail: AtomicBool,
    used_payload_calls: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryStore {
    fn insert(&self, segment: DataSegment, used: bool) {
        self.rows.lock().push(Row { segment, used });
    }

    fn is_used(&self, segment_id: &str) -> Option<bool> {
        self.rows
            .lock()
            .iter()
            .find(|row| row.segment.id() == segment_id)
            .map(|row| row.used)
    }

    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> CoreResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CoreError::storage("connection refused"))
        } else {
            Ok(())
        }
    }

    fn set_used(&self, mut matches: impl FnMut(&DataSegment) -> bool, used: bool) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        for row in self.rows.lock().iter_mut() {
            if matches(&row.segment) {
                row.used = used;
            }
        }
    }
}

#[async_trait]
impl SegmentMetadataStore for MemoryStore {
    async fn used_payloads(&self, _table: &str) -> CoreResult<Vec<String>> {
        self.used_payload_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.rows
            .lock()
            .iter()
            .filter(|row| row.used)
            .map(|row| row.segment.to_payload())
            .collect()
    }

    async fn all_payloads(&self, _table: &str, data_source: &str) -> CoreResult<Vec<String>> {
        self.check()?;
        self.rows
            .lock()
            .iter()
            .filter(|row| row.segment.data_source() == data_source)
            .map(|row| row.segment.to_payload())
            .collect()
    }

    async fn mark_used_batch(&self, _table: &str, segment_ids: &[String]) -> CoreResult<()> {
        self.check()?;
        self.set_used(|segment| segment_ids.iter().any(|id| id == segment.id()), true);
        Ok(())
    }

    async fn mark_used(&self, _table: &str, segment_id: &str) -> CoreResult<()> {
        self.check()?;
        self.set_used(|segment| segment.id() == segment_id, true);
        Ok(())
    }

    async fn mark_unused(&self, _table: &str, segment_id: &str) -> CoreResult<()> {
        self.check()?;
        self.set_used(|segment| segment.id() == segment_id, false);
        Ok(())
    }

    async fn mark_data_source_unused(&self, _table: &str, data_source: &str) -> CoreResult<()> {
        self.check()?;
        self.set_used(|segment| segment.data_source() == data_source, false);
        Ok(())
    }
}

fn interval(start_day: u32, end_day: u32) -> Interval {
    format!("2012-01-{start_day:02}T00:00:00Z/2012-01-{end_day:02}T00:00:00Z")
        .parse()
        .expect("valid interval")
}

fn segment(data_source: &str, start_day: u32, end_day: u32, version: &str) -> DataSegment {
    DataSegment::new(data_source, interval(start_day, end_day), version)
}

fn manager_with(store: &Arc<MemoryStore>) -> SegmentManager {
    SegmentManager::new(
        Arc::clone(store) as Arc<dyn SegmentMetadataStore>,
        SegmentManagerConfig {
            poll_period: Duration::from_secs(60),
            segment_table: TABLE.to_string(),
        },
    )
}

#[tokio::test]
async fn poll_groups_used_segments_by_data_source() {
    let store = Arc::new(MemoryStore::default());
    let first = segment("wikipedia", 1, 2, "v1");
    let second = segment("wikipedia", 2, 3, "v1");
    store.insert(first.clone(), true);
    store.insert(second.clone(), true);
    store.insert(segment("wikipedia", 3, 4, "v1"), false);
    let manager = manager_with(&store);

    let outcome = manager.poll().await;
    assert_eq!(
        outcome,
        PollOutcome::Published {
            data_sources: 1,
            segments: 2
        }
    );

    let inventory = manager.inventory();
    assert_eq!(inventory.len(), 1);
    let wikipedia = manager.inventory_value("wikipedia").expect("datasource present");
    assert_eq!(wikipedia.segment_count(), 2);
    assert!(wikipedia.contains(first.id()));
    assert!(wikipedia.contains(second.id()));
    assert!(wikipedia.properties().contains_key("created"));
}

#[tokio::test]
async fn poll_with_no_used_rows_keeps_previous_inventory() {
    let store = Arc::new(MemoryStore::default());
    let seg = segment("wikipedia", 1, 2, "v1");
    store.insert(seg.clone(), true);
    let manager = manager_with(&store);
    manager.poll().await;

    store.rows.lock().iter_mut().for_each(|row| row.used = false);

    assert_eq!(manager.poll().await, PollOutcome::Empty);
    let wikipedia = manager.inventory_value("wikipedia").expect("still published");
    assert!(wikipedia.contains(seg.id()));
}

#[tokio::test]
async fn failed_poll_keeps_previous_inventory() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("wikipedia", 1, 2, "v1"), true);
    let manager = manager_with(&store);
    manager.poll().await;

    store.set_failing(true);
    assert_eq!(manager.poll().await, PollOutcome::Failed);
    assert_eq!(manager.inventory().len(), 1);
}

#[tokio::test]
async fn poll_replaces_the_inventory_wholesale() {
    let store = Arc::new(MemoryStore::default());
    let old = segment("wikipedia", 1, 2, "v1");
    store.insert(old.clone(), true);
    let manager = manager_with(&store);
    manager.poll().await;
    let before = manager.snapshot();

    store.rows.lock().clear();
    store.insert(segment("twitter", 1, 2, "v1"), true);
    manager.poll().await;

    assert!(manager.inventory_value("wikipedia").is_none());
    assert!(manager.inventory_value("twitter").is_some());
    assert!(before.get("wikipedia").is_some(), "old snapshot is left intact");
}

#[tokio::test]
async fn enable_data_source_marks_all_visible_segments_used() {
    let store = Arc::new(MemoryStore::default());
    let used = segment("wikipedia", 1, 2, "v1");
    let unused = segment("wikipedia", 2, 3, "v1");
    store.insert(used.clone(), true);
    store.insert(unused.clone(), false);
    let manager = manager_with(&store);

    manager
        .enable_data_source("wikipedia")
        .await
        .expect("enable succeeds");

    assert_eq!(store.is_used(used.id()), Some(true));
    assert_eq!(store.is_used(unused.id()), Some(true));
    assert!(
        manager.inventory().is_empty(),
        "enable does not touch the inventory"
    );
}

#[tokio::test]
async fn enable_data_source_skips_overshadowed_segments() {
    let store = Arc::new(MemoryStore::default());
    let old = segment("wikipedia", 1, 2, "v1");
    let new = segment("wikipedia", 1, 2, "v2");
    let partial_old = segment("wikipedia", 2, 5, "v1");
    let partial_new = segment("wikipedia", 3, 4, "v2");
    for seg in [&old, &new, &partial_old, &partial_new] {
        store.insert(seg.clone(), false);
    }
    let manager = manager_with(&store);

    manager.enable_data_source("wikipedia").await.unwrap();

    assert_eq!(store.is_used(old.id()), Some(false));
    assert_eq!(store.is_used(new.id()), Some(true));
    assert_eq!(store.is_used(partial_old.id()), Some(true));
    assert_eq!(store.is_used(partial_new.id()), Some(true));
}

#[tokio::test]
async fn enable_data_source_enables_every_partition_of_a_holder() {
    let store = Arc::new(MemoryStore::default());
    let p0 = segment("wikipedia", 1, 2, "v1").with_shard_spec(ShardSpec::Numbered {
        partition_num: 0,
        partitions: 3,
    });
    let p1 = segment("wikipedia", 1, 2, "v1").with_shard_spec(ShardSpec::Numbered {
        partition_num: 1,
        partitions: 3,
    });
    store.insert(p0.clone(), false);
    store.insert(p1.clone(), false);
    let manager = manager_with(&store);

    // Partition 2 is missing; the set is incomplete but still enabled.
    manager.enable_data_source("wikipedia").await.unwrap();

    assert_eq!(store.is_used(p0.id()), Some(true));
    assert_eq!(store.is_used(p1.id()), Some(true));
}

#[tokio::test]
async fn enable_data_source_without_rows_fails_without_updates() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("twitter", 1, 2, "v1"), false);
    let manager = manager_with(&store);

    let err = manager
        .enable_data_source("wikipedia")
        .await
        .expect_err("nothing to enable");

    assert!(matches!(
        err,
        CoreError::NotFound {
            entity: "segments",
            ..
        }
    ));
    assert_eq!(store.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn enable_data_source_reports_malformed_payloads() {
    struct BrokenStore;

    #[async_trait]
    impl SegmentMetadataStore for BrokenStore {
        async fn used_payloads(&self, _table: &str) -> CoreResult<Vec<String>> {
            Ok(vec!["{not json".to_string()])
        }
        async fn all_payloads(&self, _table: &str, _ds: &str) -> CoreResult<Vec<String>> {
            Ok(vec!["{not json".to_string()])
        }
        async fn mark_used_batch(&self, _table: &str, _ids: &[String]) -> CoreResult<()> {
            panic!("must not update after a decode failure");
        }
        async fn mark_used(&self, _table: &str, _id: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn mark_unused(&self, _table: &str, _id: &str) -> CoreResult<()> {
            Ok(())
        }
        async fn mark_data_source_unused(&self, _table: &str, _ds: &str) -> CoreResult<()> {
            Ok(())
        }
    }

    let manager = SegmentManager::new(Arc::new(BrokenStore), SegmentManagerConfig::default());

    let err = manager.enable_data_source("wikipedia").await.unwrap_err();
    assert!(matches!(err, CoreError::DeserializationError(_)));
    assert_eq!(manager.poll().await, PollOutcome::Failed);
}

#[tokio::test]
async fn enable_segment_flags_a_single_row() {
    let store = Arc::new(MemoryStore::default());
    let target = segment("wikipedia", 1, 2, "v1");
    let other = segment("wikipedia", 2, 3, "v1");
    store.insert(target.clone(), false);
    store.insert(other.clone(), false);
    let manager = manager_with(&store);

    manager.enable_segment(target.id()).await.unwrap();
    manager
        .enable_segment("unknown")
        .await
        .expect("unknown ids are not an error");

    assert_eq!(store.is_used(target.id()), Some(true));
    assert_eq!(store.is_used(other.id()), Some(false));
}

#[tokio::test]
async fn enable_segment_surfaces_store_errors() {
    let store = Arc::new(MemoryStore::default());
    store.set_failing(true);
    let manager = manager_with(&store);

    let err = manager.enable_segment("any").await.unwrap_err();
    assert!(matches!(err, CoreError::StorageError(_)));
}

#[tokio::test]
async fn remove_unknown_data_source_does_not_touch_the_store() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("wikipedia", 1, 2, "v1"), true);
    let manager = manager_with(&store);

    let err = manager.remove_data_source("wikipedia").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.updates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn remove_data_source_updates_store_and_inventory() {
    let store = Arc::new(MemoryStore::default());
    let wiki = segment("wikipedia", 1, 2, "v1");
    let twitter = segment("twitter", 1, 2, "v1");
    store.insert(wiki.clone(), true);
    store.insert(twitter.clone(), true);
    let manager = manager_with(&store);
    manager.poll().await;

    manager.remove_data_source("wikipedia").await.unwrap();

    assert_eq!(store.is_used(wiki.id()), Some(false));
    assert_eq!(store.is_used(twitter.id()), Some(true));
    assert!(manager.inventory_value("wikipedia").is_none());
    assert!(manager.inventory_value("twitter").is_some());
}

#[tokio::test]
async fn failed_remove_data_source_keeps_inventory_entry() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("wikipedia", 1, 2, "v1"), true);
    let manager = manager_with(&store);
    manager.poll().await;

    store.set_failing(true);
    assert!(manager.remove_data_source("wikipedia").await.is_err());
    assert!(manager.inventory_value("wikipedia").is_some());
}

#[tokio::test]
async fn removing_last_segment_drops_the_data_source() {
    let store = Arc::new(MemoryStore::default());
    let first = segment("wikipedia", 1, 2, "v1");
    let second = segment("wikipedia", 2, 3, "v1");
    store.insert(first.clone(), true);
    store.insert(second.clone(), true);
    let manager = manager_with(&store);
    manager.poll().await;

    manager.remove_segment("wikipedia", first.id()).await.unwrap();
    let wikipedia = manager.inventory_value("wikipedia").expect("one segment left");
    assert_eq!(wikipedia.segment_count(), 1);

    manager.remove_segment("wikipedia", second.id()).await.unwrap();
    assert!(manager.inventory_value("wikipedia").is_none());
    assert_eq!(store.is_used(second.id()), Some(false));
}

#[tokio::test]
async fn remove_segment_of_unknown_data_source_still_updates_store() {
    let store = Arc::new(MemoryStore::default());
    let seg = segment("wikipedia", 1, 2, "v1");
    store.insert(seg.clone(), true);
    let manager = manager_with(&store);

    let err = manager
        .remove_segment("wikipedia", seg.id())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::NotFound {
            entity: "datasource",
            ..
        }
    ));
    assert_eq!(store.is_used(seg.id()), Some(false));
}

#[tokio::test]
async fn remove_segment_store_failure_leaves_inventory_alone() {
    let store = Arc::new(MemoryStore::default());
    let seg = segment("wikipedia", 1, 2, "v1");
    store.insert(seg.clone(), true);
    let manager = manager_with(&store);
    manager.poll().await;

    store.set_failing(true);
    assert!(manager.remove_segment("wikipedia", seg.id()).await.is_err());
    let wikipedia = manager.inventory_value("wikipedia").unwrap();
    assert!(wikipedia.contains(seg.id()));
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_stop_clears_inventory() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("wikipedia", 1, 2, "v1"), true);
    let manager = manager_with(&store);
    assert!(!manager.is_started());

    manager.start();
    manager.start();
    assert!(manager.is_started());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.used_payload_calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.inventory().len(), 1);

    manager.stop();
    manager.stop();
    assert!(!manager.is_started());
    assert!(manager.inventory().is_empty());
}

#[tokio::test(start_paused = true)]
async fn poll_task_runs_on_a_fixed_delay() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("wikipedia", 1, 2, "v1"), true);
    let manager = manager_with(&store);

    manager.start();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(store.used_payload_calls.load(Ordering::SeqCst), 2);

    manager.stop();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(store.used_payload_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_polls_again() {
    let store = Arc::new(MemoryStore::default());
    store.insert(segment("wikipedia", 1, 2, "v1"), true);
    let manager = manager_with(&store);

    manager.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    manager.stop();
    assert!(manager.inventory().is_empty());

    manager.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.inventory().len(), 1);
    manager.stop();
}

fn temp_db_path() -> PathBuf {
    let filename = format!("segcat-service-test-{}.db", Uuid::now_v7());
    std::env::temp_dir().join(filename)
}

#[tokio::test]
async fn sqlite_backed_manager_round_trip() {
    let database_url = format!("sqlite://{}", temp_db_path().display());
    let pool = create_sqlite_pool(&database_url)
        .await
        .expect("failed to create pool");
    let repository = SqliteSegmentRepository::new(pool);
    repository.create_segment_table(TABLE).await.unwrap();

    let old = segment("wikipedia", 1, 3, "v1");
    let new = segment("wikipedia", 1, 3, "v2");
    repository.insert_segment(TABLE, &old, false).await.unwrap();
    repository.insert_segment(TABLE, &new, false).await.unwrap();

    let manager = SegmentManager::new(
        Arc::new(repository.clone()),
        SegmentManagerConfig {
            poll_period: Duration::from_secs(60),
            segment_table: TABLE.to_string(),
        },
    );

    assert_eq!(manager.poll().await, PollOutcome::Empty);

    manager.enable_data_source("wikipedia").await.unwrap();
    assert_eq!(
        manager.poll().await,
        PollOutcome::Published {
            data_sources: 1,
            segments: 1
        }
    );
    let wikipedia = manager.inventory_value("wikipedia").unwrap();
    assert!(wikipedia.contains(new.id()));
    assert!(!wikipedia.contains(old.id()));

    manager.remove_segment("wikipedia", new.id()).await.unwrap();
    assert!(manager.inventory().is_empty());
    assert_eq!(repository.is_used(TABLE, new.id()).await.unwrap(), Some(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_only_observe_whole_snapshots_under_concurrent_updates() {
    let store = Arc::new(MemoryStore::default());
    for day in 1..=3 {
        store.insert(segment("stable", day, day + 1, "v1"), true);
    }
    let churn: Vec<DataSegment> = (1..=5)
        .map(|day| segment("churn", day, day + 1, "v1"))
        .collect();
    for seg in &churn {
        store.insert(seg.clone(), true);
    }

    let manager = Arc::new(manager_with(&store));
    assert_eq!(
        manager.poll().await,
        PollOutcome::Published {
            data_sources: 2,
            segments: 8
        }
    );

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let manager = Arc::clone(&manager);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut observed = 0_usize;
                loop {
                    let snapshot = manager.snapshot();
                    let stable = snapshot
                        .get("stable")
                        .expect("stable datasource is always published");
                    assert_eq!(stable.segment_count(), 3);
                    if let Some(churn) = snapshot.get("churn") {
                        let count = churn.segment_count();
                        assert!((4..=5).contains(&count), "partial churn aggregate: {count}");
                    }

                    for data_source in manager.inventory() {
                        for seg in data_source.segments() {
                            assert_eq!(seg.data_source(), data_source.name());
                        }
                    }

                    observed += 1;
                    if done.load(Ordering::Acquire) {
                        break observed;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for round in 0..60 {
        assert!(matches!(manager.poll().await, PollOutcome::Published { .. }));

        if round % 10 == 9 {
            manager.remove_data_source("churn").await.unwrap();
            assert!(manager.inventory_value("churn").is_none());
            manager.enable_data_source("churn").await.unwrap();
        } else {
            let seg = &churn[round % churn.len()];
            manager.remove_segment("churn", seg.id()).await.unwrap();
            manager.enable_segment(seg.id()).await.unwrap();
        }
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let observed = reader.await.expect("reader task panicked");
        assert!(observed > 0);
    }
    assert_eq!(
        manager.poll().await,
        PollOutcome::Published {
            data_sources: 2,
            segments: 8
        }
    );
}
