//! Segment manager: keeps the in-memory inventory in sync with the segment table.
//!
//! A background task rebuilds the whole inventory from the rows flagged used and publishes
//! it with a single atomic swap. Administrative operations flip `used` flags in the store;
//! removals are also applied to the published inventory right away, enables only show up
//! after the next poll.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use segcat_core::{
    CoreError, CoreResult, DataSegment, DataSource, Interval, Inventory, SegmentMetadataStore,
    VersionedIntervalTimeline,
};
use tokio::task::JoinHandle;

use crate::metrics;

/// Construction-time settings of a [`SegmentManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentManagerConfig {
    /// Delay between the end of one poll and the start of the next.
    pub poll_period: Duration,
    /// Segment table every store call targets.
    pub segment_table: String,
}

impl Default for SegmentManagerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_secs(60),
            segment_table: "segments".to_string(),
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new inventory was published.
    Published {
        data_sources: usize,
        segments: usize,
    },
    /// The store returned no used rows; the previous inventory was kept.
    Empty,
    /// The cycle failed; the previous inventory was kept.
    Failed,
}

impl PollOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Published { .. } => "published",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

/// State shared between the manager and its poll task.
struct Shared {
    store: Arc<dyn SegmentMetadataStore>,
    config: SegmentManagerConfig,
    inventory: ArcSwap<Inventory>,
}

impl Shared {
    async fn poll(&self) -> PollOutcome {
        let timer = metrics::POLL_DURATION_SECONDS.start_timer();

        let outcome = match self.load_inventory().await {
            Ok(Some(inventory)) => {
                let data_sources = inventory.len();
                let segments = inventory.segment_count();
                self.inventory.store(Arc::new(inventory));

                metrics::INVENTORY_DATA_SOURCES.set(data_sources as f64);
                metrics::INVENTORY_SEGMENTS.set(segments as f64);
                tracing::info!(data_sources, segments, "Published segment inventory");

                PollOutcome::Published {
                    data_sources,
                    segments,
                }
            }
            Ok(None) => {
                tracing::warn!(
                    table = %self.config.segment_table,
                    "No used segments found, keeping previous inventory"
                );
                PollOutcome::Empty
            }
            Err(e) => {
                tracing::error!(
                    table = %self.config.segment_table,
                    error = %e,
                    "Segment poll failed, keeping previous inventory"
                );
                PollOutcome::Failed
            }
        };

        timer.observe_duration();
        metrics::POLL_RUNS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn load_inventory(&self) -> CoreResult<Option<Inventory>> {
        let payloads = self.store.used_payloads(&self.config.segment_table).await?;
        if payloads.is_empty() {
            return Ok(None);
        }

        let segments = payloads
            .iter()
            .map(|payload| DataSegment::from_payload(payload))
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Some(Inventory::from_segments(segments)))
    }
}

/// Owner of the published segment inventory.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use segcat_core::SegmentMetadataStore;
/// # use segcat_service::{SegmentManager, SegmentManagerConfig};
/// # async fn example(store: Arc<dyn SegmentMetadataStore>) -> segcat_core::CoreResult<()> {
/// let manager = SegmentManager::new(store, SegmentManagerConfig::default());
/// manager.start();
///
/// manager.enable_data_source("wikipedia").await?;
/// for data_source in manager.inventory() {
///     println!("{}: {} segments", data_source.name(), data_source.segment_count());
/// }
///
/// manager.stop();
/// # Ok(())
/// # }
/// ```
pub struct SegmentManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl SegmentManager {
    pub fn new(store: Arc<dyn SegmentMetadataStore>, config: SegmentManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                inventory: ArcSwap::from_pointee(Inventory::new()),
            }),
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SegmentManagerConfig {
        &self.shared.config
    }

    /// Starts the background poll task. The first poll runs immediately.
    ///
    /// Calling `start` on a started manager does nothing. Must be called within a tokio
    /// runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if self.started.load(Ordering::Acquire) {
            tracing::debug!("Segment manager already started");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let period = shared.config.poll_period;
        let handle = tokio::spawn(async move {
            loop {
                shared.poll().await;
                tokio::time::sleep(period).await;
            }
        });

        *worker = Some(handle);
        self.started.store(true, Ordering::Release);
        tracing::info!(poll_period = ?period, "Segment manager started");
    }

    /// Stops polling and publishes an empty inventory.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        if !self.started.load(Ordering::Acquire) {
            return;
        }

        if let Some(handle) = worker.take() {
            handle.abort();
        }
        self.shared.inventory.store(Arc::new(Inventory::new()));
        metrics::INVENTORY_DATA_SOURCES.set(0.0);
        metrics::INVENTORY_SEGMENTS.set(0.0);
        self.started.store(false, Ordering::Release);
        tracing::info!("Segment manager stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Rebuilds the inventory from the used rows of the segment table.
    ///
    /// Never fails: an empty result or an error keeps the previous inventory.
    pub async fn poll(&self) -> PollOutcome {
        self.shared.poll().await
    }

    /// Marks used every segment of `data_source` that is visible on the timeline.
    ///
    /// Segments fully overshadowed by a higher version stay unused. The inventory is not
    /// updated; the change shows up after the next poll.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` when the datasource has no segments to enable, and whatever
    /// the store or the payload decoder reports.
    pub async fn enable_data_source(&self, data_source: &str) -> CoreResult<()> {
        let result = self.try_enable_data_source(data_source).await;
        if let Err(e) = &result {
            tracing::warn!(data_source, error = %e, "Failed to enable datasource");
        }
        metrics::record_admin("enable_data_source", &result);
        result
    }

    async fn try_enable_data_source(&self, data_source: &str) -> CoreResult<()> {
        let table = &self.shared.config.segment_table;
        let payloads = self.shared.store.all_payloads(table, data_source).await?;

        let mut timeline = VersionedIntervalTimeline::<String, DataSegment>::new();
        for payload in &payloads {
            let segment = DataSegment::from_payload(payload)?;
            let interval = segment.interval();
            let version = segment.version().to_string();
            timeline.add(interval, version, segment.into_chunk());
        }

        let overshadowed = timeline.find_overshadowed();
        if !overshadowed.is_empty() {
            tracing::debug!(
                data_source,
                overshadowed = overshadowed.len(),
                "Leaving overshadowed segments unused"
            );
        }

        let mut seen = HashSet::new();
        let mut segment_ids = Vec::new();
        for holder in timeline.lookup(&Interval::unbounded()) {
            if !holder.partitions().is_complete() {
                tracing::warn!(
                    data_source,
                    interval = %holder.true_interval(),
                    version = %holder.version(),
                    "Enabling incomplete partition set"
                );
            }
            for segment in holder.into_partitions().objects() {
                if seen.insert(segment.id().to_string()) {
                    segment_ids.push(segment.id().to_string());
                }
            }
        }

        if segment_ids.is_empty() {
            return Err(CoreError::not_found("segments", data_source));
        }

        self.shared.store.mark_used_batch(table, &segment_ids).await?;
        tracing::info!(data_source, segments = segment_ids.len(), "Enabled datasource");
        Ok(())
    }

    /// Marks one segment used. Unknown ids are not reported.
    pub async fn enable_segment(&self, segment_id: &str) -> CoreResult<()> {
        let result = self
            .shared
            .store
            .mark_used(&self.shared.config.segment_table, segment_id)
            .await;

        match &result {
            Ok(()) => tracing::info!(segment_id, "Enabled segment"),
            Err(e) => tracing::warn!(segment_id, error = %e, "Failed to enable segment"),
        }
        metrics::record_admin("enable_segment", &result);
        result
    }

    /// Marks every segment of a datasource unused and drops it from the inventory.
    ///
    /// # Errors
    ///
    /// `CoreError::NotFound` if the datasource is not in the inventory; the store is not
    /// touched in that case.
    pub async fn remove_data_source(&self, data_source: &str) -> CoreResult<()> {
        let result = self.try_remove_data_source(data_source).await;
        if let Err(e) = &result {
            tracing::warn!(data_source, error = %e, "Failed to remove datasource");
        }
        metrics::record_admin("remove_data_source", &result);
        result
    }

    async fn try_remove_data_source(&self, data_source: &str) -> CoreResult<()> {
        if !self.shared.inventory.load().contains(data_source) {
            return Err(CoreError::not_found("datasource", data_source));
        }

        self.shared
            .store
            .mark_data_source_unused(&self.shared.config.segment_table, data_source)
            .await?;

        self.shared.inventory.load().remove(data_source);
        tracing::info!(data_source, "Removed datasource");
        Ok(())
    }

    /// Marks one segment unused and removes it from the inventory.
    ///
    /// The store update is applied first. If the datasource is then missing from the
    /// inventory the call fails with `CoreError::NotFound` although the row stays unused.
    pub async fn remove_segment(&self, data_source: &str, segment_id: &str) -> CoreResult<()> {
        let result = self.try_remove_segment(data_source, segment_id).await;
        if let Err(e) = &result {
            tracing::warn!(data_source, segment_id, error = %e, "Failed to remove segment");
        }
        metrics::record_admin("remove_segment", &result);
        result
    }

    async fn try_remove_segment(&self, data_source: &str, segment_id: &str) -> CoreResult<()> {
        self.shared
            .store
            .mark_unused(&self.shared.config.segment_table, segment_id)
            .await?;

        match self
            .shared
            .inventory
            .load()
            .remove_segment(data_source, segment_id)
        {
            Some(found) => {
                tracing::info!(data_source, segment_id, found, "Removed segment");
                Ok(())
            }
            None => Err(CoreError::not_found("datasource", data_source)),
        }
    }

    pub fn inventory_value(&self, data_source: &str) -> Option<Arc<DataSource>> {
        self.shared.inventory.load().get(data_source)
    }

    /// Datasources of the published inventory, ordered by name.
    pub fn inventory(&self) -> Vec<Arc<DataSource>> {
        self.shared.inventory.load().data_sources()
    }

    /// The published inventory itself.
    pub fn snapshot(&self) -> Arc<Inventory> {
        self.shared.inventory.load_full()
    }
}

impl Drop for SegmentManager {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take() {
            handle.abort();
        }
    }
}
