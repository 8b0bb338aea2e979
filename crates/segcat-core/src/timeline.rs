//! Versioned interval timeline.
//!
//! Entries are keyed by their exact (interval, version). Chunks added under the same key
//! become siblings in one [`PartitionHolder`]. Across overlapping intervals the highest
//! version owns each instant; a lower version stays visible only on the sub-ranges no
//! higher version covers. Overlapping entries of equal version are both visible.
//!
//! The visible spans of an entry are always the maximal connected pieces of its interval
//! minus the intervals of every higher-version entry, whatever the insertion order.

use std::collections::{BTreeMap, BTreeSet};

use crate::interval::Interval;
use crate::shard::{PartitionChunk, PartitionHolder};

/// A visible portion of one (interval, version) entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct VisibleSpan<V> {
    span: Interval,
    version: V,
    interval: Interval,
}

/// One authoritative (interval, version) entry as returned by a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineObjectHolder<V, T> {
    interval: Interval,
    true_interval: Interval,
    version: V,
    partitions: PartitionHolder<T>,
}

impl<V, T> TimelineObjectHolder<V, T> {
    /// The sub-range this entry is visible on, clipped to the lookup range.
    #[must_use]
    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// The interval the entry's chunks were added with.
    #[must_use]
    pub fn true_interval(&self) -> Interval {
        self.true_interval
    }

    #[must_use]
    pub fn version(&self) -> &V {
        &self.version
    }

    #[must_use]
    pub fn partitions(&self) -> &PartitionHolder<T> {
        &self.partitions
    }

    pub fn into_partitions(self) -> PartitionHolder<T> {
        self.partitions
    }
}

#[derive(Debug)]
pub struct VersionedIntervalTimeline<V, T> {
    entries: BTreeMap<Interval, BTreeMap<V, PartitionHolder<T>>>,
    visible: BTreeSet<VisibleSpan<V>>,
}

impl<V, T> Default for VersionedIntervalTimeline<V, T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            visible: BTreeSet::new(),
        }
    }
}

impl<V, T> VersionedIntervalTimeline<V, T>
where
    V: Ord + Clone,
    T: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct (interval, version) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts one chunk under `(interval, version)`.
    pub fn add(&mut self, interval: Interval, version: V, chunk: PartitionChunk<T>) {
        let versions = self.entries.entry(interval).or_default();
        if let Some(holder) = versions.get_mut(&version) {
            holder.add(chunk);
            return;
        }

        let mut holder = PartitionHolder::new();
        holder.add(chunk);
        versions.insert(version.clone(), holder);
        self.reveal(interval, version);
    }

    /// Removes one chunk. The entry disappears with its last chunk, uncovering whatever it
    /// was hiding.
    pub fn remove(
        &mut self,
        interval: &Interval,
        version: &V,
        partition_num: u32,
    ) -> Option<PartitionChunk<T>> {
        let versions = self.entries.get_mut(interval)?;
        let holder = versions.get_mut(version)?;
        let removed = holder.remove(partition_num)?;

        if holder.is_empty() {
            versions.remove(version);
            if versions.is_empty() {
                self.entries.remove(interval);
            }
            self.rebuild_visible();
        }
        Some(removed)
    }

    /// Authoritative entries overlapping `query`, ordered by visible sub-range.
    #[must_use]
    pub fn lookup(&self, query: &Interval) -> Vec<TimelineObjectHolder<V, T>> {
        let mut holders: Vec<_> = self
            .visible
            .iter()
            .take_while(|visible| visible.span.start() < query.end())
            .filter_map(|visible| {
                let clipped = visible.span.overlap(query)?;
                let partitions = self.holder(&visible.interval, &visible.version)?;
                Some(TimelineObjectHolder {
                    interval: clipped,
                    true_interval: visible.interval,
                    version: visible.version.clone(),
                    partitions: partitions.clone(),
                })
            })
            .collect();

        holders.sort_by(|a, b| {
            a.interval
                .cmp(&b.interval)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.true_interval.cmp(&b.true_interval))
        });
        holders
    }

    /// Entries that are not visible anywhere because higher versions cover them entirely.
    #[must_use]
    pub fn find_overshadowed(&self) -> Vec<TimelineObjectHolder<V, T>> {
        let visible: BTreeSet<(&Interval, &V)> = self
            .visible
            .iter()
            .map(|visible| (&visible.interval, &visible.version))
            .collect();

        self.entries
            .iter()
            .flat_map(|(interval, versions)| {
                versions
                    .iter()
                    .map(move |(version, partitions)| (interval, version, partitions))
            })
            .filter(|(interval, version, _)| !visible.contains(&(*interval, *version)))
            .map(|(interval, version, partitions)| TimelineObjectHolder {
                interval: *interval,
                true_interval: *interval,
                version: version.clone(),
                partitions: partitions.clone(),
            })
            .collect()
    }

    fn holder(&self, interval: &Interval, version: &V) -> Option<&PartitionHolder<T>> {
        self.entries.get(interval)?.get(version)
    }

    fn rebuild_visible(&mut self) {
        self.visible.clear();
        let keys: Vec<(Interval, V)> = self
            .entries
            .iter()
            .flat_map(|(interval, versions)| {
                versions.keys().map(move |version| (*interval, version.clone()))
            })
            .collect();
        for (interval, version) in keys {
            self.reveal(interval, version);
        }
    }

    /// Makes a new entry visible wherever no higher version covers it and clips lower
    /// versions out of its interval.
    fn reveal(&mut self, interval: Interval, version: V) {
        let overlapping: Vec<VisibleSpan<V>> = self
            .visible
            .iter()
            .take_while(|visible| visible.span.start() < interval.end())
            .filter(|visible| visible.span.overlaps(&interval))
            .cloned()
            .collect();

        let mut pieces = vec![interval];
        for existing in overlapping {
            match existing.version.cmp(&version) {
                std::cmp::Ordering::Greater => {
                    pieces = pieces
                        .iter()
                        .flat_map(|piece| piece.minus(&existing.span))
                        .collect();
                }
                std::cmp::Ordering::Less => {
                    self.visible.remove(&existing);
                    for rest in existing.span.minus(&interval) {
                        self.visible.insert(VisibleSpan {
                            span: rest,
                            version: existing.version.clone(),
                            interval: existing.interval,
                        });
                    }
                }
                std::cmp::Ordering::Equal => {}
            }
        }

        for span in pieces {
            self.visible.insert(VisibleSpan {
                span,
                version: version.clone(),
                interval,
            });
        }
    }
}
