//! In-memory inventory of active segments.
//!
//! An [`Inventory`] is published as a whole and replaced on every poll. The maps inside it
//! are concurrent so that removals can be applied to the published snapshot in place;
//! readers iterating at the same time may or may not observe such a removal.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use dashmap::DashMap;

use crate::segment::DataSegment;

/// Property key holding the RFC 3339 creation timestamp of an aggregate.
pub const CREATED_PROPERTY: &str = "created";

/// A logical datasource and the set of its active segments.
#[derive(Debug)]
pub struct DataSource {
    name: String,
    properties: BTreeMap<String, String>,
    segments: DashMap<String, Arc<DataSegment>>,
}

impl DataSource {
    /// Creates an empty aggregate stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut properties = BTreeMap::new();
        properties.insert(
            CREATED_PROPERTY.to_string(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        Self::with_properties(name, properties)
    }

    #[must_use]
    pub fn with_properties(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            properties,
            segments: DashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Adds a segment unless one with the same id is already present.
    ///
    /// Returns `true` when the segment was inserted.
    pub fn add_segment(&self, segment: Arc<DataSegment>) -> bool {
        match self.segments.entry(segment.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(segment);
                true
            }
        }
    }

    pub fn remove_segment(&self, segment_id: &str) -> Option<Arc<DataSegment>> {
        self.segments.remove(segment_id).map(|(_, segment)| segment)
    }

    #[must_use]
    pub fn contains(&self, segment_id: &str) -> bool {
        self.segments.contains_key(segment_id)
    }

    /// Segments ordered by interval, then version, then id.
    #[must_use]
    pub fn segments(&self) -> Vec<Arc<DataSegment>> {
        let mut segments: Vec<_> = self
            .segments
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        segments.sort_by(|a, b| {
            a.interval()
                .cmp(&b.interval())
                .then_with(|| a.version().cmp(b.version()))
                .then_with(|| a.id().cmp(b.id()))
        });
        segments
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.segments.iter().map(|entry| entry.value().size()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Mapping from datasource name to its aggregate.
#[derive(Debug, Default)]
pub struct Inventory {
    data_sources: DashMap<String, Arc<DataSource>>,
}

impl Inventory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups segments by datasource, deduplicating by id.
    pub fn from_segments(segments: impl IntoIterator<Item = DataSegment>) -> Self {
        let inventory = Self::new();
        for segment in segments {
            inventory.add_segment(segment);
        }
        inventory
    }

    /// Adds a segment, creating its datasource aggregate on first sight.
    ///
    /// Returns `true` when the segment was not already present.
    pub fn add_segment(&self, segment: DataSegment) -> bool {
        let data_source = self
            .data_sources
            .entry(segment.data_source().to_string())
            .or_insert_with(|| Arc::new(DataSource::new(segment.data_source())))
            .clone();
        data_source.add_segment(Arc::new(segment))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<DataSource>> {
        self.data_sources
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.data_sources.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<DataSource>> {
        self.data_sources.remove(name).map(|(_, ds)| ds)
    }

    /// Removes a segment from its aggregate and drops the aggregate once it is empty.
    ///
    /// Returns `None` when the datasource is not present, otherwise whether the segment
    /// was found.
    pub fn remove_segment(&self, data_source: &str, segment_id: &str) -> Option<bool> {
        let aggregate = self.get(data_source)?;
        let removed = aggregate.remove_segment(segment_id).is_some();
        self.data_sources
            .remove_if(data_source, |_, current| current.is_empty());
        Some(removed)
    }

    /// Aggregates ordered by name.
    #[must_use]
    pub fn data_sources(&self) -> Vec<Arc<DataSource>> {
        let mut data_sources: Vec<_> = self
            .data_sources
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        data_sources.sort_by(|a, b| a.name().cmp(b.name()));
        data_sources
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data_sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_sources.is_empty()
    }

    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.data_sources
            .iter()
            .map(|entry| entry.value().segment_count())
            .sum()
    }
}
