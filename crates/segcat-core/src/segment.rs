use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreResult;
use crate::interval::{format_instant, Interval};
use crate::shard::{PartitionChunk, ShardSpec};

/// Immutable description of one stored data segment.
///
/// Equality and hashing use the identifier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SegmentPayload", into = "SegmentPayload")]
pub struct DataSegment {
    id: String,
    data_source: String,
    interval: Interval,
    version: String,
    load_spec: Map<String, Value>,
    dimensions: Vec<String>,
    metrics: Vec<String>,
    shard_spec: ShardSpec,
    binary_version: Option<u32>,
    size: u64,
}

/// Wire form of a segment as persisted in the `payload` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentPayload {
    data_source: String,
    interval: Interval,
    version: String,
    #[serde(default)]
    load_spec: Map<String, Value>,
    #[serde(default)]
    dimensions: Vec<String>,
    #[serde(default)]
    metrics: Vec<String>,
    #[serde(default)]
    shard_spec: ShardSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    binary_version: Option<u32>,
    #[serde(default)]
    size: u64,
    #[serde(default, skip_deserializing)]
    identifier: String,
}

impl From<SegmentPayload> for DataSegment {
    fn from(payload: SegmentPayload) -> Self {
        let id = segment_id(
            &payload.data_source,
            &payload.interval,
            &payload.version,
            payload.shard_spec.partition_num(),
        );
        Self {
            id,
            data_source: payload.data_source,
            interval: payload.interval,
            version: payload.version,
            load_spec: payload.load_spec,
            dimensions: payload.dimensions,
            metrics: payload.metrics,
            shard_spec: payload.shard_spec,
            binary_version: payload.binary_version,
            size: payload.size,
        }
    }
}

impl From<DataSegment> for SegmentPayload {
    fn from(segment: DataSegment) -> Self {
        Self {
            data_source: segment.data_source,
            interval: segment.interval,
            version: segment.version,
            load_spec: segment.load_spec,
            dimensions: segment.dimensions,
            metrics: segment.metrics,
            shard_spec: segment.shard_spec,
            binary_version: segment.binary_version,
            size: segment.size,
            identifier: segment.id,
        }
    }
}

/// Builds the stable identifier `{dataSource}_{start}_{end}_{version}[_{partitionNum}]`.
#[must_use]
pub fn segment_id(data_source: &str, interval: &Interval, version: &str, partition_num: u32) -> String {
    let mut id = format!(
        "{}_{}_{}_{}",
        data_source,
        format_instant(&interval.start()),
        format_instant(&interval.end()),
        version
    );
    if partition_num != 0 {
        id.push('_');
        id.push_str(&partition_num.to_string());
    }
    id
}

impl DataSegment {
    /// Creates an unpartitioned segment with an empty load spec.
    #[must_use]
    pub fn new(data_source: impl Into<String>, interval: Interval, version: impl Into<String>) -> Self {
        SegmentPayload {
            data_source: data_source.into(),
            interval,
            version: version.into(),
            load_spec: Map::new(),
            dimensions: Vec::new(),
            metrics: Vec::new(),
            shard_spec: ShardSpec::NoShard,
            binary_version: None,
            size: 0,
            identifier: String::new(),
        }
        .into()
    }

    /// Returns a copy placed under a different shard descriptor. The id changes with it.
    #[must_use]
    pub fn with_shard_spec(self, shard_spec: ShardSpec) -> Self {
        let mut payload = SegmentPayload::from(self);
        payload.shard_spec = shard_spec;
        payload.into()
    }

    #[must_use]
    pub fn with_load_spec(self, load_spec: Map<String, Value>) -> Self {
        Self { load_spec, ..self }
    }

    #[must_use]
    pub fn with_size(self, size: u64) -> Self {
        Self { size, ..self }
    }

    #[must_use]
    pub fn with_columns(self, dimensions: Vec<String>, metrics: Vec<String>) -> Self {
        Self {
            dimensions,
            metrics,
            ..self
        }
    }

    /// Decodes a persisted payload.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::DeserializationError` when the payload is malformed.
    pub fn from_payload(payload: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Encodes the segment into its persisted JSON form.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::SerializationError` if encoding fails.
    pub fn to_payload(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    #[must_use]
    pub fn interval(&self) -> Interval {
        self.interval
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn shard_spec(&self) -> &ShardSpec {
        &self.shard_spec
    }

    #[must_use]
    pub fn load_spec(&self) -> &Map<String, Value> {
        &self.load_spec
    }

    #[must_use]
    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    #[must_use]
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Wraps the segment into the timeline chunk its shard descriptor calls for.
    #[must_use]
    pub fn into_chunk(self) -> PartitionChunk<DataSegment> {
        let shard_spec = self.shard_spec.clone();
        shard_spec.chunk(self)
    }
}

impl PartialEq for DataSegment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataSegment {}

impl Hash for DataSegment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for DataSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    const PAYLOAD: &str = r#"{
        "dataSource": "wikipedia",
        "interval": "2012-01-01T00:00:00.000Z/2012-01-02T00:00:00.000Z",
        "version": "2012-01-03T00:00:00.000Z",
        "loadSpec": {"type": "s3_zip", "bucket": "segments", "key": "wikipedia/index.zip"},
        "dimensions": ["page", "language"],
        "metrics": ["count"],
        "shardSpec": {"type": "linear", "partitionNum": 2},
        "size": 1024
    }"#;

    #[test]
    fn decodes_payload_and_derives_id() {
        let segment = DataSegment::from_payload(PAYLOAD).unwrap();
        assert_eq!(segment.data_source(), "wikipedia");
        assert_eq!(segment.size(), 1024);
        assert_eq!(segment.shard_spec().partition_num(), 2);
        assert_eq!(
            segment.id(),
            "wikipedia_2012-01-01T00:00:00.000Z_2012-01-02T00:00:00.000Z_2012-01-03T00:00:00.000Z_2"
        );
        assert_eq!(segment.load_spec()["bucket"], "segments");
    }

    #[test]
    fn partition_zero_is_omitted_from_id() {
        let interval = "2012-01-01T00:00:00Z/2012-01-02T00:00:00Z".parse().unwrap();
        let segment = DataSegment::new("wiki", interval, "v1");
        assert_eq!(
            segment.id(),
            "wiki_2012-01-01T00:00:00.000Z_2012-01-02T00:00:00.000Z_v1"
        );

        let sharded = segment.with_shard_spec(ShardSpec::Linear { partition_num: 3 });
        assert!(sharded.id().ends_with("_v1_3"));
    }

    #[test]
    fn encoded_payload_decodes_to_equal_segment() {
        let segment = DataSegment::from_payload(PAYLOAD).unwrap();
        let encoded = segment.to_payload().unwrap();
        assert!(encoded.contains("\"identifier\""));

        let decoded = DataSegment::from_payload(&encoded).unwrap();
        assert_eq!(decoded, segment);
        assert_eq!(decoded.dimensions(), segment.dimensions());
        assert_eq!(decoded.load_spec(), segment.load_spec());
    }

    #[test]
    fn malformed_payloads_are_deserialization_errors() {
        for payload in [
            "not json",
            r#"{"dataSource": "wiki"}"#,
            r#"{"dataSource": "wiki", "interval": "2012-01-02T00:00:00Z/2012-01-01T00:00:00Z", "version": "v1"}"#,
        ] {
            let err = DataSegment::from_payload(payload).unwrap_err();
            assert!(
                matches!(err, CoreError::DeserializationError(_)),
                "unexpected error for {payload}: {err}"
            );
        }
    }
}
