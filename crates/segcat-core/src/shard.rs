use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Describes how a segment's chunk is placed within the chunk set of its (interval, version).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ShardSpec {
    /// The segment is the only partition of its interval.
    #[default]
    #[serde(rename = "none")]
    NoShard,
    /// Open-ended partitioning; any set of partitions is complete.
    #[serde(rename = "linear")]
    Linear {
        #[serde(rename = "partitionNum")]
        partition_num: u32,
    },
    /// A fixed number of partitions, all of which must be present.
    #[serde(rename = "numbered")]
    Numbered {
        #[serde(rename = "partitionNum")]
        partition_num: u32,
        partitions: u32,
    },
    /// Range partitioning on a single string dimension. `None` bounds are open.
    #[serde(rename = "single")]
    Single {
        dimension: String,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        end: Option<String>,
        #[serde(rename = "partitionNum")]
        partition_num: u32,
    },
}

impl ShardSpec {
    #[must_use]
    pub fn partition_num(&self) -> u32 {
        match self {
            Self::NoShard => 0,
            Self::Linear { partition_num }
            | Self::Numbered { partition_num, .. }
            | Self::Single { partition_num, .. } => *partition_num,
        }
    }

    /// Wraps `object` into the chunk this descriptor places it as.
    pub fn chunk<T>(&self, object: T) -> PartitionChunk<T> {
        let bounds = match self {
            Self::NoShard => ChunkBounds::Singleton,
            Self::Linear { .. } => ChunkBounds::Linear,
            Self::Numbered { partitions, .. } => ChunkBounds::Numbered {
                partitions: *partitions,
            },
            Self::Single { start, end, .. } => ChunkBounds::Range {
                start: start.clone(),
                end: end.clone(),
            },
        };
        PartitionChunk {
            partition_num: self.partition_num(),
            bounds,
            object,
        }
    }
}

/// Placement metadata derived from a [`ShardSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkBounds {
    Singleton,
    Linear,
    Numbered { partitions: u32 },
    Range {
        start: Option<String>,
        end: Option<String>,
    },
}

/// One partition of an (interval, version) entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionChunk<T> {
    partition_num: u32,
    bounds: ChunkBounds,
    object: T,
}

impl<T> PartitionChunk<T> {
    #[must_use]
    pub fn partition_num(&self) -> u32 {
        self.partition_num
    }

    #[must_use]
    pub fn bounds(&self) -> &ChunkBounds {
        &self.bounds
    }

    #[must_use]
    pub fn object(&self) -> &T {
        &self.object
    }

    pub fn into_object(self) -> T {
        self.object
    }
}

/// Sibling chunks sharing one (interval, version), keyed by partition number.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionHolder<T> {
    chunks: BTreeMap<u32, PartitionChunk<T>>,
}

impl<T> Default for PartitionHolder<T> {
    fn default() -> Self {
        Self {
            chunks: BTreeMap::new(),
        }
    }
}

impl<T> PartitionHolder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk, returning the chunk previously stored under the same partition number.
    pub fn add(&mut self, chunk: PartitionChunk<T>) -> Option<PartitionChunk<T>> {
        self.chunks.insert(chunk.partition_num, chunk)
    }

    pub fn remove(&mut self, partition_num: u32) -> Option<PartitionChunk<T>> {
        self.chunks.remove(&partition_num)
    }

    /// Chunks in ascending partition order.
    pub fn iter(&self) -> impl Iterator<Item = &PartitionChunk<T>> {
        self.chunks.values()
    }

    pub fn objects(&self) -> impl Iterator<Item = &T> {
        self.chunks.values().map(PartitionChunk::object)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the holder has every partition its shard descriptors call for.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let Some(first) = self.chunks.values().next() else {
            return false;
        };

        match &first.bounds {
            ChunkBounds::Singleton | ChunkBounds::Linear => true,
            ChunkBounds::Numbered { partitions } => {
                (0..*partitions).all(|partition| self.chunks.contains_key(&partition))
            }
            ChunkBounds::Range { .. } => self.is_range_chain_complete(),
        }
    }

    fn is_range_chain_complete(&self) -> bool {
        let mut expected_start: Option<&String> = None;
        let mut last_end_open = false;

        for (position, chunk) in self.chunks.values().enumerate() {
            let ChunkBounds::Range { start, end } = &chunk.bounds else {
                return false;
            };
            if position == 0 {
                if start.is_some() {
                    return false;
                }
            } else if start.as_ref() != expected_start {
                return false;
            }
            expected_start = end.as_ref();
            last_end_open = end.is_none();
        }

        last_end_open
    }
}
