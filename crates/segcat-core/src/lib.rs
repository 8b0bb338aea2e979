//! Core domain types for the segment catalog: segment records, datasource aggregates,
//! the versioned interval timeline and the metadata store gateway contract.

pub mod datasource;
pub mod error;
pub mod interval;
pub mod segment;
pub mod shard;
pub mod timeline;
pub mod traits;

pub use datasource::{DataSource, Inventory, CREATED_PROPERTY};
pub use error::{CoreError, CoreResult};
pub use interval::Interval;
pub use segment::DataSegment;
pub use shard::{ChunkBounds, PartitionChunk, PartitionHolder, ShardSpec};
pub use timeline::{TimelineObjectHolder, VersionedIntervalTimeline};
pub use traits::SegmentMetadataStore;
