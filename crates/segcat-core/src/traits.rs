use async_trait::async_trait;

use crate::error::CoreResult;

/// Gateway to the persistent segment table.
///
/// Every call names the table it operates on. Implementations are expected to bound each
/// call with their own timeout policy; callers never retry.
#[async_trait]
pub trait SegmentMetadataStore: Send + Sync {
    /// Returns the payload of every row flagged used.
    async fn used_payloads(&self, table: &str) -> CoreResult<Vec<String>>;

    /// Returns the payload of every row of one datasource, used or not.
    async fn all_payloads(&self, table: &str, data_source: &str) -> CoreResult<Vec<String>>;

    /// Flags every listed segment as used in a single batch.
    async fn mark_used_batch(&self, table: &str, segment_ids: &[String]) -> CoreResult<()>;

    /// Flags one segment as used. Unknown ids are not an error.
    async fn mark_used(&self, table: &str, segment_id: &str) -> CoreResult<()>;

    /// Flags one segment as unused. Unknown ids are not an error.
    async fn mark_unused(&self, table: &str, segment_id: &str) -> CoreResult<()>;

    /// Flags every segment of a datasource as unused.
    async fn mark_data_source_unused(&self, table: &str, data_source: &str) -> CoreResult<()>;
}
