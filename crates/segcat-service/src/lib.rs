//! Service layer for the segment catalog.
//! Owns the published inventory and the administrative enable/disable operations.

mod config;
pub mod metrics;
mod segment_manager;

pub use config::{Config, ConfigError, DatabaseConfig, LoggingConfig, SegmentsConfig};
pub use segment_manager::{PollOutcome, SegmentManager, SegmentManagerConfig};
