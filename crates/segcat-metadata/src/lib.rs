//! SQLite adapter for the persistent segment table.

mod segment_repository;
mod util;

pub use segment_repository::{validate_table_name, SqliteSegmentRepository};
pub use util::{create_sqlite_pool, create_sqlite_pool_with, SqliteTransaction};
