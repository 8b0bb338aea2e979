use chrono::{SecondsFormat, Utc};
use segcat_core::{CoreError, CoreResult, DataSegment, SegmentMetadataStore};
use sqlx::{query, query_scalar, Sqlite, SqlitePool};

use crate::util::SqliteTransaction;

/// SQLite-backed gateway to a segment table.
///
/// The table name is interpolated into SQL, so every entry point validates it first.
#[derive(Clone)]
pub struct SqliteSegmentRepository {
    pool: SqlitePool,
}

impl SqliteSegmentRepository {
    /// Creates a new repository backed by the provided pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the segment table and its indexes if they do not exist yet.
    pub async fn create_segment_table(&self, table: &str) -> CoreResult<()> {
        validate_table_name(table)?;

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT NOT NULL PRIMARY KEY,
                    data_source TEXT NOT NULL,
                    created_date TEXT NOT NULL,
                    start TEXT NOT NULL,
                    "end" TEXT NOT NULL,
                    partitioned INTEGER NOT NULL,
                    version TEXT NOT NULL,
                    used INTEGER NOT NULL,
                    payload TEXT NOT NULL
                )
                "#
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_data_source ON {table} (data_source)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_used ON {table} (used)"),
        ];

        for statement in &statements {
            query(statement)
                .execute(&self.pool)
                .await
                .map_err(|err| map_sqlx_error("segment table", table, err))?;
        }

        tracing::debug!(table, "Segment table ready");
        Ok(())
    }

    /// Persists a segment with its JSON payload.
    pub async fn insert_segment(
        &self,
        table: &str,
        segment: &DataSegment,
        used: bool,
    ) -> CoreResult<()> {
        validate_table_name(table)?;

        let payload = segment.to_payload()?;
        let created_date = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let interval = segment.interval();
        let start = interval.start().to_rfc3339_opts(SecondsFormat::Millis, true);
        let end = interval.end().to_rfc3339_opts(SecondsFormat::Millis, true);
        let partitioned = segment.shard_spec().partition_num() != 0;

        query(&format!(
            r#"
            INSERT INTO {table} (
                id,
                data_source,
                created_date,
                start,
                "end",
                partitioned,
                version,
                used,
                payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#
        ))
        .bind(segment.id())
        .bind(segment.data_source())
        .bind(created_date)
        .bind(start)
        .bind(end)
        .bind(partitioned)
        .bind(segment.version())
        .bind(used)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|err| map_sqlx_error("segment", segment.id(), err))
    }

    /// Returns the `used` flag of a segment, or `None` for an unknown id.
    pub async fn is_used(&self, table: &str, segment_id: &str) -> CoreResult<Option<bool>> {
        validate_table_name(table)?;

        query_scalar::<Sqlite, bool>(&format!("SELECT used FROM {table} WHERE id = ?1"))
            .bind(segment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("segment", segment_id, err))
    }

    async fn fetch_payloads(&self, sql: &str, bind: Option<&str>) -> CoreResult<Vec<String>> {
        let mut statement = query_scalar::<Sqlite, String>(sql);
        if let Some(value) = bind {
            statement = statement.bind(value);
        }
        statement
            .fetch_all(&self.pool)
            .await
            .map_err(|err| CoreError::storage(err.to_string()))
    }

    async fn set_used(&self, table: &str, segment_id: &str, used: bool) -> CoreResult<()> {
        validate_table_name(table)?;

        let result = query(&format!("UPDATE {table} SET used = ?1 WHERE id = ?2"))
            .bind(used)
            .bind(segment_id)
            .execute(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("segment", segment_id, err))?;

        tracing::debug!(
            table,
            segment_id,
            used,
            updated = result.rows_affected(),
            "Updated segment flag"
        );
        Ok(())
    }

    async fn update_used<'e>(
        tx: &mut SqliteTransaction<'e>,
        table: &str,
        segment_id: &str,
        used: bool,
    ) -> CoreResult<u64> {
        query(&format!("UPDATE {table} SET used = ?1 WHERE id = ?2"))
            .bind(used)
            .bind(segment_id)
            .execute(&mut **tx)
            .await
            .map(|result| result.rows_affected())
            .map_err(|err| map_sqlx_error("segment", segment_id, err))
    }
}

#[async_trait::async_trait]
impl SegmentMetadataStore for SqliteSegmentRepository {
    async fn used_payloads(&self, table: &str) -> CoreResult<Vec<String>> {
        validate_table_name(table)?;
        self.fetch_payloads(&format!("SELECT payload FROM {table} WHERE used = 1"), None)
            .await
    }

    async fn all_payloads(&self, table: &str, data_source: &str) -> CoreResult<Vec<String>> {
        validate_table_name(table)?;
        self.fetch_payloads(
            &format!("SELECT payload FROM {table} WHERE data_source = ?1"),
            Some(data_source),
        )
        .await
    }

    async fn mark_used_batch(&self, table: &str, segment_ids: &[String]) -> CoreResult<()> {
        validate_table_name(table)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| CoreError::storage(err.to_string()))?;

        let mut updated = 0_u64;
        for segment_id in segment_ids {
            updated += Self::update_used(&mut tx, table, segment_id, true).await?;
        }

        tx.commit()
            .await
            .map_err(|err| CoreError::storage(err.to_string()))?;

        tracing::debug!(
            table,
            requested = segment_ids.len(),
            updated,
            "Marked segments used"
        );
        Ok(())
    }

    async fn mark_used(&self, table: &str, segment_id: &str) -> CoreResult<()> {
        self.set_used(table, segment_id, true).await
    }

    async fn mark_unused(&self, table: &str, segment_id: &str) -> CoreResult<()> {
        self.set_used(table, segment_id, false).await
    }

    async fn mark_data_source_unused(&self, table: &str, data_source: &str) -> CoreResult<()> {
        validate_table_name(table)?;

        let result = query(&format!(
            "UPDATE {table} SET used = 0 WHERE data_source = ?1"
        ))
        .bind(data_source)
        .execute(&self.pool)
        .await
        .map_err(|err| map_sqlx_error("datasource", data_source, err))?;

        tracing::debug!(
            table,
            data_source,
            updated = result.rows_affected(),
            "Marked datasource unused"
        );
        Ok(())
    }
}

/// Accepts `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_table_name(table: &str) -> CoreResult<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(CoreError::ValidationError(format!(
            "invalid segment table name `{table}`"
        )))
    }
}

fn map_sqlx_error(entity: &'static str, id: &str, err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            if message.contains("UNIQUE constraint failed") {
                CoreError::already_exists(entity, id)
            } else {
                CoreError::storage(message)
            }
        }
        other => CoreError::storage(other.to_string()),
    }
}
