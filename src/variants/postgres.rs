use async_trait::async_trait;
use chrono::{DateTime, Utc};
use entity::image_variants::Status;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, QueryResult, Statement};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::VariantStoreError;

use super::{Variant, VariantStore};

#[derive(Clone)]
pub struct VariantStorePostgres {
    db: Arc<DatabaseConnection>,
}

impl VariantStorePostgres {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

fn status_to_db(s: Status) -> &'static str {
    match s {
        Status::Pending => "pending",
        Status::Processing => "processing",
        Status::Completed => "completed",
        Status::Failed => "failed",
    }
}

fn parse_status(s: &str) -> Result<Status, VariantStoreError> {
    match s {
        "pending" => Ok(Status::Pending),
        "processing" => Ok(Status::Processing),
        "completed" => Ok(Status::Completed),
        "failed" => Ok(Status::Failed),
        other => Err(VariantStoreError::Database(format!(
            "invalid variant status: {other}"
        ))),
    }
}

/// `base · 2^retry_count`, retry_count clamped to 5 so the delay never
/// exceeds an hour (mirrors `Config::backoff_for`, but the variant store has
/// no config dependency of its own — the pipeline and scanner pass `base`).
fn capped_delay(base: Duration, retry_count: i32) -> Duration {
    let capped = retry_count.clamp(0, 5) as u32;
    let delay = base * 2u32.saturating_pow(capped);
    delay.min(Duration::from_secs(60 * 60))
}

fn map_db_err(e: sea_orm::DbErr) -> VariantStoreError {
    VariantStoreError::Database(e.to_string())
}

fn row_to_variant(row: &QueryResult) -> Result<Variant, VariantStoreError> {
    let status: String = row.try_get("", "status").map_err(map_db_err)?;
    Ok(Variant {
        id: row.try_get("", "id").map_err(map_db_err)?,
        image_id: row.try_get("", "image_id").map_err(map_db_err)?,
        format: row.try_get("", "format").map_err(map_db_err)?,
        storage_identifier: row.try_get("", "storage_identifier").map_err(map_db_err)?,
        storage_path: row.try_get("", "storage_path").map_err(map_db_err)?,
        file_size_bytes: row.try_get("", "file_size_bytes").map_err(map_db_err)?,
        width: row.try_get("", "width").map_err(map_db_err)?,
        height: row.try_get("", "height").map_err(map_db_err)?,
        status: parse_status(&status)?,
        error_message: row.try_get("", "error_message").map_err(map_db_err)?,
        retry_count: row.try_get("", "retry_count").map_err(map_db_err)?,
        next_retry_at: row
            .try_get::<Option<DateTime<chrono::FixedOffset>>>("", "next_retry_at")
            .map_err(map_db_err)?
            .map(|d| d.with_timezone(&Utc)),
        created_at: row
            .try_get::<DateTime<chrono::FixedOffset>>("", "created_at")
            .map_err(map_db_err)?
            .with_timezone(&Utc),
        updated_at: row
            .try_get::<DateTime<chrono::FixedOffset>>("", "updated_at")
            .map_err(map_db_err)?
            .with_timezone(&Utc),
    })
}

const SELECT_COLUMNS: &str = "id, image_id, format, storage_identifier, storage_path, \
    file_size_bytes, width, height, status::text as status, error_message, retry_count, \
    next_retry_at, created_at, updated_at";

#[async_trait]
impl VariantStore for VariantStorePostgres {
    async fn upsert_pending(&self, image_id: i64, format: &str) -> Result<Variant, VariantStoreError> {
        let now = Utc::now().fixed_offset();
        let insert = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &format!(
                r#"
                INSERT INTO image_variants (image_id, format, status, retry_count, created_at, updated_at)
                VALUES ($1, $2, 'pending'::variant_status, 0, $3, $3)
                ON CONFLICT (image_id, format) DO NOTHING
                RETURNING {SELECT_COLUMNS}
                "#
            ),
            vec![image_id.into(), format.into(), now.into()],
        );
        if let Some(row) = self.db.query_one(insert).await.map_err(map_db_err)? {
            return row_to_variant(&row);
        }

        let select = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &format!("SELECT {SELECT_COLUMNS} FROM image_variants WHERE image_id = $1 AND format = $2"),
            vec![image_id.into(), format.into()],
        );
        let row = self
            .db
            .query_one(select)
            .await
            .map_err(map_db_err)?
            .ok_or(VariantStoreError::NotFound)?;
        row_to_variant(&row)
    }

    async fn cas_status(&self, id: i64, expected: Status, next: Status) -> Result<bool, VariantStoreError> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "UPDATE image_variants SET status = $3::variant_status, updated_at = $4 WHERE id = $1 AND status = $2::variant_status",
            vec![
                id.into(),
                status_to_db(expected).into(),
                status_to_db(next).into(),
                Utc::now().fixed_offset().into(),
            ],
        );
        let result = self.db.execute(stmt).await.map_err(map_db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: i64,
        storage_identifier: &str,
        storage_path: &str,
        file_size_bytes: i64,
        width: i32,
        height: i32,
    ) -> Result<(), VariantStoreError> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            UPDATE image_variants
            SET storage_identifier = $2, storage_path = $3, file_size_bytes = $4,
                width = $5, height = $6, status = 'completed'::variant_status, updated_at = $7
            WHERE id = $1 AND status = 'processing'::variant_status
            "#,
            vec![
                id.into(),
                storage_identifier.into(),
                storage_path.into(),
                file_size_bytes.into(),
                width.into(),
                height.into(),
                Utc::now().fixed_offset().into(),
            ],
        );
        let result = self.db.execute(stmt).await.map_err(map_db_err)?;
        if result.rows_affected() != 1 {
            return Err(VariantStoreError::WrongState(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: i64,
        err_msg: &str,
        allow_retry: bool,
        backoff_base: Duration,
    ) -> Result<(), VariantStoreError> {
        let now = Utc::now().fixed_offset();
        let stmt = if allow_retry {
            let current = Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                "SELECT retry_count FROM image_variants WHERE id = $1",
                vec![id.into()],
            );
            let row = self
                .db
                .query_one(current)
                .await
                .map_err(map_db_err)?
                .ok_or(VariantStoreError::NotFound)?;
            let retry_count: i32 = row.try_get("", "retry_count").map_err(map_db_err)?;
            let next_retry_count = retry_count + 1;
            let delay = capped_delay(backoff_base, next_retry_count);
            let next_retry_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
            Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                r#"
                UPDATE image_variants
                SET status = 'failed'::variant_status, error_message = $2,
                    retry_count = $3, next_retry_at = $4, updated_at = $5
                WHERE id = $1
                "#,
                vec![
                    id.into(),
                    err_msg.into(),
                    next_retry_count.into(),
                    next_retry_at.into(),
                    now.into(),
                ],
            )
        } else {
            Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                "UPDATE image_variants SET status = 'failed'::variant_status, error_message = $2, updated_at = $3 WHERE id = $1",
                vec![id.into(), err_msg.into(), now.into()],
            )
        };
        self.db.execute(stmt).await.map_err(map_db_err)?;
        Ok(())
    }

    async fn reset_for_retry(&self, id: i64, base: Duration) -> Result<(), VariantStoreError> {
        let current = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT retry_count FROM image_variants WHERE id = $1 AND status = 'failed'::variant_status",
            vec![id.into()],
        );
        let row = self
            .db
            .query_one(current)
            .await
            .map_err(map_db_err)?
            .ok_or(VariantStoreError::WrongState(id))?;
        let retry_count: i32 = row.try_get("", "retry_count").map_err(map_db_err)?;
        let next_retry_count = retry_count + 1;
        let now = Utc::now().fixed_offset();
        let delay = capped_delay(base, next_retry_count);
        let next_retry_at = now + chrono::Duration::from_std(delay).unwrap_or_default();

        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            UPDATE image_variants
            SET retry_count = $2, next_retry_at = $3, status = 'pending'::variant_status, updated_at = $4
            WHERE id = $1 AND status = 'failed'::variant_status
            "#,
            vec![id.into(), next_retry_count.into(), next_retry_at.into(), now.into()],
        );
        let result = self.db.execute(stmt).await.map_err(map_db_err)?;
        if result.rows_affected() != 1 {
            return Err(VariantStoreError::WrongState(id));
        }
        Ok(())
    }

    async fn retryable(&self, now: DateTime<Utc>, max_retries: u32, limit: u32) -> Result<Vec<Variant>, VariantStoreError> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &format!(
                r#"
                SELECT {SELECT_COLUMNS} FROM image_variants
                WHERE status = 'failed'::variant_status
                  AND retry_count < $1
                  AND (next_retry_at IS NULL OR next_retry_at <= $2)
                ORDER BY next_retry_at ASC NULLS FIRST
                LIMIT $3
                "#
            ),
            vec![(max_retries as i32).into(), now.fixed_offset().into(), (limit as i64).into()],
        );
        let rows = self.db.query_all(stmt).await.map_err(map_db_err)?;
        rows.iter().map(row_to_variant).collect()
    }

    async fn orphans(&self, threshold: Duration, limit: u32) -> Result<Vec<Variant>, VariantStoreError> {
        let cutoff = Utc::now().fixed_offset() - chrono::Duration::from_std(threshold).unwrap_or_default();
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &format!(
                r#"
                SELECT {SELECT_COLUMNS} FROM image_variants
                WHERE status = 'processing'::variant_status AND updated_at < $1
                ORDER BY updated_at ASC
                LIMIT $2
                "#
            ),
            vec![cutoff.into(), (limit as i64).into()],
        );
        let rows = self.db.query_all(stmt).await.map_err(map_db_err)?;
        rows.iter().map(row_to_variant).collect()
    }

    async fn missing(
        &self,
        image_ids: &[i64],
        formats: &[&str],
    ) -> Result<HashMap<i64, HashMap<String, bool>>, VariantStoreError> {
        let mut result: HashMap<i64, HashMap<String, bool>> = image_ids
            .iter()
            .map(|id| (*id, formats.iter().map(|f| (f.to_string(), true)).collect()))
            .collect();
        if image_ids.is_empty() || formats.is_empty() {
            return Ok(result);
        }

        let format_strings: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            r#"
            SELECT image_id, format FROM image_variants
            WHERE image_id = ANY($1) AND format = ANY($2) AND status = 'completed'::variant_status
            "#,
            vec![image_ids.to_vec().into(), format_strings.into()],
        );
        let rows = self.db.query_all(stmt).await.map_err(map_db_err)?;
        for row in &rows {
            let image_id: i64 = row.try_get("", "image_id").map_err(map_db_err)?;
            let format: String = row.try_get("", "format").map_err(map_db_err)?;
            if let Some(by_format) = result.get_mut(&image_id) {
                by_format.insert(format, false);
            }
        }
        Ok(result)
    }

    async fn completed_for_image(&self, image_id: i64) -> Result<Vec<Variant>, VariantStoreError> {
        let stmt = Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &format!(
                r#"
                SELECT {SELECT_COLUMNS} FROM image_variants
                WHERE image_id = $1 AND status = 'completed'::variant_status
                "#
            ),
            vec![image_id.into()],
        );
        let rows = self.db.query_all(stmt).await.map_err(map_db_err)?;
        rows.iter().map(row_to_variant).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn row(retry_count: i32, status: &str) -> BTreeMap<String, Value> {
        let now = Utc::now().fixed_offset();
        vec![
            ("id".to_string(), Value::BigInt(Some(1))),
            ("image_id".to_string(), Value::BigInt(Some(7))),
            ("format".to_string(), Value::String(Some(Box::new("webp".to_string())))),
            ("storage_identifier".to_string(), Value::String(None)),
            ("storage_path".to_string(), Value::String(None)),
            ("file_size_bytes".to_string(), Value::BigInt(None)),
            ("width".to_string(), Value::Int(None)),
            ("height".to_string(), Value::Int(None)),
            ("status".to_string(), Value::String(Some(Box::new(status.to_string())))),
            ("error_message".to_string(), Value::String(None)),
            ("retry_count".to_string(), Value::Int(Some(retry_count))),
            ("next_retry_at".to_string(), Value::ChronoDateTimeWithTimeZone(None)),
            ("created_at".to_string(), Value::ChronoDateTimeWithTimeZone(Some(Box::new(now)))),
            ("updated_at".to_string(), Value::ChronoDateTimeWithTimeZone(Some(Box::new(now)))),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn cas_status_returns_false_when_no_row_matched() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        let won = store
            .cas_status(1, Status::Pending, Status::Processing)
            .await
            .unwrap();
        assert!(!won);
    }

    #[tokio::test]
    async fn mark_completed_rejects_rows_not_in_processing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        let err = store
            .mark_completed(1, "abc.webp", "converted/webp/abc.webp", 123, 10, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, VariantStoreError::WrongState(1)));
    }

    #[tokio::test]
    async fn reset_for_retry_fails_when_row_is_not_failed() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<BTreeMap<String, Value>>::new()])
            .into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        let err = store
            .reset_for_retry(1, Duration::from_secs(300))
            .await
            .unwrap_err();
        assert!(matches!(err, VariantStoreError::WrongState(1)));
    }

    #[tokio::test]
    async fn reset_for_retry_increments_retry_count_and_flips_to_pending() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![row(2, "failed")]])
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        store.reset_for_retry(1, Duration::from_secs(300)).await.unwrap();
    }

    #[tokio::test]
    async fn missing_marks_only_formats_without_a_completed_row() {
        let mut completed_row = BTreeMap::new();
        completed_row.insert("image_id".to_string(), Value::BigInt(Some(7)));
        completed_row.insert(
            "format".to_string(),
            Value::String(Some(Box::new("webp".to_string()))),
        );
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![completed_row]])
            .into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        let result = store.missing(&[7], &["webp", "thumbnail_600"]).await.unwrap();
        let by_format = &result[&7];
        assert_eq!(by_format["webp"], false);
        assert_eq!(by_format["thumbnail_600"], true);
    }

    #[tokio::test]
    async fn missing_short_circuits_on_empty_input() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        let result = store.missing(&[], &["webp"]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn completed_for_image_returns_only_completed_rows() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![row(0, "completed")]])
            .into_connection();
        let store = VariantStorePostgres::new(Arc::new(db));
        let rows = store.completed_for_image(7).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, Status::Completed);
    }

    #[test]
    fn capped_delay_doubles_and_caps_at_one_hour() {
        let base = Duration::from_secs(300);
        assert_eq!(capped_delay(base, 0), Duration::from_secs(300));
        assert_eq!(capped_delay(base, 1), Duration::from_secs(600));
        assert_eq!(capped_delay(base, 5), Duration::from_secs(3600));
        assert_eq!(capped_delay(base, 50), Duration::from_secs(3600));
    }
}
