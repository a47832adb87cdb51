use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use dragnet_core::domain::DomainPattern;
use dragnet_core::error::AppError;
use dragnet_core::store::WorkItemStore;
use dragnet_core::work_item::{
    ClaimRequest, CompletionMetadata, NewWorkItem, WorkItem, WorkStatus,
};

/// PostgreSQL-backed work-item store using `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct WorkItemRepository {
    pool: Pool<Postgres>,
}

impl WorkItemRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct WorkItemRow {
    id: Uuid,
    url: String,
    domain: String,
    status: String,
    attempts: i32,
    priority: i32,
    locked_by: Option<String>,
    locked_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    result_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A claimed row plus its `updated_at` from before the claim touched it.
#[derive(sqlx::FromRow)]
struct ClaimedRow {
    #[sqlx(flatten)]
    item: WorkItemRow,
    touched: DateTime<Utc>,
}

impl From<WorkItemRow> for WorkItem {
    fn from(row: WorkItemRow) -> Self {
        WorkItem {
            id: row.id,
            url: row.url,
            domain: row.domain,
            status: row.status.parse().unwrap_or(WorkStatus::Pending),
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            priority: row.priority,
            locked_by: row.locked_by,
            locked_at: row.locked_at,
            next_attempt_at: row.next_attempt_at,
            error_message: row.error_message,
            result_id: row.result_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

fn attempts_param(max_attempts: u32) -> i32 {
    i32::try_from(max_attempts).unwrap_or(i32::MAX)
}

impl WorkItemStore for WorkItemRepository {
    async fn enqueue(&self, item: NewWorkItem) -> Result<WorkItem, AppError> {
        // The live row can finish between the insert and the lookup; one more
        // insert then succeeds.
        for _ in 0..2 {
            let inserted = sqlx::query_as::<_, WorkItemRow>(
                r#"
                INSERT INTO work_items (url, domain, priority)
                VALUES ($1, $2, $3)
                ON CONFLICT (url) WHERE status IN ('pending', 'claimed') DO NOTHING
                RETURNING *
                "#,
            )
            .bind(&item.url)
            .bind(&item.domain)
            .bind(item.priority)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            if let Some(row) = inserted {
                return Ok(row.into());
            }

            let existing = sqlx::query_as::<_, WorkItemRow>(
                r#"
                SELECT * FROM work_items
                WHERE url = $1 AND status IN ('pending', 'claimed')
                "#,
            )
            .bind(&item.url)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            if let Some(row) = existing {
                tracing::debug!(url = %item.url, item_id = %row.id, "URL already queued");
                return Ok(row.into());
            }
        }

        Err(AppError::DatabaseError(format!(
            "Could not enqueue {}: live row kept changing",
            item.url
        )))
    }

    async fn claim_batch(&self, request: &ClaimRequest) -> Result<Vec<WorkItem>, AppError> {
        let lease_secs = request.lease_ttl.num_milliseconds() as f64 / 1000.0;

        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH candidates AS (
                SELECT id, updated_at AS touched FROM work_items
                WHERE (domain = $1 OR right(domain, length($1) + 1) = '.' || $1)
                  AND attempts < $3
                  AND (
                        (status = 'pending'
                            AND (next_attempt_at IS NULL OR next_attempt_at <= NOW()))
                     OR (status = 'claimed'
                            AND (locked_at IS NULL
                                 OR locked_at <= NOW() - make_interval(secs => $5)))
                  )
                ORDER BY priority DESC, updated_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE work_items w
            SET status = 'claimed', locked_by = $4, locked_at = NOW(), updated_at = NOW()
            FROM candidates c
            WHERE w.id = c.id
            RETURNING w.*, c.touched
            "#,
        )
        .bind(request.domain_pattern.as_str())
        .bind(i64::from(request.batch_size))
        .bind(attempts_param(request.max_attempts))
        .bind(&request.worker_id)
        .bind(lease_secs)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // UPDATE ... RETURNING does not keep the CTE order.
        let mut rows = rows;
        rows.sort_by(|a, b| {
            b.item
                .priority
                .cmp(&a.item.priority)
                .then(a.touched.cmp(&b.touched))
        });
        Ok(rows.into_iter().map(|row| row.item.into()).collect())
    }

    async fn complete(
        &self,
        id: Uuid,
        worker_id: &str,
        metadata: &CompletionMetadata,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'complete', result_id = $3, extractor = $4,
                error_message = NULL, next_attempt_at = NULL,
                locked_by = NULL, locked_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'claimed' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(&metadata.result_id)
        .bind(&metadata.extractor)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'pending', attempts = attempts + 1,
                error_message = $3, next_attempt_at = $4,
                locked_by = NULL, locked_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'claimed' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: Uuid, worker_id: &str, error: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET status = 'failed', attempts = attempts + 1,
                error_message = $3, next_attempt_at = NULL,
                locked_by = NULL, locked_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'claimed' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<WorkItem>, AppError> {
        let row = sqlx::query_as::<_, WorkItemRow>(r#"SELECT * FROM work_items WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(Into::into))
    }

    async fn count_eligible(
        &self,
        patterns: &[DomainPattern],
        max_attempts: u32,
    ) -> Result<i64, AppError> {
        let patterns: Vec<String> = patterns.iter().map(|p| p.as_str().to_string()).collect();

        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM work_items
            WHERE status IN ('pending', 'claimed')
              AND attempts < $2
              AND EXISTS (
                  SELECT 1 FROM unnest($1::text[]) AS p(pattern)
                  WHERE domain = p.pattern
                     OR right(domain, length(p.pattern) + 1) = '.' || p.pattern
              )
            "#,
        )
        .bind(&patterns)
        .bind(attempts_param(max_attempts))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(count)
    }

    async fn count_by_status(&self, status: WorkStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM work_items WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(count)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
