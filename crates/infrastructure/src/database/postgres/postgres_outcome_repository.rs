use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cronbeat_core::SchedulerResult;
use cronbeat_domain::{DispatchOutcome, OutcomeRepository};

/// 分发结果表的Postgres实现
pub struct PostgresOutcomeRepository {
    pool: PgPool,
}

impl PostgresOutcomeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_outcome(row: &sqlx::postgres::PgRow) -> SchedulerResult<DispatchOutcome> {
        Ok(DispatchOutcome {
            sched_id: row.try_get("sched_id")?,
            entry_name: row.try_get("entry_name")?,
            job_id: row.try_get("job_id")?,
            run_date: row.try_get("run_date")?,
            is_success: row.try_get("is_success")?,
            error_detail: row.try_get("error_detail")?,
            host: row.try_get("host")?,
        })
    }
}

#[async_trait]
impl OutcomeRepository for PostgresOutcomeRepository {
    async fn create(&self, outcome: &DispatchOutcome) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO dispatch_outcomes \
                (sched_id, entry_name, job_id, run_date, is_success, error_detail, host) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(outcome.sched_id)
        .bind(&outcome.entry_name)
        .bind(outcome.job_id)
        .bind(outcome.run_date)
        .bind(outcome.is_success)
        .bind(&outcome.error_detail)
        .bind(&outcome.host)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, sched_id: Uuid, error_detail: &str) -> SchedulerResult<()> {
        // 记录已被保留期治理删除时rows_affected为0，按幂等no-op处理
        sqlx::query(
            "UPDATE dispatch_outcomes SET is_success = FALSE, error_detail = $2 \
             WHERE sched_id = $1",
        )
        .bind(sched_id)
        .bind(error_detail)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> SchedulerResult<Vec<DispatchOutcome>> {
        let rows = sqlx::query(
            "SELECT sched_id, entry_name, job_id, run_date, is_success, error_detail, host \
             FROM dispatch_outcomes ORDER BY run_date DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_outcome).collect()
    }
}
