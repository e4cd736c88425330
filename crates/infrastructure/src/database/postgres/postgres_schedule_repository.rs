use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::{CronSchedule, Entry, JobDefinition, ScheduleRepository};

const JOB_COLUMNS: &str = "id, title, is_enabled, is_deleted, max_run_count, first_run_time, \
     deadline_run_time, task_name, cron_schedule_id, destination_config_id, periodic_entry_id, \
     remark, date_changed";

const ENTRY_COLUMNS: &str = "id, name, task_name, args, kwargs, cron_schedule_id, enabled, \
     last_run_at, total_run_count, priority, queue, exchange, routing_key, expires, date_changed";

/// 调度表的Postgres实现
pub struct PostgresScheduleRepository {
    pool: PgPool,
}

impl PostgresScheduleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> SchedulerResult<JobDefinition> {
        Ok(JobDefinition {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            is_enabled: row.try_get("is_enabled")?,
            is_deleted: row.try_get("is_deleted")?,
            max_run_count: row.try_get("max_run_count")?,
            first_run_time: row.try_get("first_run_time")?,
            deadline_run_time: row.try_get("deadline_run_time")?,
            task_name: row.try_get("task_name")?,
            cron_schedule_id: row.try_get("cron_schedule_id")?,
            destination_config_id: row.try_get("destination_config_id")?,
            periodic_entry_id: row.try_get("periodic_entry_id")?,
            remark: row.try_get("remark")?,
            date_changed: row.try_get("date_changed")?,
        })
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> SchedulerResult<Entry> {
        Ok(Entry {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task_name: row.try_get("task_name")?,
            args: row.try_get("args")?,
            kwargs: row.try_get("kwargs")?,
            cron_schedule_id: row.try_get("cron_schedule_id")?,
            enabled: row.try_get("enabled")?,
            last_run_at: row.try_get("last_run_at")?,
            total_run_count: row.try_get("total_run_count")?,
            priority: row.try_get("priority")?,
            queue: row.try_get("queue")?,
            exchange: row.try_get("exchange")?,
            routing_key: row.try_get("routing_key")?,
            expires: row.try_get("expires")?,
            date_changed: row.try_get("date_changed")?,
        })
    }

    fn row_to_cron(row: &sqlx::postgres::PgRow) -> SchedulerResult<CronSchedule> {
        Ok(CronSchedule {
            id: row.try_get("id")?,
            minute: row.try_get("minute")?,
            hour: row.try_get("hour")?,
            day_of_month: row.try_get("day_of_month")?,
            month_of_year: row.try_get("month_of_year")?,
            day_of_week: row.try_get("day_of_week")?,
        })
    }

    /// 事务内按五字段查找或创建cron行
    async fn get_or_create_cron_tx(
        tx: &mut Transaction<'_, Postgres>,
        cron: &CronSchedule,
    ) -> SchedulerResult<i64> {
        let existing = sqlx::query(
            "SELECT id FROM cron_schedules \
             WHERE minute = $1 AND hour = $2 AND day_of_month = $3 \
               AND month_of_year = $4 AND day_of_week = $5",
        )
        .bind(&cron.minute)
        .bind(&cron.hour)
        .bind(&cron.day_of_month)
        .bind(&cron.month_of_year)
        .bind(&cron.day_of_week)
        .fetch_optional(&mut **tx)
        .await?;

        if let Some(row) = existing {
            return Ok(row.try_get("id")?);
        }

        let row = sqlx::query(
            "INSERT INTO cron_schedules (minute, hour, day_of_month, month_of_year, day_of_week) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&cron.minute)
        .bind(&cron.hour)
        .bind(&cron.day_of_month)
        .bind(&cron.month_of_year)
        .bind(&cron.day_of_week)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.try_get("id")?)
    }
}

#[async_trait]
impl ScheduleRepository for PostgresScheduleRepository {
    async fn create_job(
        &self,
        job: &JobDefinition,
        entry: &Entry,
        cron: &CronSchedule,
    ) -> SchedulerResult<JobDefinition> {
        let mut tx = self.pool.begin().await?;

        let cron_id = Self::get_or_create_cron_tx(&mut tx, cron).await?;

        let entry_row = sqlx::query(
            "INSERT INTO periodic_entries \
                (name, task_name, args, kwargs, cron_schedule_id, enabled, priority, \
                 queue, exchange, routing_key, expires) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING id",
        )
        .bind(&entry.name)
        .bind(&entry.task_name)
        .bind(&entry.args)
        .bind(&entry.kwargs)
        .bind(cron_id)
        .bind(entry.enabled)
        .bind(entry.priority)
        .bind(&entry.queue)
        .bind(&entry.exchange)
        .bind(&entry.routing_key)
        .bind(entry.expires)
        .fetch_one(&mut *tx)
        .await?;
        let entry_id: i64 = entry_row.try_get("id")?;

        let job_row = sqlx::query(&format!(
            "INSERT INTO job_definitions \
                (title, is_enabled, max_run_count, first_run_time, deadline_run_time, \
                 task_name, cron_schedule_id, destination_config_id, periodic_entry_id, remark) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(&job.title)
        .bind(job.is_enabled)
        .bind(job.max_run_count)
        .bind(job.first_run_time)
        .bind(job.deadline_run_time)
        .bind(&job.task_name)
        .bind(cron_id)
        .bind(job.destination_config_id)
        .bind(entry_id)
        .bind(&job.remark)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let created = Self::row_to_job(&job_row)?;
        debug!("创建任务定义 {} (ID: {})", created.title, created.id);
        Ok(created)
    }

    async fn get_job(&self, id: i64) -> SchedulerResult<Option<JobDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_definitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn get_job_for_entry(&self, entry_name: &str) -> SchedulerResult<Option<JobDefinition>> {
        let row = sqlx::query(&format!(
            "SELECT j.{} FROM job_definitions j \
             JOIN periodic_entries e ON j.periodic_entry_id = e.id \
             WHERE e.name = $1 AND j.is_deleted = FALSE",
            JOB_COLUMNS.replace(", ", ", j.")
        ))
        .bind(entry_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn list_enabled_jobs(&self) -> SchedulerResult<Vec<JobDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_definitions \
             WHERE is_enabled = TRUE AND is_deleted = FALSE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_enabled_jobs_excluding(
        &self,
        excluding_ids: &[i64],
    ) -> SchedulerResult<Vec<JobDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_definitions \
             WHERE is_enabled = TRUE AND is_deleted = FALSE AND id <> ALL($1) ORDER BY id"
        ))
        .bind(excluding_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_deadline_expired_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<JobDefinition>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job_definitions \
             WHERE is_enabled = TRUE AND is_deleted = FALSE \
               AND deadline_run_time IS NOT NULL AND deadline_run_time <= $1 ORDER BY id"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_enabled_entries(&self) -> SchedulerResult<Vec<Entry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM periodic_entries WHERE enabled = TRUE ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn get_entry(&self, name: &str) -> SchedulerResult<Option<Entry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM periodic_entries WHERE name = $1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_entry(&r)).transpose()
    }

    async fn get_cron(&self, id: i64) -> SchedulerResult<Option<CronSchedule>> {
        let row = sqlx::query(
            "SELECT id, minute, hour, day_of_month, month_of_year, day_of_week \
             FROM cron_schedules WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::row_to_cron(&r)).transpose()
    }

    async fn get_or_create_cron(&self, cron: &CronSchedule) -> SchedulerResult<CronSchedule> {
        let mut tx = self.pool.begin().await?;
        let id = Self::get_or_create_cron_tx(&mut tx, cron).await?;
        tx.commit().await?;

        let mut stored = cron.clone();
        stored.id = id;
        Ok(stored)
    }

    async fn attach_entry(&self, job_id: i64, entry: &Entry) -> SchedulerResult<Entry> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM periodic_entries WHERE name = $1"
        ))
        .bind(&entry.name)
        .fetch_optional(&mut *tx)
        .await?;

        let stored = match existing {
            Some(row) => Self::row_to_entry(&row)?,
            None => {
                let row = sqlx::query(&format!(
                    "INSERT INTO periodic_entries \
                        (name, task_name, args, kwargs, cron_schedule_id, enabled, priority, \
                         queue, exchange, routing_key, expires) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                     RETURNING {ENTRY_COLUMNS}"
                ))
                .bind(&entry.name)
                .bind(&entry.task_name)
                .bind(&entry.args)
                .bind(&entry.kwargs)
                .bind(entry.cron_schedule_id)
                .bind(entry.enabled)
                .bind(entry.priority)
                .bind(&entry.queue)
                .bind(&entry.exchange)
                .bind(&entry.routing_key)
                .bind(entry.expires)
                .fetch_one(&mut *tx)
                .await?;
                Self::row_to_entry(&row)?
            }
        };

        let updated = sqlx::query(
            "UPDATE job_definitions SET periodic_entry_id = $2, date_changed = NOW() WHERE id = $1",
        )
        .bind(job_id)
        .bind(stored.id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(SchedulerError::JobNotFound { id: job_id });
        }

        tx.commit().await?;
        Ok(stored)
    }

    async fn save_entry_run_state(
        &self,
        name: &str,
        last_run_at: Option<DateTime<Utc>>,
        total_run_count: i64,
    ) -> SchedulerResult<()> {
        // 运行状态回写不触碰date_changed，避免自触发重新同步
        let result = sqlx::query(
            "UPDATE periodic_entries SET last_run_at = $2, total_run_count = $3 WHERE name = $1",
        )
        .bind(name)
        .bind(last_run_at)
        .bind(total_run_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::EntryNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn set_entry_enabled(&self, name: &str, enabled: bool) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE periodic_entries SET enabled = $2, date_changed = NOW() WHERE name = $1",
        )
        .bind(name)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::EntryNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn set_job_enabled(&self, job_id: i64, enabled: bool) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE job_definitions SET is_enabled = $2, date_changed = NOW() \
             WHERE id = $1 RETURNING periodic_entry_id",
        )
        .bind(job_id)
        .bind(enabled)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulerError::JobNotFound { id: job_id })?;

        let entry_id: Option<i64> = row.try_get("periodic_entry_id")?;
        if let Some(entry_id) = entry_id {
            sqlx::query(
                "UPDATE periodic_entries SET enabled = $2, date_changed = NOW() WHERE id = $1",
            )
            .bind(entry_id)
            .bind(enabled)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn disable_job_and_entry(&self, job_id: i64, remark: &str) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE job_definitions SET is_enabled = FALSE, remark = $2, date_changed = NOW() \
             WHERE id = $1 RETURNING periodic_entry_id",
        )
        .bind(job_id)
        .bind(remark)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulerError::JobNotFound { id: job_id })?;

        let entry_id: Option<i64> = row.try_get("periodic_entry_id")?;
        if let Some(entry_id) = entry_id {
            sqlx::query(
                "UPDATE periodic_entries SET enabled = FALSE, date_changed = NOW() WHERE id = $1",
            )
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn soft_delete_job(&self, job_id: i64) -> SchedulerResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE job_definitions \
             SET is_deleted = TRUE, is_enabled = FALSE, date_changed = NOW() \
             WHERE id = $1 RETURNING periodic_entry_id",
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(SchedulerError::JobNotFound { id: job_id })?;

        let entry_id: Option<i64> = row.try_get("periodic_entry_id")?;
        if let Some(entry_id) = entry_id {
            sqlx::query(
                "UPDATE periodic_entries SET enabled = FALSE, date_changed = NOW() WHERE id = $1",
            )
            .bind(entry_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn last_changed(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT GREATEST( \
                (SELECT MAX(date_changed) FROM job_definitions), \
                (SELECT MAX(date_changed) FROM periodic_entries) \
             ) AS last_changed",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("last_changed")?)
    }
}
