//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口，遵循依赖倒置原则。
//! JobDefinition与Entry成对变更的操作必须在单个事务内完成，
//! 避免出现"已启用但未接线"的中间状态。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{CronSchedule, DestinationConfig, DispatchOutcome, Entry, JobDefinition};
use cronbeat_core::SchedulerResult;

/// 周期任务定义 + 调度条目仓储
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// 事务性创建：去重cron行、插入Entry、插入JobDefinition并互相关联
    async fn create_job(
        &self,
        job: &JobDefinition,
        entry: &Entry,
        cron: &CronSchedule,
    ) -> SchedulerResult<JobDefinition>;

    async fn get_job(&self, id: i64) -> SchedulerResult<Option<JobDefinition>>;

    /// 按条目名反查所属任务定义
    async fn get_job_for_entry(&self, entry_name: &str) -> SchedulerResult<Option<JobDefinition>>;

    /// 所有已启用且未删除的任务定义
    async fn list_enabled_jobs(&self) -> SchedulerResult<Vec<JobDefinition>>;

    /// 已启用且未删除、且不在给定id集合内的任务定义
    async fn list_enabled_jobs_excluding(
        &self,
        excluding_ids: &[i64],
    ) -> SchedulerResult<Vec<JobDefinition>>;

    /// 截止时间已过且仍启用的任务定义
    async fn list_deadline_expired_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<JobDefinition>>;

    async fn list_enabled_entries(&self) -> SchedulerResult<Vec<Entry>>;

    async fn get_entry(&self, name: &str) -> SchedulerResult<Option<Entry>>;

    async fn get_cron(&self, id: i64) -> SchedulerResult<Option<CronSchedule>>;

    /// 按五字段规范键查找或创建cron行
    async fn get_or_create_cron(&self, cron: &CronSchedule) -> SchedulerResult<CronSchedule>;

    /// 为已有任务定义补建条目行并回写periodic_entry_id（事务）
    async fn attach_entry(&self, job_id: i64, entry: &Entry) -> SchedulerResult<Entry>;

    /// 批量回写条目运行状态（不触发变更高水位）
    async fn save_entry_run_state(
        &self,
        name: &str,
        last_run_at: Option<DateTime<Utc>>,
        total_run_count: i64,
    ) -> SchedulerResult<()>;

    async fn set_entry_enabled(&self, name: &str, enabled: bool) -> SchedulerResult<()>;

    /// 事务性启用/停用任务定义及其条目
    async fn set_job_enabled(&self, job_id: i64, enabled: bool) -> SchedulerResult<()>;

    /// 事务性停用任务定义及其条目，并写入审计备注
    async fn disable_job_and_entry(&self, job_id: i64, remark: &str) -> SchedulerResult<()>;

    /// 软删除任务定义并停用其条目（事务）
    async fn soft_delete_job(&self, job_id: i64) -> SchedulerResult<()>;

    /// 调度表变更高水位（最近一次外部修改时间）
    async fn last_changed(&self) -> SchedulerResult<Option<DateTime<Utc>>>;
}

/// 分发结果仓储
#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn create(&self, outcome: &DispatchOutcome) -> SchedulerResult<()>;

    /// 将既有记录改写为失败；记录不存在时为幂等no-op
    async fn mark_failed(&self, sched_id: Uuid, error_detail: &str) -> SchedulerResult<()>;

    async fn list_recent(&self, limit: i64) -> SchedulerResult<Vec<DispatchOutcome>>;
}

/// 分发目标配置仓储
#[async_trait]
pub trait DestinationRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DestinationConfig>>;
}
