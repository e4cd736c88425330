use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::{CronSchedule, Entry, JobDefinition, ScheduleRepository};

use crate::cron_utils::CronTrigger;
use crate::registry::TaskRegistry;

/// 创建周期任务的请求参数
#[derive(Debug, Clone)]
pub struct NewJobRequest {
    pub title: String,
    pub cron_expr: String,
    pub task_name: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    /// 最大运行次数，0表示不限制
    pub max_run_count: i32,
    pub destination_config_id: Option<i64>,
    pub remark: String,
    pub enabled: bool,
}

impl NewJobRequest {
    pub fn new(
        title: impl Into<String>,
        cron_expr: impl Into<String>,
        task_name: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            cron_expr: cron_expr.into(),
            task_name: task_name.into(),
            args: serde_json::Value::Array(Vec::new()),
            kwargs: serde_json::Value::Object(serde_json::Map::new()),
            max_run_count: 0,
            destination_config_id: None,
            remark: String::new(),
            enabled: true,
        }
    }
}

/// 周期任务管理操作
///
/// 外部管理面（API/CLI）的增删改都落到这里的事务性操作，
/// 管理面本身不在本核心范围内。
pub struct JobService {
    repo: Arc<dyn ScheduleRepository>,
    registry: Arc<TaskRegistry>,
}

impl JobService {
    pub fn new(repo: Arc<dyn ScheduleRepository>, registry: Arc<TaskRegistry>) -> Self {
        Self { repo, registry }
    }

    /// 创建周期任务
    ///
    /// 校验CRON表达式和任务标识后，在单个事务内创建任务定义和
    /// 调度条目。`max_run_count` 大于0时，截止运行时间取第N次
    /// 未来触发时间。
    pub async fn create_job(&self, request: NewJobRequest) -> SchedulerResult<JobDefinition> {
        if request.title.trim().is_empty() {
            return Err(SchedulerError::Configuration(
                "任务标题不能为空".to_string(),
            ));
        }

        let trigger = CronTrigger::new(&request.cron_expr)?;

        if !self.registry.contains(&request.task_name) {
            return Err(SchedulerError::TaskNotRegistered {
                name: request.task_name,
            });
        }

        let cron = CronSchedule::from_expr(&request.cron_expr)?;
        let now = Utc::now();

        let mut job = JobDefinition::new(request.title.clone(), request.task_name.clone(), 0);
        job.is_enabled = request.enabled;
        job.max_run_count = request.max_run_count;
        job.first_run_time = Some(now);
        job.destination_config_id = request.destination_config_id;
        job.remark = request.remark;

        if request.max_run_count > 0 {
            job.deadline_run_time = trigger.last_run_time(request.max_run_count as usize, now);
        }

        let mut entry = Entry::new(request.title, request.task_name, 0);
        entry.args = request.args;
        entry.kwargs = request.kwargs;
        entry.enabled = request.enabled;

        let created = self.repo.create_job(&job, &entry, &cron).await?;
        info!("创建周期任务: {} (ID: {})", created.title, created.id);

        Ok(created)
    }

    pub async fn enable_job(&self, job_id: i64) -> SchedulerResult<()> {
        self.repo.set_job_enabled(job_id, true).await?;
        info!("启用周期任务: {job_id}");
        Ok(())
    }

    pub async fn disable_job(&self, job_id: i64) -> SchedulerResult<()> {
        self.repo.set_job_enabled(job_id, false).await?;
        info!("停用周期任务: {job_id}");
        Ok(())
    }

    /// 软删除任务定义并停用其条目
    pub async fn remove_job(&self, job_id: i64) -> SchedulerResult<()> {
        self.repo.soft_delete_job(job_id).await?;
        info!("删除周期任务: {job_id}");
        Ok(())
    }

    /// 预览表达式接下来的若干次触发时间（管理面UI用）
    pub fn preview_run_times(
        &self,
        cron_expr: &str,
        count: usize,
        from: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DateTime<Utc>>> {
        let trigger = CronTrigger::new(cron_expr)?;
        Ok(trigger.upcoming_times(from, count))
    }
}
