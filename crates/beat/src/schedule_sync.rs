use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use cronbeat_domain::{Entry, JobDefinition, ScheduleRepository, TaskExecutor};
use cronbeat_core::SchedulerResult;
use cronbeat_infrastructure::observability::StructuredLogger;

use crate::registry::TaskRegistry;

/// 截止时间清扫写入的审计备注
pub const DEADLINE_REMARK: &str = "自动监控->停止";

/// 调度表变更游标
///
/// 保存上一次看到的高水位，首次轮询总是视为有变更以完成初始同步。
#[derive(Debug, Clone, Default)]
pub struct ChangeCursor {
    seen: bool,
    marker: Option<DateTime<Utc>>,
}

/// 调度表同步服务
///
/// 负责把持久表中的任务定义对账到内存：发现新启用的任务、
/// 物化对应条目、清扫超过截止运行时间的任务。
pub struct ScheduleSyncService {
    repo: Arc<dyn ScheduleRepository>,
    registry: Arc<TaskRegistry>,
    default_executor: Arc<dyn TaskExecutor>,
}

impl ScheduleSyncService {
    pub fn new(
        repo: Arc<dyn ScheduleRepository>,
        registry: Arc<TaskRegistry>,
        default_executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            repo,
            registry,
            default_executor,
        }
    }

    /// 轮询调度表是否发生变更，委托给存储的高水位列
    pub async fn poll_changed(&self, cursor: &mut ChangeCursor) -> SchedulerResult<bool> {
        let marker = self.repo.last_changed().await?;
        let changed = !cursor.seen || marker > cursor.marker;
        if changed {
            cursor.seen = true;
            cursor.marker = marker;
        }
        Ok(changed)
    }

    /// 物化所有新启用、尚未进入内存的任务定义
    ///
    /// 每个任务：在静态注册表中解析其任务标识（未注册则跳过），
    /// 把标识注册到默认执行器，并在条目行缺失时补建。
    pub async fn sync_newly_enabled(
        &self,
        excluding_job_ids: &HashSet<i64>,
    ) -> SchedulerResult<Vec<(JobDefinition, Entry)>> {
        let excluding: Vec<i64> = excluding_job_ids.iter().copied().collect();
        let jobs = self.repo.list_enabled_jobs_excluding(&excluding).await?;

        let mut materialized = Vec::new();
        for job in jobs {
            let Some(identity) = self.registry.get(&job.task_name) else {
                warn!(
                    "任务 {} 的标识 {} 未在注册表中，跳过物化",
                    job.title, job.task_name
                );
                continue;
            };

            if let Err(e) = self.default_executor.register_task(&identity).await {
                warn!("注册任务标识 {} 失败: {e}", identity.name);
                continue;
            }

            let entry = match self.repo.get_entry(&job.title).await? {
                Some(existing) => {
                    if job.periodic_entry_id.is_none() {
                        self.repo.attach_entry(job.id, &existing).await?
                    } else {
                        existing
                    }
                }
                None => {
                    let entry =
                        Entry::new(job.title.clone(), job.task_name.clone(), job.cron_schedule_id);
                    self.repo.attach_entry(job.id, &entry).await?
                }
            };

            info!("任务 {} 已物化为调度条目 {}", job.title, entry.name);
            materialized.push((job, entry));
        }

        Ok(materialized)
    }

    /// 清扫所有已过截止运行时间的启用任务
    ///
    /// 对每个过期任务在单个事务内同时停用任务定义和条目并写入
    /// 审计备注。重复调用幂等：已停用的任务不会再次命中。
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let expired = self.repo.list_deadline_expired_jobs(now).await?;

        let mut disabled = 0;
        for job in expired {
            match self.repo.disable_job_and_entry(job.id, DEADLINE_REMARK).await {
                Ok(()) => {
                    StructuredLogger::log_job_disabled_by_deadline(
                        job.id,
                        &job.title,
                        job.deadline_run_time,
                    );
                    disabled += 1;
                }
                Err(e) => {
                    warn!("停用过期任务 {} 失败: {e}", job.title);
                }
            }
        }

        Ok(disabled)
    }
}
