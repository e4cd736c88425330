use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 周期任务定义
///
/// 管理面创建的任务配置，与一条调度条目（Entry）成对出现。
/// `max_run_count` 大于0时，`deadline_run_time` 在创建时被计算为
/// 第N次未来触发时间；到期后任务被自动停用。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: i64,
    /// 任务标题，全局唯一
    pub title: String,
    pub is_enabled: bool,
    pub is_deleted: bool,
    /// 最大运行次数，0表示不限制
    pub max_run_count: i32,
    pub first_run_time: Option<DateTime<Utc>>,
    pub deadline_run_time: Option<DateTime<Utc>>,
    /// 静态注册表中的任务标识
    pub task_name: String,
    pub cron_schedule_id: i64,
    /// 备用Broker配置，None时走默认执行器
    pub destination_config_id: Option<i64>,
    pub periodic_entry_id: Option<i64>,
    pub remark: String,
    pub date_changed: DateTime<Utc>,
}

impl JobDefinition {
    pub fn new(title: String, task_name: String, cron_schedule_id: i64) -> Self {
        Self {
            id: 0, // 将由数据库生成
            title,
            is_enabled: false,
            is_deleted: false,
            max_run_count: 0,
            first_run_time: None,
            deadline_run_time: None,
            task_name,
            cron_schedule_id,
            destination_config_id: None,
            periodic_entry_id: None,
            remark: String::new(),
            date_changed: Utc::now(),
        }
    }

    /// 截止时间是否已过（等于now也算过期）
    pub fn is_deadline_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.deadline_run_time, Some(deadline) if deadline <= now)
    }

    pub fn is_schedulable(&self) -> bool {
        self.is_enabled && !self.is_deleted
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_deadline_boundary_is_expired() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut job = JobDefinition::new("报表汇总".to_string(), "report.daily".to_string(), 1);

        assert!(!job.is_deadline_expired(now));

        // 截止时间恰好等于now时视为已过期
        job.deadline_run_time = Some(now);
        assert!(job.is_deadline_expired(now));

        job.deadline_run_time = Some(now + chrono::Duration::seconds(1));
        assert!(!job.is_deadline_expired(now));
    }
}
