use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 周期调度条目
///
/// BeatLoop的内存工作单元对应的持久行：名字即跨进程锁的key，
/// `last_run_at` / `total_run_count` 由调度循环批量回写，
/// 其余字段由管理面维护。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    /// 条目名，全局唯一，作为锁key使用
    pub name: String,
    pub task_name: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub cron_schedule_id: i64,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: i64,
    pub priority: Option<i32>,
    pub queue: Option<String>,
    pub exchange: Option<String>,
    pub routing_key: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub date_changed: DateTime<Utc>,
}

impl Entry {
    pub fn new(name: String, task_name: String, cron_schedule_id: i64) -> Self {
        Self {
            id: 0, // 将由数据库生成
            name,
            task_name,
            args: serde_json::Value::Array(Vec::new()),
            kwargs: serde_json::Value::Object(serde_json::Map::new()),
            cron_schedule_id,
            enabled: true,
            last_run_at: None,
            total_run_count: 0,
            priority: None,
            queue: None,
            exchange: None,
            routing_key: None,
            expires: None,
            date_changed: Utc::now(),
        }
    }

    /// 记录一次成功申请到的调度
    pub fn advance(&mut self, run_at: DateTime<Utc>) {
        self.last_run_at = Some(run_at);
        self.total_run_count += 1;
    }

    /// 条目自身是否已过期（expires字段）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires, Some(expires) if expires <= now)
    }
}
