//! 外部能力抽象
//!
//! 调度核心只依赖这些接口；Redis/AMQP等具体实现位于infrastructure。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::DestinationConfig;
use cronbeat_core::SchedulerResult;

/// 分布式锁存储抽象
///
/// 唯一要求：原子的set-if-absent-with-expiry原语。
#[async_trait]
pub trait LockStore: Send + Sync {
    /// key不存在时写入并设置毫秒级TTL，返回是否写入成功
    async fn set_if_absent(&self, key: &str, token: &str, ttl_ms: i64) -> SchedulerResult<bool>;
}

/// 任务队列路由信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRouting {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl TaskRouting {
    /// 按任务短名派生默认路由：`<name>_q` / `<name>_exc` / `<name>_rk`
    pub fn defaults_for(task_name: &str) -> Self {
        let short_name = task_name.rsplit('.').next().unwrap_or(task_name);
        Self {
            queue: format!("{short_name}_q"),
            exchange: format!("{short_name}_exc"),
            routing_key: format!("{short_name}_rk"),
        }
    }

    /// 条目声明的路由，缺失的字段用默认命名补齐
    pub fn for_entry(entry: &crate::entities::Entry) -> Self {
        let defaults = Self::defaults_for(&entry.task_name);
        Self {
            queue: entry.queue.clone().unwrap_or(defaults.queue),
            exchange: entry.exchange.clone().unwrap_or(defaults.exchange),
            routing_key: entry.routing_key.clone().unwrap_or(defaults.routing_key),
        }
    }
}

/// 静态注册的任务标识
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub name: String,
    pub routing: TaskRouting,
}

impl TaskIdentity {
    pub fn with_default_routing(name: impl Into<String>) -> Self {
        let name = name.into();
        let routing = TaskRouting::defaults_for(&name);
        Self { name, routing }
    }
}

/// 发往任务执行器的触发消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub sched_id: Uuid,
    pub task_name: String,
    pub args: serde_json::Value,
    pub kwargs: serde_json::Value,
    pub routing: TaskRouting,
    pub priority: Option<i32>,
    pub expires: Option<DateTime<Utc>>,
    pub run_date: DateTime<Utc>,
}

/// 一次分发的受理凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub sched_id: Uuid,
    pub queue: String,
}

/// 任务执行器抽象
///
/// 对应一个具体Broker上的发送端：注册任务标识（声明队列、
/// 交换机和绑定）并投递触发消息。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行器标识（默认执行器为"default"，备用执行器为缓存键）
    fn identity(&self) -> &str;

    async fn register_task(&self, task: &TaskIdentity) -> SchedulerResult<()>;

    /// 清除同名的已注册任务标识
    async fn unregister_task(&self, name: &str) -> SchedulerResult<()>;

    async fn send(&self, message: &TaskMessage) -> SchedulerResult<DispatchReceipt>;
}

/// 备用Broker执行器工厂
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn create(&self, destination: &DestinationConfig)
        -> SchedulerResult<Arc<dyn TaskExecutor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routing_uses_short_name() {
        let routing = TaskRouting::defaults_for("reports.tasks.daily_summary");
        assert_eq!(routing.queue, "daily_summary_q");
        assert_eq!(routing.exchange, "daily_summary_exc");
        assert_eq!(routing.routing_key, "daily_summary_rk");

        let routing = TaskRouting::defaults_for("cleanup");
        assert_eq!(routing.queue, "cleanup_q");
    }
}
