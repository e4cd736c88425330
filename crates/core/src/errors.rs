use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务定义未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("调度条目未找到: {name}")]
    EntryNotFound { name: String },

    #[error("分发目标配置未找到: {id}")]
    DestinationNotFound { id: i64 },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("任务标识未注册: {name}")]
    TaskNotRegistered { name: String },

    #[error("锁存储不可用: {0}")]
    LockUnavailable(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("任务分发失败: {0}")]
    DispatchFailed(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}
