use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 一次分发尝试的结果记录
///
/// 分发开始时以乐观成功写入，若分发抛错再补写失败明细。
/// 本核心只追加和更新，保留期治理属于外部职责。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    /// 每次尝试的唯一标识
    pub sched_id: Uuid,
    pub entry_name: String,
    pub job_id: Option<i64>,
    pub run_date: DateTime<Utc>,
    pub is_success: bool,
    pub error_detail: String,
    /// 发起分发的Beat进程所在主机
    pub host: String,
}

impl DispatchOutcome {
    /// 创建乐观成功记录
    pub fn tentative(
        sched_id: Uuid,
        entry_name: String,
        job_id: Option<i64>,
        run_date: DateTime<Utc>,
        host: String,
    ) -> Self {
        Self {
            sched_id,
            entry_name,
            job_id,
            run_date,
            is_success: true,
            error_detail: String::new(),
            host,
        }
    }
}
