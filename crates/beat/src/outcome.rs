use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use cronbeat_domain::{DispatchOutcome, OutcomeRepository};

/// 分发结果记录器
///
/// 每次分发先写入乐观成功记录，分发抛错后再补写失败明细。
/// 记录本身的存储故障只记日志，绝不反向影响调度循环。
pub struct OutcomeRecorder {
    repo: Arc<dyn OutcomeRepository>,
    truncate_len: usize,
    host: String,
}

impl OutcomeRecorder {
    pub fn new(repo: Arc<dyn OutcomeRepository>, truncate_len: usize) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self::with_host(repo, truncate_len, host)
    }

    pub fn with_host(repo: Arc<dyn OutcomeRepository>, truncate_len: usize, host: String) -> Self {
        Self {
            repo,
            truncate_len,
            host,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// 写入一次分发尝试的乐观成功记录
    pub async fn begin(
        &self,
        sched_id: Uuid,
        entry_name: &str,
        job_id: Option<i64>,
        run_date: DateTime<Utc>,
    ) {
        let outcome = DispatchOutcome::tentative(
            sched_id,
            entry_name.to_string(),
            job_id,
            run_date,
            self.host.clone(),
        );

        if let Err(e) = self.repo.create(&outcome).await {
            warn!("写入分发记录失败 (sched_id: {sched_id}): {e}");
        }
    }

    /// 将已写入的记录改写为失败，异常明细保留尾部并截断
    ///
    /// 记录已被保留期治理删除时为幂等no-op。
    pub async fn fail(&self, sched_id: Uuid, error_detail: &str) {
        let detail = truncate_tail(error_detail, self.truncate_len);
        if let Err(e) = self.repo.mark_failed(sched_id, &detail).await {
            warn!("更新分发失败记录失败 (sched_id: {sched_id}): {e}");
        }
    }

    /// 抢锁遥测，与分发结果分开记录（抢锁被拒时没有任何分发发生）
    pub fn log_schedule_claim(&self, entry_name: &str, claimed: bool) {
        if claimed {
            info!(
                "{} 申请条目 {} 的调度权成功, now: {}",
                self.host,
                entry_name,
                Utc::now()
            );
        } else {
            debug!("{} 申请条目 {} 的调度权被拒", self.host, entry_name);
        }
    }
}

/// 保留字符串尾部的截断（异常栈的末尾比开头更有价值）
fn truncate_tail(detail: &str, max_chars: usize) -> String {
    let count = detail.chars().count();
    if count <= max_chars {
        detail.to_string()
    } else {
        detail.chars().skip(count - max_chars).collect()
    }
}
