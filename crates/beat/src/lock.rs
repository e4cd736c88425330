use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{distr::Alphanumeric, Rng};
use tracing::{debug, error, info};

use cronbeat_domain::LockStore;

/// 锁token长度
const CLAIM_TOKEN_LEN: usize = 22;

/// 跨进程调度权协调器
///
/// 同一个条目在同一个触发周期内，多个Beat进程中至多一个能
/// 申请成功。未配置锁存储时退化为单调度器模式（总是申请成功），
/// 这是文档化的放宽行为而不是故障。
pub struct LockCoordinator {
    store: Option<Arc<dyn LockStore>>,
    outage_logged: AtomicBool,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store: Some(store),
            outage_logged: AtomicBool::new(false),
        }
    }

    /// 无锁存储的单调度器模式
    pub fn single_scheduler() -> Self {
        info!("未配置锁存储，以单调度器模式运行（放弃跨进程互斥保证）");
        Self {
            store: None,
            outage_logged: AtomicBool::new(false),
        }
    }

    /// 申请某个条目本轮的独占调度权
    ///
    /// `ttl_ms` 应为到下一次合法触发的间隔减去安全余量，使锁在
    /// 下一个触发点之前自然过期。锁存储出错时按申请失败处理：
    /// 宁可本轮少调度一次，也不能重复触发。
    pub async fn try_claim(&self, key: &str, ttl_ms: i64) -> bool {
        let Some(store) = &self.store else {
            return true;
        };

        if ttl_ms <= 0 {
            debug!("条目 {} 的锁TTL不为正（{}ms），本轮跳过", key, ttl_ms);
            return false;
        }

        let token = Self::random_token();
        match store.set_if_absent(key, &token, ttl_ms).await {
            Ok(claimed) => {
                if self.outage_logged.swap(false, Ordering::Relaxed) {
                    info!("锁存储已恢复");
                }
                claimed
            }
            Err(e) => {
                // 每次故障期只在error级别记录一次
                if !self.outage_logged.swap(true, Ordering::Relaxed) {
                    error!("锁存储不可用，降级为放弃本轮调度: {e}");
                } else {
                    debug!("锁存储仍不可用: {e}");
                }
                false
            }
        }
    }

    /// 是否处于单调度器模式
    pub fn is_single_scheduler(&self) -> bool {
        self.store.is_none()
    }

    fn random_token() -> String {
        rand::rng()
            .sample_iter(&Alphanumeric)
            .take(CLAIM_TOKEN_LEN)
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_shape() {
        let token = LockCoordinator::random_token();
        assert_eq!(token.len(), CLAIM_TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_single_scheduler_always_claims() {
        let coordinator = LockCoordinator::single_scheduler();
        assert!(coordinator.is_single_scheduler());
        assert!(coordinator.try_claim("job_x", 4000).await);
        assert!(coordinator.try_claim("job_x", 4000).await);
    }
}
