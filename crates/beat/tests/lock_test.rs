use std::sync::Arc;

use cronbeat_beat::LockCoordinator;
use cronbeat_domain::LockStore;
use cronbeat_infrastructure::InMemoryLockStore;

#[tokio::test]
async fn test_two_schedulers_exactly_one_claims() {
    // 场景B：两个调度器实例几乎同时对同一key申请，恰好一个成功
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let beat_a = Arc::new(LockCoordinator::new(Arc::clone(&store)));
    let beat_b = Arc::new(LockCoordinator::new(Arc::clone(&store)));

    let task_a = {
        let beat = Arc::clone(&beat_a);
        tokio::spawn(async move { beat.try_claim("job_x", 4000).await })
    };
    let task_b = {
        let beat = Arc::clone(&beat_b);
        tokio::spawn(async move { beat.try_claim("job_x", 4000).await })
    };

    let claimed_a = task_a.await.unwrap();
    let claimed_b = task_b.await.unwrap();

    assert_ne!(claimed_a, claimed_b, "两个实例必须恰好一个抢到调度权");
}

#[tokio::test]
async fn test_many_racing_claimants_mutual_exclusion() {
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let coordinator = LockCoordinator::new(Arc::clone(&store));
        handles.push(tokio::spawn(
            async move { coordinator.try_claim("job_y", 60_000).await },
        ));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "TTL窗口内至多一个实例申请成功");
}

#[tokio::test]
async fn test_claims_on_distinct_keys_are_independent() {
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let coordinator = LockCoordinator::new(store);

    assert!(coordinator.try_claim("job_a", 60_000).await);
    assert!(coordinator.try_claim("job_b", 60_000).await);
    assert!(!coordinator.try_claim("job_a", 60_000).await);
}

#[tokio::test]
async fn test_lock_store_error_fails_closed() {
    let store = Arc::new(InMemoryLockStore::new());
    store.set_failing(true);

    let coordinator = LockCoordinator::new(Arc::clone(&store) as Arc<dyn LockStore>);
    // 锁存储出错按申请失败处理：宁可少调度也不能重复触发
    assert!(!coordinator.try_claim("job_x", 4000).await);

    // 存储恢复后重新可以申请
    store.set_failing(false);
    assert!(coordinator.try_claim("job_x", 4000).await);
}

#[tokio::test]
async fn test_non_positive_ttl_is_denied() {
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let coordinator = LockCoordinator::new(store);

    assert!(!coordinator.try_claim("job_x", 0).await);
    assert!(!coordinator.try_claim("job_x", -500).await);
}

#[tokio::test]
async fn test_claim_expires_with_ttl() {
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let coordinator = LockCoordinator::new(store);

    assert!(coordinator.try_claim("job_x", 20).await);
    assert!(!coordinator.try_claim("job_x", 20).await);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    // 锁在TTL后自然过期，下一个触发周期可以重新申请
    assert!(coordinator.try_claim("job_x", 20).await);
}
