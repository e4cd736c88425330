use std::sync::Arc;

use cronbeat_beat::DispatchRouter;
use cronbeat_domain::{
    CronSchedule, DestinationCategory, DestinationConfig, DestinationRepository, Entry,
    ExecutorFactory, JobDefinition, ScheduleRepository,
};
use cronbeat_infrastructure::{
    InMemoryDestinationRepository, InMemoryExecutorFactory, InMemoryScheduleRepository,
    InMemoryTaskExecutor,
};

struct RouterHarness {
    schedule_repo: Arc<InMemoryScheduleRepository>,
    destination_repo: Arc<InMemoryDestinationRepository>,
    factory: Arc<InMemoryExecutorFactory>,
    default_executor: Arc<InMemoryTaskExecutor>,
    router: DispatchRouter,
}

fn broker_destination(id: i64) -> DestinationConfig {
    DestinationConfig {
        id,
        category: DestinationCategory::Broker,
        transport: "amqp".to_string(),
        username: "guest".to_string(),
        password: "guest".to_string(),
        host: "mq.other.example.com".to_string(),
        port: 5672,
        virtual_host: "jobs".to_string(),
    }
}

fn harness() -> RouterHarness {
    let schedule_repo = Arc::new(InMemoryScheduleRepository::new());
    let destination_repo = Arc::new(InMemoryDestinationRepository::new());
    let factory = Arc::new(InMemoryExecutorFactory::new());
    let default_executor = Arc::new(InMemoryTaskExecutor::new("default"));

    let router = DispatchRouter::new(
        Arc::clone(&schedule_repo) as Arc<dyn ScheduleRepository>,
        Arc::clone(&destination_repo) as Arc<dyn DestinationRepository>,
        Arc::clone(&factory) as Arc<dyn ExecutorFactory>,
        Arc::clone(&default_executor) as _,
    );

    RouterHarness {
        schedule_repo,
        destination_repo,
        factory,
        default_executor,
        router,
    }
}

/// 创建一个job+entry，返回存储后的entry
async fn create_job_with_destination(
    harness: &RouterHarness,
    title: &str,
    destination_config_id: Option<i64>,
) -> Entry {
    let cron = CronSchedule::from_expr("*/5 * * * *").unwrap();
    let mut job = JobDefinition::new(title.to_string(), "traffic.rollup".to_string(), 0);
    job.is_enabled = true;
    job.destination_config_id = destination_config_id;
    let entry = Entry::new(title.to_string(), "traffic.rollup".to_string(), 0);

    harness
        .schedule_repo
        .create_job(&job, &entry, &cron)
        .await
        .unwrap();
    harness.schedule_repo.get_entry(title).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_entry_without_destination_uses_default_executor() {
    let harness = harness();
    let entry = create_job_with_destination(&harness, "流量汇总", None).await;

    let executor = harness.router.resolve(&entry).await;
    assert_eq!(executor.identity(), "default");
    assert!(harness.router.is_default(&entry).await);
    assert_eq!(harness.factory.created_count(), 0);
}

#[tokio::test]
async fn test_broker_destination_gets_dedicated_executor() {
    let harness = harness();
    harness.destination_repo.insert(broker_destination(7)).await;
    let entry = create_job_with_destination(&harness, "流量汇总", Some(7)).await;

    let executor = harness.router.resolve(&entry).await;
    assert_eq!(executor.identity(), "mq.other.example.com:jobs");
    assert!(!harness.router.is_default(&entry).await);

    // 条目的任务标识被懒注册到备用执行器上
    let alternate = harness
        .factory
        .executor_for("mq.other.example.com:jobs")
        .await
        .unwrap();
    assert_eq!(
        alternate.registered_tasks().await,
        vec!["traffic.rollup".to_string()]
    );
}

#[tokio::test]
async fn test_executor_handles_are_cached_per_destination() {
    let harness = harness();
    harness.destination_repo.insert(broker_destination(7)).await;
    let entry = create_job_with_destination(&harness, "流量汇总", Some(7)).await;

    harness.router.resolve(&entry).await;
    harness.router.resolve(&entry).await;
    harness.router.resolve(&entry).await;

    // 相同host:virtual_host只构造一次执行器句柄
    assert_eq!(harness.factory.created_count(), 1);
    assert_eq!(harness.router.cached_executor_count().await, 1);
}

#[tokio::test]
async fn test_non_broker_destination_falls_back_to_default() {
    let harness = harness();
    let mut destination = broker_destination(9);
    destination.category = DestinationCategory::Other;
    harness.destination_repo.insert(destination).await;
    let entry = create_job_with_destination(&harness, "流量汇总", Some(9)).await;

    let executor = harness.router.resolve(&entry).await;
    assert_eq!(executor.identity(), "default");
    assert_eq!(harness.factory.created_count(), 0);
}

#[tokio::test]
async fn test_missing_destination_falls_back_to_default() {
    let harness = harness();
    // 引用了不存在的目标配置：回退默认执行器，绝不阻塞
    let entry = create_job_with_destination(&harness, "流量汇总", Some(404)).await;

    let executor = harness.router.resolve(&entry).await;
    assert_eq!(executor.identity(), "default");
}

#[tokio::test]
async fn test_unknown_entry_uses_default_executor() {
    let harness = harness();
    let entry = Entry::new("孤儿条目".to_string(), "orphan.task".to_string(), 1);

    let executor = harness.router.resolve(&entry).await;
    assert_eq!(executor.identity(), "default");
    assert!(harness.router.is_default(&entry).await);
    // 默认执行器上没有注册副作用
    assert!(harness.default_executor.registered_tasks().await.is_empty());
}
