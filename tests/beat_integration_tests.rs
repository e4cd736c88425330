//! 多调度器部署下的端到端行为

use std::sync::Arc;

use chrono::Utc;

use cronbeat_beat::{
    BeatScheduler, DispatchRouter, JobService, LockCoordinator, NewJobRequest, OutcomeRecorder,
    ScheduleSyncService, TaskRegistry,
};
use cronbeat_core::BeatConfig;
use cronbeat_domain::{
    DestinationCategory, DestinationConfig, DestinationRepository, ExecutorFactory, LockStore,
    ScheduleRepository,
};
use cronbeat_infrastructure::{
    InMemoryDestinationRepository, InMemoryExecutorFactory, InMemoryLockStore,
    InMemoryOutcomeRepository, InMemoryScheduleRepository, InMemoryTaskExecutor, MetricsCollector,
};

struct Cluster {
    repo: Arc<InMemoryScheduleRepository>,
    outcome_repo: Arc<InMemoryOutcomeRepository>,
    destination_repo: Arc<InMemoryDestinationRepository>,
    lock_store: Arc<InMemoryLockStore>,
    registry: Arc<TaskRegistry>,
}

/// 测试用配置：安全余量置0，避免tick落在触发点前1秒内时TTL不为正
fn test_config() -> BeatConfig {
    let mut config = BeatConfig::default();
    config.lock_safety_margin_ms = 0;
    config
}

impl Cluster {
    fn new() -> Self {
        let registry = Arc::new(TaskRegistry::new());
        registry.register_name("report.daily");

        Self {
            repo: Arc::new(InMemoryScheduleRepository::new()),
            outcome_repo: Arc::new(InMemoryOutcomeRepository::new()),
            destination_repo: Arc::new(InMemoryDestinationRepository::new()),
            lock_store: Arc::new(InMemoryLockStore::new()),
            registry,
        }
    }

    fn job_service(&self) -> JobService {
        JobService::new(
            Arc::clone(&self.repo) as Arc<dyn ScheduleRepository>,
            Arc::clone(&self.registry),
        )
    }

    /// 组装一个独立的Beat进程（共享调度表和锁存储，独立执行器）
    fn beat(
        &self,
        host: &str,
    ) -> (
        BeatScheduler,
        Arc<InMemoryTaskExecutor>,
        Arc<InMemoryExecutorFactory>,
    ) {
        let executor = Arc::new(InMemoryTaskExecutor::new("default"));
        let factory = Arc::new(InMemoryExecutorFactory::new());

        let sync_service = ScheduleSyncService::new(
            Arc::clone(&self.repo) as Arc<dyn ScheduleRepository>,
            Arc::clone(&self.registry),
            Arc::clone(&executor) as _,
        );
        let router = DispatchRouter::new(
            Arc::clone(&self.repo) as Arc<dyn ScheduleRepository>,
            Arc::clone(&self.destination_repo) as Arc<dyn DestinationRepository>,
            Arc::clone(&factory) as Arc<dyn ExecutorFactory>,
            Arc::clone(&executor) as _,
        );
        let lock = LockCoordinator::new(Arc::clone(&self.lock_store) as Arc<dyn LockStore>);
        let config = test_config();
        let outcome = OutcomeRecorder::with_host(
            Arc::clone(&self.outcome_repo) as _,
            config.outcome_error_truncate_len,
            host.to_string(),
        );

        let scheduler = BeatScheduler::new(
            Arc::clone(&self.repo) as Arc<dyn ScheduleRepository>,
            sync_service,
            router,
            lock,
            outcome,
            Arc::new(MetricsCollector::new()),
            config,
        );

        (scheduler, executor, factory)
    }
}

#[tokio::test]
async fn test_two_beats_dispatch_a_tick_exactly_once() {
    let cluster = Cluster::new();
    cluster
        .job_service()
        .create_job(NewJobRequest::new("日报汇总", "* * * * *", "report.daily"))
        .await
        .unwrap();

    let (mut beat_a, executor_a, _) = cluster.beat("beat-a");
    let (mut beat_b, executor_b, _) = cluster.beat("beat-b");

    beat_a.start().await.unwrap();
    beat_b.start().await.unwrap();

    // 两个进程在同一个唤醒窗口内评估同一个到期条目
    let now = Utc::now();
    beat_a.run_pending(now).await;
    beat_b.run_pending(now).await;

    let sent_a = executor_a.sent_messages().await.len();
    let sent_b = executor_b.sent_messages().await.len();
    assert_eq!(sent_a + sent_b, 1, "同一触发周期只允许一次分发");

    // 只有抢到锁的进程写了结果记录
    let outcomes = cluster.outcome_repo.outcomes().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success);
}

#[tokio::test]
async fn test_dispatch_routes_to_alternate_broker_end_to_end() {
    let cluster = Cluster::new();

    cluster
        .destination_repo
        .insert(DestinationConfig {
            id: 1,
            category: DestinationCategory::Broker,
            transport: "amqp".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            host: "mq.region2.example.com".to_string(),
            port: 5672,
            virtual_host: "jobs".to_string(),
        })
        .await;

    let mut request = NewJobRequest::new("跨机房日报", "* * * * *", "report.daily");
    request.destination_config_id = Some(1);
    cluster.job_service().create_job(request).await.unwrap();

    let (mut beat, default_executor, factory) = cluster.beat("beat-a");
    beat.start().await.unwrap();
    beat.run_pending(Utc::now()).await;

    // 触发消息被送往备用Broker而不是默认执行器
    assert!(default_executor.sent_messages().await.is_empty());
    let alternate = factory
        .executor_for("mq.region2.example.com:jobs")
        .await
        .expect("应为备用Broker构造执行器");
    let sent = alternate.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].task_name, "report.daily");

    let outcomes = cluster.outcome_repo.outcomes().await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_success);
}

#[tokio::test]
async fn test_late_starting_beat_sees_existing_schedule() {
    let cluster = Cluster::new();
    cluster
        .job_service()
        .create_job(NewJobRequest::new("日报汇总", "0 2 * * *", "report.daily"))
        .await
        .unwrap();

    // 第一个进程先运行一轮
    let (mut beat_a, _, _) = cluster.beat("beat-a");
    beat_a.start().await.unwrap();
    beat_a.run_pending(Utc::now()).await;

    // 之后启动的进程通过初始对账看到同一张调度表
    let (mut beat_b, _, _) = cluster.beat("beat-b");
    beat_b.start().await.unwrap();
    assert_eq!(beat_b.entry_count(), 1);
}
