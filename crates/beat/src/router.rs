use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::{
    DestinationRepository, Entry, ExecutorFactory, ScheduleRepository, TaskExecutor, TaskIdentity,
    TaskRouting,
};

/// 执行器句柄缓存容量上限
const EXECUTOR_CACHE_CAPACITY: usize = 16;

/// 多目标分发路由
///
/// 默认路径走进程的默认任务执行器；当条目所属任务定义指定了
/// Broker类别的目标配置时，按 `host:virtual_host` 键构造（或复用）
/// 指向该外部Broker的专用执行器句柄。解析失败一律回退默认执行器，
/// 绝不阻塞调度循环。
pub struct DispatchRouter {
    schedule_repo: Arc<dyn ScheduleRepository>,
    destination_repo: Arc<dyn DestinationRepository>,
    factory: Arc<dyn ExecutorFactory>,
    default_executor: Arc<dyn TaskExecutor>,
    cache: Mutex<HashMap<String, Arc<dyn TaskExecutor>>>,
    cache_capacity: usize,
}

impl DispatchRouter {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        destination_repo: Arc<dyn DestinationRepository>,
        factory: Arc<dyn ExecutorFactory>,
        default_executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        Self {
            schedule_repo,
            destination_repo,
            factory,
            default_executor,
            cache: Mutex::new(HashMap::new()),
            cache_capacity: EXECUTOR_CACHE_CAPACITY,
        }
    }

    /// 解析条目应使用的执行器
    pub async fn resolve(&self, entry: &Entry) -> Arc<dyn TaskExecutor> {
        match self.resolve_inner(entry).await {
            Ok(executor) => executor,
            Err(e) => {
                warn!(
                    "解析条目 {} 的分发目标失败，回退默认执行器: {e}",
                    entry.name
                );
                Arc::clone(&self.default_executor)
            }
        }
    }

    /// 判定条目是否走默认执行器（无任何副作用）
    pub async fn is_default(&self, entry: &Entry) -> bool {
        match self.lookup_broker_destination(entry).await {
            Ok(destination) => destination.is_none(),
            Err(_) => true,
        }
    }

    async fn resolve_inner(&self, entry: &Entry) -> SchedulerResult<Arc<dyn TaskExecutor>> {
        let Some(destination) = self.lookup_broker_destination(entry).await? else {
            return Ok(Arc::clone(&self.default_executor));
        };

        let key = destination.cache_key();
        let cached = { self.cache.lock().await.get(&key).cloned() };

        if let Some(executor) = cached {
            // 懒注册：执行器实现保证重复注册为no-op
            executor
                .register_task(&TaskIdentity {
                    name: entry.task_name.clone(),
                    routing: TaskRouting::for_entry(entry),
                })
                .await?;
            return Ok(executor);
        }

        let executor = self.factory.create(&destination).await?;
        debug!("为目标 {} 构造了新的执行器句柄", key);

        // 新句柄先清除同名的陈旧注册，再按条目路由注册
        executor.unregister_task(&entry.task_name).await?;
        executor
            .register_task(&TaskIdentity {
                name: entry.task_name.clone(),
                routing: TaskRouting::for_entry(entry),
            })
            .await?;

        let mut cache = self.cache.lock().await;
        if cache.len() >= self.cache_capacity {
            if let Some(evicted) = cache.keys().next().cloned() {
                cache.remove(&evicted);
                warn!("执行器缓存已满，逐出 {evicted}");
            }
        }
        cache.insert(key, Arc::clone(&executor));

        Ok(executor)
    }

    /// 查找条目所属任务定义引用的Broker目标配置
    async fn lookup_broker_destination(
        &self,
        entry: &Entry,
    ) -> SchedulerResult<Option<cronbeat_domain::DestinationConfig>> {
        let Some(job) = self.schedule_repo.get_job_for_entry(&entry.name).await? else {
            return Ok(None);
        };
        let Some(destination_id) = job.destination_config_id else {
            return Ok(None);
        };

        let destination = self
            .destination_repo
            .get_by_id(destination_id)
            .await?
            .ok_or(SchedulerError::DestinationNotFound { id: destination_id })?;

        if !destination.is_broker() {
            return Err(SchedulerError::Configuration(format!(
                "目标配置 {} 不是Broker类别",
                destination.id
            )));
        }

        Ok(Some(destination))
    }

    pub async fn cached_executor_count(&self) -> usize {
        self.cache.lock().await.len()
    }
}
