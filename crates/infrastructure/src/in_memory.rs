//! 内存版基础设施实现
//!
//! 供测试和无外部依赖的单机部署使用，语义与Redis/AMQP/Postgres
//! 实现保持一致：锁的set-if-absent在互斥锁内原子完成，调度表的
//! 成对变更在单次状态修改内完成。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use cronbeat_core::{SchedulerError, SchedulerResult};
use cronbeat_domain::{
    CronSchedule, DestinationConfig, DestinationRepository, DispatchOutcome, DispatchReceipt,
    Entry, ExecutorFactory, JobDefinition, LockStore, OutcomeRepository, ScheduleRepository,
    TaskExecutor, TaskIdentity, TaskMessage,
};

/// 内存锁存储
#[derive(Default)]
pub struct InMemoryLockStore {
    locks: Mutex<HashMap<String, (String, Instant)>>,
    failing: AtomicBool,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟锁存储故障
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn clear(&self) {
        self.locks.lock().await.clear();
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl_ms: i64) -> SchedulerResult<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::LockUnavailable(
                "simulated lock store outage".to_string(),
            ));
        }

        let now = Instant::now();
        let mut locks = self.locks.lock().await;

        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }

        locks.insert(
            key.to_string(),
            (token.to_string(), now + Duration::from_millis(ttl_ms.max(0) as u64)),
        );
        Ok(true)
    }
}

/// 内存任务执行器
pub struct InMemoryTaskExecutor {
    identity: String,
    registered: Mutex<HashSet<String>>,
    sent: Mutex<Vec<TaskMessage>>,
    send_error: Mutex<Option<String>>,
}

impl InMemoryTaskExecutor {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            registered: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            send_error: Mutex::new(None),
        }
    }

    /// 让后续send全部失败（None恢复正常）
    pub async fn set_send_error(&self, error: Option<String>) {
        *self.send_error.lock().await = error;
    }

    pub async fn sent_messages(&self) -> Vec<TaskMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn registered_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registered.lock().await.iter().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl TaskExecutor for InMemoryTaskExecutor {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn register_task(&self, task: &TaskIdentity) -> SchedulerResult<()> {
        self.registered.lock().await.insert(task.name.clone());
        Ok(())
    }

    async fn unregister_task(&self, name: &str) -> SchedulerResult<()> {
        self.registered.lock().await.remove(name);
        Ok(())
    }

    async fn send(&self, message: &TaskMessage) -> SchedulerResult<DispatchReceipt> {
        if let Some(error) = self.send_error.lock().await.clone() {
            return Err(SchedulerError::DispatchFailed(error));
        }

        self.sent.lock().await.push(message.clone());
        Ok(DispatchReceipt {
            sched_id: message.sched_id,
            queue: message.routing.queue.clone(),
        })
    }
}

/// 内存执行器工厂（按目标记录创建次数，供缓存复用测试）
#[derive(Default)]
pub struct InMemoryExecutorFactory {
    executors: Mutex<HashMap<String, Arc<InMemoryTaskExecutor>>>,
    created: AtomicUsize,
}

impl InMemoryExecutorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub async fn executor_for(&self, cache_key: &str) -> Option<Arc<InMemoryTaskExecutor>> {
        self.executors.lock().await.get(cache_key).cloned()
    }
}

#[async_trait]
impl ExecutorFactory for InMemoryExecutorFactory {
    async fn create(
        &self,
        destination: &DestinationConfig,
    ) -> SchedulerResult<Arc<dyn TaskExecutor>> {
        let executor = Arc::new(InMemoryTaskExecutor::new(destination.cache_key()));
        self.created.fetch_add(1, Ordering::SeqCst);
        self.executors
            .lock()
            .await
            .insert(destination.cache_key(), Arc::clone(&executor));
        Ok(executor)
    }
}

#[derive(Default)]
struct ScheduleState {
    jobs: HashMap<i64, JobDefinition>,
    entries: HashMap<String, Entry>,
    crons: HashMap<i64, CronSchedule>,
    next_job_id: i64,
    next_entry_id: i64,
    next_cron_id: i64,
    last_changed: Option<DateTime<Utc>>,
}

impl ScheduleState {
    fn bump_changed(&mut self) {
        self.last_changed = Some(Utc::now());
    }

    fn entry_name_for_job(&self, job_id: i64) -> Option<String> {
        let job = self.jobs.get(&job_id)?;
        let entry_id = job.periodic_entry_id?;
        self.entries
            .values()
            .find(|e| e.id == entry_id)
            .map(|e| e.name.clone())
    }
}

/// 内存调度表仓储
#[derive(Default)]
pub struct InMemoryScheduleRepository {
    state: Mutex<ScheduleState>,
    failing: AtomicBool,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟调度表不可达
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> SchedulerResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SchedulerError::DatabaseOperation(
                "simulated schedule store outage".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn create_job(
        &self,
        job: &JobDefinition,
        entry: &Entry,
        cron: &CronSchedule,
    ) -> SchedulerResult<JobDefinition> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if state.jobs.values().any(|j| j.title == job.title) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "job title already exists: {}",
                job.title
            )));
        }
        if state.entries.contains_key(&entry.name) {
            return Err(SchedulerError::DatabaseOperation(format!(
                "entry name already exists: {}",
                entry.name
            )));
        }

        // cron行按规范表达式去重
        let existing_cron_id = state
            .crons
            .values()
            .find(|c| c.expression() == cron.expression())
            .map(|c| c.id);
        let cron_id = match existing_cron_id {
            Some(id) => id,
            None => {
                state.next_cron_id += 1;
                let id = state.next_cron_id;
                let mut stored = cron.clone();
                stored.id = id;
                state.crons.insert(id, stored);
                id
            }
        };

        state.next_entry_id += 1;
        let entry_id = state.next_entry_id;
        let mut stored_entry = entry.clone();
        stored_entry.id = entry_id;
        stored_entry.cron_schedule_id = cron_id;
        stored_entry.date_changed = Utc::now();
        state.entries.insert(stored_entry.name.clone(), stored_entry);

        state.next_job_id += 1;
        let job_id = state.next_job_id;
        let mut stored_job = job.clone();
        stored_job.id = job_id;
        stored_job.cron_schedule_id = cron_id;
        stored_job.periodic_entry_id = Some(entry_id);
        stored_job.date_changed = Utc::now();
        state.jobs.insert(job_id, stored_job.clone());

        state.bump_changed();
        Ok(stored_job)
    }

    async fn get_job(&self, id: i64) -> SchedulerResult<Option<JobDefinition>> {
        self.check_available()?;
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn get_job_for_entry(&self, entry_name: &str) -> SchedulerResult<Option<JobDefinition>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let Some(entry) = state.entries.get(entry_name) else {
            return Ok(None);
        };
        Ok(state
            .jobs
            .values()
            .find(|j| j.periodic_entry_id == Some(entry.id) && !j.is_deleted)
            .cloned())
    }

    async fn list_enabled_jobs(&self) -> SchedulerResult<Vec<JobDefinition>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut jobs: Vec<JobDefinition> = state
            .jobs
            .values()
            .filter(|j| j.is_schedulable())
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn list_enabled_jobs_excluding(
        &self,
        excluding_ids: &[i64],
    ) -> SchedulerResult<Vec<JobDefinition>> {
        let jobs = self.list_enabled_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter(|j| !excluding_ids.contains(&j.id))
            .collect())
    }

    async fn list_deadline_expired_jobs(
        &self,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<JobDefinition>> {
        let jobs = self.list_enabled_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter(|j| j.is_deadline_expired(now))
            .collect())
    }

    async fn list_enabled_entries(&self) -> SchedulerResult<Vec<Entry>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut entries: Vec<Entry> = state
            .entries
            .values()
            .filter(|e| e.enabled)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn get_entry(&self, name: &str) -> SchedulerResult<Option<Entry>> {
        self.check_available()?;
        Ok(self.state.lock().await.entries.get(name).cloned())
    }

    async fn get_cron(&self, id: i64) -> SchedulerResult<Option<CronSchedule>> {
        self.check_available()?;
        Ok(self.state.lock().await.crons.get(&id).cloned())
    }

    async fn get_or_create_cron(&self, cron: &CronSchedule) -> SchedulerResult<CronSchedule> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if let Some(existing) = state
            .crons
            .values()
            .find(|c| c.expression() == cron.expression())
        {
            return Ok(existing.clone());
        }

        state.next_cron_id += 1;
        let id = state.next_cron_id;
        let mut stored = cron.clone();
        stored.id = id;
        state.crons.insert(id, stored.clone());
        Ok(stored)
    }

    async fn attach_entry(&self, job_id: i64, entry: &Entry) -> SchedulerResult<Entry> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        if !state.jobs.contains_key(&job_id) {
            return Err(SchedulerError::JobNotFound { id: job_id });
        }

        let existing = state.entries.get(&entry.name).cloned();
        let stored_entry = match existing {
            Some(existing) => existing,
            None => {
                state.next_entry_id += 1;
                let id = state.next_entry_id;
                let mut stored = entry.clone();
                stored.id = id;
                stored.date_changed = Utc::now();
                state.entries.insert(stored.name.clone(), stored.clone());
                stored
            }
        };

        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.periodic_entry_id = Some(stored_entry.id);
            job.date_changed = Utc::now();
        }
        state.bump_changed();

        Ok(stored_entry)
    }

    async fn save_entry_run_state(
        &self,
        name: &str,
        last_run_at: Option<DateTime<Utc>>,
        total_run_count: i64,
    ) -> SchedulerResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::EntryNotFound {
                name: name.to_string(),
            })?;

        // 运行状态回写不触发变更高水位
        entry.last_run_at = last_run_at;
        entry.total_run_count = total_run_count;
        Ok(())
    }

    async fn set_entry_enabled(&self, name: &str, enabled: bool) -> SchedulerResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let entry = state
            .entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::EntryNotFound {
                name: name.to_string(),
            })?;
        entry.enabled = enabled;
        entry.date_changed = Utc::now();
        state.bump_changed();
        Ok(())
    }

    async fn set_job_enabled(&self, job_id: i64, enabled: bool) -> SchedulerResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let entry_name = state.entry_name_for_job(job_id);
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        job.is_enabled = enabled;
        job.date_changed = Utc::now();

        if let Some(name) = entry_name {
            if let Some(entry) = state.entries.get_mut(&name) {
                entry.enabled = enabled;
                entry.date_changed = Utc::now();
            }
        }
        state.bump_changed();
        Ok(())
    }

    async fn disable_job_and_entry(&self, job_id: i64, remark: &str) -> SchedulerResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let entry_name = state.entry_name_for_job(job_id);
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        job.is_enabled = false;
        job.remark = remark.to_string();
        job.date_changed = Utc::now();

        if let Some(name) = entry_name {
            if let Some(entry) = state.entries.get_mut(&name) {
                entry.enabled = false;
                entry.date_changed = Utc::now();
            }
        }
        state.bump_changed();
        Ok(())
    }

    async fn soft_delete_job(&self, job_id: i64) -> SchedulerResult<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let entry_name = state.entry_name_for_job(job_id);
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::JobNotFound { id: job_id })?;
        job.is_deleted = true;
        job.is_enabled = false;
        job.date_changed = Utc::now();

        if let Some(name) = entry_name {
            if let Some(entry) = state.entries.get_mut(&name) {
                entry.enabled = false;
                entry.date_changed = Utc::now();
            }
        }
        state.bump_changed();
        Ok(())
    }

    async fn last_changed(&self) -> SchedulerResult<Option<DateTime<Utc>>> {
        self.check_available()?;
        Ok(self.state.lock().await.last_changed)
    }
}

/// 内存分发结果仓储
#[derive(Default)]
pub struct InMemoryOutcomeRepository {
    outcomes: Mutex<Vec<DispatchOutcome>>,
}

impl InMemoryOutcomeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn outcomes(&self) -> Vec<DispatchOutcome> {
        self.outcomes.lock().await.clone()
    }

    pub async fn get(&self, sched_id: Uuid) -> Option<DispatchOutcome> {
        self.outcomes
            .lock()
            .await
            .iter()
            .find(|o| o.sched_id == sched_id)
            .cloned()
    }
}

#[async_trait]
impl OutcomeRepository for InMemoryOutcomeRepository {
    async fn create(&self, outcome: &DispatchOutcome) -> SchedulerResult<()> {
        self.outcomes.lock().await.push(outcome.clone());
        Ok(())
    }

    async fn mark_failed(&self, sched_id: Uuid, error_detail: &str) -> SchedulerResult<()> {
        let mut outcomes = self.outcomes.lock().await;
        // 记录不存在时为幂等no-op
        if let Some(outcome) = outcomes.iter_mut().find(|o| o.sched_id == sched_id) {
            outcome.is_success = false;
            outcome.error_detail = error_detail.to_string();
        }
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> SchedulerResult<Vec<DispatchOutcome>> {
        let outcomes = self.outcomes.lock().await;
        Ok(outcomes
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// 内存分发目标配置仓储
#[derive(Default)]
pub struct InMemoryDestinationRepository {
    destinations: Mutex<HashMap<i64, DestinationConfig>>,
}

impl InMemoryDestinationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, destination: DestinationConfig) {
        self.destinations
            .lock()
            .await
            .insert(destination.id, destination);
    }
}

#[async_trait]
impl DestinationRepository for InMemoryDestinationRepository {
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DestinationConfig>> {
        Ok(self.destinations.lock().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_store_set_if_absent() {
        let store = InMemoryLockStore::new();

        assert!(store.set_if_absent("job_x", "token1", 60_000).await.unwrap());
        // 同一key在TTL内第二次申请失败
        assert!(!store.set_if_absent("job_x", "token2", 60_000).await.unwrap());
        // 不同key不受影响
        assert!(store.set_if_absent("job_y", "token3", 60_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_store_expiry() {
        let store = InMemoryLockStore::new();

        assert!(store.set_if_absent("job_x", "token1", 10).await.unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_if_absent("job_x", "token2", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_store_failure_mode() {
        let store = InMemoryLockStore::new();
        store.set_failing(true);
        assert!(store.set_if_absent("job_x", "token", 1000).await.is_err());

        store.set_failing(false);
        assert!(store.set_if_absent("job_x", "token", 1000).await.unwrap());
    }

    #[tokio::test]
    async fn test_executor_captures_sent_messages() {
        let executor = InMemoryTaskExecutor::new("default");
        let message = TaskMessage {
            sched_id: Uuid::new_v4(),
            task_name: "cleanup".to_string(),
            args: serde_json::json!([]),
            kwargs: serde_json::json!({}),
            routing: cronbeat_domain::TaskRouting::defaults_for("cleanup"),
            priority: None,
            expires: None,
            run_date: Utc::now(),
        };

        let receipt = executor.send(&message).await.unwrap();
        assert_eq!(receipt.queue, "cleanup_q");
        assert_eq!(executor.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_schedule_repository_rejects_duplicate_title() {
        let repo = InMemoryScheduleRepository::new();
        let cron = CronSchedule::from_expr("*/5 * * * *").unwrap();
        let job = JobDefinition::new("夜间备份".to_string(), "backup.nightly".to_string(), 0);
        let entry = Entry::new("夜间备份".to_string(), "backup.nightly".to_string(), 0);

        repo.create_job(&job, &entry, &cron).await.unwrap();
        assert!(repo.create_job(&job, &entry, &cron).await.is_err());
    }

    #[tokio::test]
    async fn test_cron_rows_are_deduplicated() {
        let repo = InMemoryScheduleRepository::new();
        let cron = CronSchedule::from_expr("*/5 * * * *").unwrap();

        let first = repo.get_or_create_cron(&cron).await.unwrap();
        let second = repo.get_or_create_cron(&cron).await.unwrap();
        assert_eq!(first.id, second.id);

        let other = CronSchedule::from_expr("0 2 * * *").unwrap();
        let third = repo.get_or_create_cron(&other).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_run_state_writes_do_not_bump_high_water_mark() {
        let repo = InMemoryScheduleRepository::new();
        let cron = CronSchedule::from_expr("*/5 * * * *").unwrap();
        let mut job = JobDefinition::new("报表".to_string(), "report.daily".to_string(), 0);
        job.is_enabled = true;
        let entry = Entry::new("报表".to_string(), "report.daily".to_string(), 0);

        repo.create_job(&job, &entry, &cron).await.unwrap();
        let marker = repo.last_changed().await.unwrap();

        repo.save_entry_run_state("报表", Some(Utc::now()), 3)
            .await
            .unwrap();
        assert_eq!(repo.last_changed().await.unwrap(), marker);

        repo.set_entry_enabled("报表", false).await.unwrap();
        assert!(repo.last_changed().await.unwrap() > marker);
    }

    #[tokio::test]
    async fn test_outcome_mark_failed_is_idempotent_on_missing_row() {
        let repo = InMemoryOutcomeRepository::new();
        // 不存在的记录：no-op而不是错误
        assert!(repo.mark_failed(Uuid::new_v4(), "boom").await.is_ok());
    }
}
