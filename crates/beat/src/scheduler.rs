use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use cronbeat_core::{BeatConfig, SchedulerError, SchedulerResult};
use cronbeat_domain::{Entry, ScheduleRepository, TaskMessage, TaskRouting};
use cronbeat_infrastructure::observability::{MetricsCollector, StructuredLogger};

use crate::cron_utils::CronTrigger;
use crate::lock::LockCoordinator;
use crate::outcome::OutcomeRecorder;
use crate::router::DispatchRouter;
use crate::schedule_sync::{ChangeCursor, ScheduleSyncService};

/// 调度循环状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeatState {
    Stopped,
    Running,
    Paused,
}

/// 内存中的调度条目：持久条目 + 已解析的CRON触发器
pub struct ScheduleEntry {
    pub entry: Entry,
    pub trigger: CronTrigger,
    dirty: bool,
}

impl ScheduleEntry {
    pub fn new(entry: Entry, trigger: CronTrigger) -> Self {
        Self {
            entry,
            trigger,
            dirty: false,
        }
    }

    /// 判定是否到期，并给出下一次触发时间
    ///
    /// 返回 `(是否到期, 触发时间)`：到期时为本次错过的触发点，
    /// 未到期时为下一次应触发的时间点。
    pub fn is_due(&self, now: DateTime<Utc>) -> (bool, Option<DateTime<Utc>>) {
        let anchor = self
            .entry
            .last_run_at
            .unwrap_or(now - chrono::Duration::minutes(1));

        match self.trigger.next_run_time(anchor) {
            Some(next) if next <= now => (true, Some(next)),
            Some(next) => (false, Some(next)),
            None => (false, None),
        }
    }
}

/// 周期调度循环（Beat）
///
/// 单线程协作式的tick引擎：每次唤醒评估所有内存条目，对到期
/// 条目先经LockCoordinator申请跨进程调度权，申请成功才经
/// DispatchRouter分发并记录结果，最后与持久调度表对账。
/// 多个Beat进程可以并发运行，互斥完全由锁存储原语保证。
pub struct BeatScheduler {
    schedule_repo: Arc<dyn ScheduleRepository>,
    sync_service: ScheduleSyncService,
    router: DispatchRouter,
    lock: LockCoordinator,
    outcome: OutcomeRecorder,
    metrics: Arc<MetricsCollector>,
    config: BeatConfig,
    state: BeatState,
    entries: HashMap<String, ScheduleEntry>,
    synced_job_ids: HashSet<i64>,
    change_cursor: ChangeCursor,
    last_flush: Option<DateTime<Utc>>,
}

impl BeatScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        sync_service: ScheduleSyncService,
        router: DispatchRouter,
        lock: LockCoordinator,
        outcome: OutcomeRecorder,
        metrics: Arc<MetricsCollector>,
        config: BeatConfig,
    ) -> Self {
        Self {
            schedule_repo,
            sync_service,
            router,
            lock,
            outcome,
            metrics,
            config,
            state: BeatState::Stopped,
            entries: HashMap::new(),
            synced_job_ids: HashSet::new(),
            change_cursor: ChangeCursor::default(),
            last_flush: None,
        }
    }

    pub fn state(&self) -> BeatState {
        self.state
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// 查看内存中的某个条目（诊断用）
    pub fn entry(&self, name: &str) -> Option<&ScheduleEntry> {
        self.entries.get(name)
    }

    /// 启动调度循环（完成初始对账）
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.state != BeatState::Stopped {
            return Err(SchedulerError::Internal(
                "调度循环已在运行中".to_string(),
            ));
        }

        let now = Utc::now();
        self.reconcile(now).await;
        self.last_flush = Some(now);
        self.state = BeatState::Running;

        info!(
            "Beat调度循环已启动，载入 {} 个条目，最大唤醒间隔 {}s",
            self.entries.len(),
            self.config.max_interval_seconds
        );
        Ok(())
    }

    /// 暂停：保持进程存活但不再评估条目
    pub fn pause(&mut self) {
        if self.state == BeatState::Running {
            self.state = BeatState::Paused;
            info!("Beat调度循环已暂停");
        } else {
            warn!("当前状态 {:?} 不允许暂停", self.state);
        }
    }

    pub fn resume(&mut self) {
        if self.state == BeatState::Paused {
            self.state = BeatState::Running;
            info!("Beat调度循环已恢复");
        } else {
            warn!("当前状态 {:?} 不允许恢复", self.state);
        }
    }

    /// 停止：落盘未持久化的运行状态
    pub async fn stop(&mut self) {
        self.flush_dirty().await;
        self.state = BeatState::Stopped;
        info!("Beat调度循环已停止");
    }

    /// 运行调度循环直到收到关闭信号
    ///
    /// 关闭信号只打断两次tick之间的休眠：进行中的分发和结果
    /// 写入总是完整执行完毕（优雅排空）。
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        self.start().await?;

        loop {
            let sleep_for = match self.state {
                BeatState::Paused => Duration::from_secs(self.config.max_interval_seconds),
                _ => self.run_pending(Utc::now()).await,
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown_rx.recv() => {
                    info!("Beat收到关闭信号，停止申请新的调度权");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// 执行一轮调度，返回到下一次唤醒的休眠时长
    pub async fn run_pending(&mut self, now: DateTime<Utc>) -> Duration {
        let tick_start = std::time::Instant::now();
        let mut next_wake: Option<DateTime<Utc>> = None;

        let names: Vec<String> = self.entries.keys().cloned().collect();
        for name in names {
            if let Some(candidate) = self.apply_entry(&name, now).await {
                next_wake = Some(match next_wake {
                    Some(current) => current.min(candidate),
                    None => candidate,
                });
            }
        }

        if self.should_flush(now) {
            self.flush_dirty().await;
            self.last_flush = Some(now);
        }

        self.reconcile(now).await;

        self.metrics.set_active_entries(self.entries.len() as f64);
        self.metrics
            .record_tick_duration(tick_start.elapsed().as_secs_f64());

        let max_interval = Duration::from_secs(self.config.max_interval_seconds);
        match next_wake {
            Some(when) => {
                let millis = (when - now).num_milliseconds().max(0) as u64;
                Duration::from_millis(millis).min(max_interval)
            }
            None => max_interval,
        }
    }

    /// 评估单个条目，返回用于计算休眠间隔的下一次触发时间
    async fn apply_entry(&mut self, name: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (due, next_candidate, ttl_ms, entry_snapshot) = {
            let scheduled = self.entries.get(name)?;
            if !scheduled.entry.enabled {
                return None;
            }

            let (due, fire_time) = scheduled.is_due(now);
            let next_after_now = scheduled.trigger.next_run_time(now);
            // 锁TTL取到下一次合法触发的间隔减去安全余量，
            // 让锁在下一个触发点之前自然过期
            let ttl_ms = next_after_now
                .map(|next| (next - now).num_milliseconds() - self.config.lock_safety_margin_ms)
                .unwrap_or(0);

            let candidate = if due { next_after_now } else { fire_time };
            (due, candidate, ttl_ms, scheduled.entry.clone())
        };

        if !due {
            return next_candidate;
        }

        let claimed = self.lock.try_claim(&entry_snapshot.name, ttl_ms).await;
        self.outcome.log_schedule_claim(&entry_snapshot.name, claimed);

        if !claimed {
            // 另一个调度器会分发本次触发；被拒不是错误，也不写结果记录
            self.metrics.record_claim_denied();
            if self.config.advance_on_denied_claim {
                if let Some(scheduled) = self.entries.get_mut(name) {
                    scheduled.entry.advance(now);
                    scheduled.dirty = true;
                }
            }
            return next_candidate;
        }

        // 抢到调度权后重新判定，防御判定与抢锁之间的竞态
        let still_due = self
            .entries
            .get(name)
            .map(|scheduled| scheduled.is_due(Utc::now()).0)
            .unwrap_or(false);

        if still_due {
            self.dispatch_entry(&entry_snapshot, now).await;
            if let Some(scheduled) = self.entries.get_mut(name) {
                scheduled.entry.advance(now);
                scheduled.dirty = true;
            }
        }

        next_candidate
    }

    /// 分发一个到期条目并记录结果
    async fn dispatch_entry(&self, entry: &Entry, now: DateTime<Utc>) {
        let sched_id = Uuid::new_v4();

        let job = match self.schedule_repo.get_job_for_entry(&entry.name).await {
            Ok(job) => job,
            Err(e) => {
                warn!("查询条目 {} 所属任务定义失败: {e}", entry.name);
                None
            }
        };

        // 乐观成功记录先行，分发抛错后补写失败明细
        self.outcome
            .begin(sched_id, &entry.name, job.as_ref().map(|j| j.id), now)
            .await;

        let executor = self.router.resolve(entry).await;
        let message = TaskMessage {
            sched_id,
            task_name: entry.task_name.clone(),
            args: entry.args.clone(),
            kwargs: entry.kwargs.clone(),
            routing: TaskRouting::for_entry(entry),
            priority: entry.priority,
            expires: entry.expires,
            run_date: now,
        };

        match executor.send(&message).await {
            Ok(receipt) => {
                let is_default = self.router.is_default(entry).await;
                StructuredLogger::log_entry_dispatched(
                    &entry.name,
                    sched_id,
                    &receipt.queue,
                    is_default,
                );
                self.metrics.record_dispatch(true);
            }
            Err(e) => {
                // 分发失败不重试，条目保持启用，下一个自然触发点再试
                error!("条目 {} 分发失败: {e}", entry.name);
                self.metrics.record_dispatch(false);
                self.outcome.fail(sched_id, &e.to_string()).await;
            }
        }
    }

    fn should_flush(&self, now: DateTime<Utc>) -> bool {
        match self.last_flush {
            Some(last) => {
                (now - last).num_seconds() >= self.config.sync_interval_seconds as i64
            }
            None => true,
        }
    }

    /// 批量回写条目运行状态，限制写放大
    async fn flush_dirty(&mut self) {
        for scheduled in self.entries.values_mut().filter(|s| s.dirty) {
            match self
                .schedule_repo
                .save_entry_run_state(
                    &scheduled.entry.name,
                    scheduled.entry.last_run_at,
                    scheduled.entry.total_run_count,
                )
                .await
            {
                Ok(()) => scheduled.dirty = false,
                Err(e) => {
                    // 保持dirty，下个同步周期重试
                    warn!("回写条目 {} 运行状态失败: {e}", scheduled.entry.name);
                }
            }
        }
    }

    /// 与持久调度表对账
    ///
    /// 调度表不可达时跳过本轮对账，继续用内存中已知的条目调度。
    async fn reconcile(&mut self, now: DateTime<Utc>) {
        let changed = match self.sync_service.poll_changed(&mut self.change_cursor).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!("调度表不可达，本轮跳过对账: {e}");
                return;
            }
        };

        if !changed {
            return;
        }

        let sync_result = self.sync_service.sync_newly_enabled(&self.synced_job_ids).await;
        match sync_result {
            Ok(materialized) => {
                for (job, _) in &materialized {
                    self.synced_job_ids.insert(job.id);
                }
            }
            Err(e) => {
                warn!("同步新启用任务失败: {e}");
            }
        }

        match self.sync_service.sweep_expired(now).await {
            Ok(0) => {}
            Ok(swept) => info!("截止时间清扫停用了 {swept} 个任务"),
            Err(e) => warn!("截止时间清扫失败: {e}"),
        }

        self.refresh_entries().await;
    }

    /// 用表中已启用的条目重建内存条目集
    ///
    /// 本地较新的运行状态被保留；CRON无效的条目被单独停用，
    /// 绝不因一个坏条目中断整个循环。
    async fn refresh_entries(&mut self) {
        // 先落盘，避免替换条目集时丢失未持久化的运行状态
        self.flush_dirty().await;

        let db_entries = match self.schedule_repo.list_enabled_entries().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("读取启用条目失败，保留现有内存条目: {e}");
                return;
            }
        };

        let mut fresh: HashMap<String, ScheduleEntry> = HashMap::new();
        for db_entry in db_entries {
            let cron = match self.schedule_repo.get_cron(db_entry.cron_schedule_id).await {
                Ok(Some(cron)) => cron,
                Ok(None) => {
                    warn!(
                        "条目 {} 引用的cron行 {} 不存在，跳过",
                        db_entry.name, db_entry.cron_schedule_id
                    );
                    continue;
                }
                Err(e) => {
                    warn!("读取条目 {} 的cron行失败: {e}", db_entry.name);
                    continue;
                }
            };

            match CronTrigger::new(&cron.expression()) {
                Ok(trigger) => {
                    let name = db_entry.name.clone();
                    let mut scheduled = ScheduleEntry::new(db_entry, trigger);
                    if let Some(known) = self.entries.get(&name) {
                        if known.entry.total_run_count > scheduled.entry.total_run_count {
                            scheduled.entry.last_run_at = known.entry.last_run_at;
                            scheduled.entry.total_run_count = known.entry.total_run_count;
                            scheduled.dirty = known.dirty;
                        }
                    }
                    fresh.insert(name, scheduled);
                }
                Err(e) => {
                    error!(
                        "条目 {} 的CRON表达式无效，已停用该条目: {e}",
                        db_entry.name
                    );
                    if let Err(err) = self
                        .schedule_repo
                        .set_entry_enabled(&db_entry.name, false)
                        .await
                    {
                        warn!("停用无效条目 {} 失败: {err}", db_entry.name);
                    }
                }
            }
        }

        self.entries = fresh;
    }
}
