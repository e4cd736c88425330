use std::sync::Arc;

use chrono::{TimeZone, Utc};

use cronbeat_beat::{CronTrigger, JobService, NewJobRequest, TaskRegistry};
use cronbeat_domain::ScheduleRepository;
use cronbeat_infrastructure::InMemoryScheduleRepository;

fn service() -> (Arc<InMemoryScheduleRepository>, JobService) {
    let repo = Arc::new(InMemoryScheduleRepository::new());
    let registry = Arc::new(TaskRegistry::new());
    registry.register_name("report.daily");
    registry.register_name("backup.nightly");

    let service = JobService::new(
        Arc::clone(&repo) as Arc<dyn ScheduleRepository>,
        registry,
    );
    (repo, service)
}

#[tokio::test]
async fn test_create_job_creates_job_and_entry_pair() {
    let (repo, service) = service();

    let job = service
        .create_job(NewJobRequest::new("日报汇总", "0 2 * * *", "report.daily"))
        .await
        .unwrap();

    assert!(job.id > 0);
    assert!(job.is_enabled);
    assert!(job.periodic_entry_id.is_some());
    assert!(job.first_run_time.is_some());
    // max_run_count为0时不设截止时间
    assert!(job.deadline_run_time.is_none());

    let entry = repo.get_entry("日报汇总").await.unwrap().unwrap();
    assert_eq!(entry.task_name, "report.daily");
    assert!(entry.enabled);
    assert_eq!(Some(entry.id), job.periodic_entry_id);
}

#[tokio::test]
async fn test_create_job_rejects_bad_cron() {
    let (_, service) = service();

    let result = service
        .create_job(NewJobRequest::new("坏表达式", "0 2 * *", "report.daily"))
        .await;
    assert!(result.is_err());

    let result = service
        .create_job(NewJobRequest::new("坏表达式", "99 99 99 99 99", "report.daily"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_create_job_rejects_unregistered_task() {
    let (_, service) = service();

    let result = service
        .create_job(NewJobRequest::new("未知任务", "0 2 * * *", "no.such.task"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_create_job_rejects_duplicate_title() {
    let (_, service) = service();

    service
        .create_job(NewJobRequest::new("夜间备份", "0 3 * * *", "backup.nightly"))
        .await
        .unwrap();
    let result = service
        .create_job(NewJobRequest::new("夜间备份", "0 4 * * *", "backup.nightly"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_deadline_is_nth_future_fire_time() {
    let (_, service) = service();

    let mut request = NewJobRequest::new("限次任务", "*/5 * * * *", "report.daily");
    request.max_run_count = 5;

    let job = service.create_job(request).await.unwrap();

    // 截止时间必须精确等于创建时刻起第5次触发时间
    let trigger = CronTrigger::new("*/5 * * * *").unwrap();
    let expected = trigger.last_run_time(5, job.first_run_time.unwrap()).unwrap();
    assert_eq!(job.deadline_run_time, Some(expected));
}

#[tokio::test]
async fn test_enable_disable_and_remove_propagate_to_entry() {
    let (repo, service) = service();

    let job = service
        .create_job(NewJobRequest::new("日报汇总", "0 2 * * *", "report.daily"))
        .await
        .unwrap();

    service.disable_job(job.id).await.unwrap();
    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert!(!stored.is_enabled);
    assert!(!repo.get_entry("日报汇总").await.unwrap().unwrap().enabled);

    service.enable_job(job.id).await.unwrap();
    assert!(repo.get_job(job.id).await.unwrap().unwrap().is_enabled);
    assert!(repo.get_entry("日报汇总").await.unwrap().unwrap().enabled);

    service.remove_job(job.id).await.unwrap();
    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert!(stored.is_deleted);
    assert!(!stored.is_enabled);
    assert!(!repo.get_entry("日报汇总").await.unwrap().unwrap().enabled);
}

#[tokio::test]
async fn test_preview_run_times() {
    let (_, service) = service();
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let preview = service.preview_run_times("*/5 * * * *", 3, from).unwrap();
    assert_eq!(
        preview,
        vec![
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap(),
        ]
    );

    assert!(service.preview_run_times("* * *", 3, from).is_err());
}

#[tokio::test]
async fn test_cron_rows_are_shared_between_jobs() {
    let (repo, service) = service();

    let first = service
        .create_job(NewJobRequest::new("任务甲", "*/5 * * * *", "report.daily"))
        .await
        .unwrap();
    let second = service
        .create_job(NewJobRequest::new("任务乙", "*/5 * * * *", "backup.nightly"))
        .await
        .unwrap();

    // 相同的五字段组合复用同一cron行
    assert_eq!(first.cron_schedule_id, second.cron_schedule_id);
    let cron = repo.get_cron(first.cron_schedule_id).await.unwrap().unwrap();
    assert_eq!(cron.expression(), "*/5 * * * *");
}
