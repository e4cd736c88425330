use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;

use cronbeat_core::{SchedulerError, SchedulerResult};

/// CRON表达式解析和触发时间计算工具
///
/// 只接受标准的五字段crontab表达式（分 时 日 月 周）。
/// 当"日"和"周"两个字段同时受限时，按标准cron规则取并集：
/// 内部持有两份放宽后的时间表，触发时间取两者的较小值。
pub struct CronTrigger {
    expression: String,
    schedules: Vec<Schedule>,
}

impl CronTrigger {
    /// 创建新的CRON触发器
    pub fn new(cron_expr: &str) -> SchedulerResult<Self> {
        let fields: Vec<&str> = cron_expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCron {
                expr: cron_expr.to_string(),
                message: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let day_of_month = fields[2];
        let day_of_week = fields[4];

        let mut variants: Vec<Vec<&str>> = Vec::new();
        if day_of_month != "*" && day_of_week != "*" {
            // 日/周并集：分别放宽另一个字段
            let mut dom_only = fields.clone();
            dom_only[4] = "*";
            let mut dow_only = fields.clone();
            dow_only[2] = "*";
            variants.push(dom_only);
            variants.push(dow_only);
        } else {
            variants.push(fields.clone());
        }

        let mut schedules = Vec::with_capacity(variants.len());
        for variant in variants {
            // cron crate要求秒字段，固定补0
            let with_seconds = format!("0 {}", variant.join(" "));
            let schedule =
                Schedule::from_str(&with_seconds).map_err(|e| SchedulerError::InvalidCron {
                    expr: cron_expr.to_string(),
                    message: e.to_string(),
                })?;
            schedules.push(schedule);
        }

        Ok(Self {
            expression: fields.join(" "),
            schedules,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn validate(cron_expr: &str) -> SchedulerResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 规范化后的表达式
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格大于`after`的下一次触发时间
    pub fn next_run_time(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|s| s.after(&after).next())
            .min()
    }

    /// 从`from`开始的惰性触发时间序列（有限、可从任意时间点重启）
    pub fn iter_upcoming(&self, from: DateTime<Utc>) -> UpcomingTimes<'_> {
        UpcomingTimes {
            trigger: self,
            cursor: from,
        }
    }

    /// 取从`from`开始的前`count`个触发时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.iter_upcoming(from).take(count).collect()
    }

    /// 第`count`次未来触发时间，用于创建任务时计算截止运行时间
    pub fn last_run_time(&self, count: usize, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.iter_upcoming(from).take(count).last()
    }

    /// 检查给定时间是否应该触发
    pub fn should_trigger(&self, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        // 从未运行过的条目从一分钟前开始找，避免错过刚到的触发点
        let anchor = last_run.unwrap_or(now - Duration::minutes(1));
        match self.next_run_time(anchor) {
            Some(next) => next <= now,
            None => false,
        }
    }

    /// 下次触发距离现在的时长
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_run_time(now).map(|next| next - now)
    }
}

/// `CronTrigger::iter_upcoming` 返回的惰性序列
pub struct UpcomingTimes<'a> {
    trigger: &'a CronTrigger,
    cursor: DateTime<Utc>,
}

impl Iterator for UpcomingTimes<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.trigger.next_run_time(self.cursor)?;
        self.cursor = next;
        Some(next)
    }
}
