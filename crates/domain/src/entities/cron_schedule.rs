use serde::{Deserialize, Serialize};

use cronbeat_core::{SchedulerError, SchedulerResult};

/// 五字段CRON时间表
///
/// 字段顺序与标准crontab一致：分 时 日 月 周。
/// 相同字段组合在持久表中只保留一行，`expression()` 产生用于
/// 去重和查找的规范化字符串键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub id: i64,
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month_of_year: String,
    pub day_of_week: String,
}

impl CronSchedule {
    /// 从标准crontab表达式构造（必须恰好5个字段）
    pub fn from_expr(expr: &str) -> SchedulerResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidCron {
                expr: expr.to_string(),
                message: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        Ok(Self {
            id: 0, // 将由数据库生成
            minute: fields[0].to_string(),
            hour: fields[1].to_string(),
            day_of_month: fields[2].to_string(),
            month_of_year: fields[3].to_string(),
            day_of_week: fields[4].to_string(),
        })
    }

    /// 规范化表达式，作为去重键
    pub fn expression(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.expression())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_expr_requires_five_fields() {
        assert!(CronSchedule::from_expr("*/5 * * * *").is_ok());
        assert!(CronSchedule::from_expr("* * * *").is_err());
        assert!(CronSchedule::from_expr("0 0 * * * *").is_err());
        assert!(CronSchedule::from_expr("").is_err());
    }

    #[test]
    fn test_expression_is_canonical() {
        let schedule = CronSchedule::from_expr("  0   2  *  *   1-5 ").unwrap();
        assert_eq!(schedule.expression(), "0 2 * * 1-5");
    }
}
