use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};

use crate::error::{Error, Result};

/// 默认分区跨度（无法从调度推导时使用）
pub const DEFAULT_PARTITION_SPAN: Duration = Duration::from_secs(24 * 3600);

/// 逻辑索引的 cron 调度
///
/// 接受标准 5 段表达式（分 时 日 月 周），内部补齐秒字段。
#[derive(Clone, Debug)]
pub struct CronSchedule {
    expr: String,
    inner: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self> {
        let trimmed = expr.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {}", trimmed),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(Error::InvalidCron {
                    expr: expr.to_string(),
                    reason: format!("expected 5, 6 or 7 fields, found {}", n),
                })
            }
        };
        let inner = cron::Schedule::from_str(&normalized).map_err(|e| Error::InvalidCron {
            expr: expr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            expr: expr.to_string(),
            inner,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// `after` 之后的下一次触发时间
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&after).next()
    }

    /// 两次相邻触发之间的时长（从 `at` 所在年份的 1 月 1 日起量）
    pub fn partition_span(&self, at: DateTime<Utc>) -> Option<Duration> {
        let year_start = Utc.with_ymd_and_hms(at.year(), 1, 1, 0, 0, 0).single()?;
        let mut it = self.inner.after(&year_start);
        let first = it.next()?;
        let second = it.next()?;
        (second - first).to_std().ok()
    }
}

/// 调度可用时取其分区跨度，否则 24h
pub fn partition_span_or_default(schedule: Option<&CronSchedule>, at: DateTime<Utc>) -> Duration {
    schedule
        .and_then(|s| s.partition_span(at))
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_PARTITION_SPAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_expressions_are_accepted() {
        let s = CronSchedule::parse("0 0 * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 11, 26, 10, 30, 0).unwrap();
        assert_eq!(
            s.next_after(at),
            Some(Utc.with_ymd_and_hms(2025, 11, 27, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn invalid_expressions_are_config_errors() {
        assert!(matches!(
            CronSchedule::parse("every day"),
            Err(Error::InvalidCron { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("0 0 99 * *"),
            Err(Error::InvalidCron { .. })
        ));
    }

    #[test]
    fn partition_span_follows_cadence() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let daily = CronSchedule::parse("0 0 * * *").unwrap();
        assert_eq!(daily.partition_span(at), Some(Duration::from_secs(86_400)));

        let six_hourly = CronSchedule::parse("0 */6 * * *").unwrap();
        assert_eq!(
            six_hourly.partition_span(at),
            Some(Duration::from_secs(6 * 3600))
        );

        let seconds = CronSchedule::parse("*/30 * * * * *").unwrap();
        assert_eq!(seconds.partition_span(at), Some(Duration::from_secs(30)));
    }

    #[test]
    fn missing_schedule_defaults_to_a_day() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(partition_span_or_default(None, at), DEFAULT_PARTITION_SPAN);
    }
}
