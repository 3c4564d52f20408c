use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// 单个逻辑索引的滚动统计（无锁计数 + 最近一次结果）
#[derive(Debug, Default)]
pub struct RolloverStats {
    rollovers_ok: AtomicU64,
    rollovers_failed: AtomicU64,
    catalog_failures: AtomicU64,
    sequence_fallbacks: AtomicU64,
    purged: AtomicU64,
    last: Mutex<LastRollover>,
}

#[derive(Clone, Debug, Default)]
struct LastRollover {
    index: Option<String>,
    at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl RolloverStats {
    pub fn record_success(&self, index: &str, at: DateTime<Utc>) {
        self.rollovers_ok.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last.lock();
        last.index = Some(index.to_string());
        last.at = Some(at);
        last.error = None;
    }

    pub fn record_failure(&self, err: &str) {
        self.rollovers_failed.fetch_add(1, Ordering::Relaxed);
        self.last.lock().error = Some(err.to_string());
    }

    pub fn record_catalog_failure(&self) {
        self.catalog_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_fallback(&self) {
        self.sequence_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purge(&self) {
        self.purged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, name: &str, initialized: bool, running: bool) -> IndexStats {
        let last = self.last.lock().clone();
        IndexStats {
            name: name.to_string(),
            initialized,
            running,
            rollovers_ok: self.rollovers_ok.load(Ordering::Relaxed),
            rollovers_failed: self.rollovers_failed.load(Ordering::Relaxed),
            catalog_failures: self.catalog_failures.load(Ordering::Relaxed),
            sequence_fallbacks: self.sequence_fallbacks.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            last_index: last.index,
            last_rollover_at: last.at,
            last_error: last.error,
        }
    }
}

/// 逻辑索引状态快照（对外只读）
#[derive(Clone, Debug, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub initialized: bool,
    pub running: bool,
    pub rollovers_ok: u64,
    pub rollovers_failed: u64,
    pub catalog_failures: u64,
    pub sequence_fallbacks: u64,
    pub purged: u64,
    pub last_index: Option<String>,
    pub last_rollover_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// 协调器整体报告
#[derive(Clone, Debug, Default, Serialize)]
pub struct CoordinatorReport {
    pub instance: String,
    pub indices: Vec<IndexStats>,
    /// 初始化失败的模型：(模型名, 错误)
    pub failed_models: Vec<(String, String)>,
}

impl fmt::Display for CoordinatorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔══════════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║ logidx instance: {:<44}║", self.instance)?;
        writeln!(f, "╠══════════════════════════════════════════════════════════════╣")?;
        for s in &self.indices {
            writeln!(
                f,
                "║ {:<32} {:>7} ok {:>5} err {:>5} purged ║",
                s.name,
                s.rollovers_ok,
                s.rollovers_failed,
                s.purged
            )?;
            writeln!(
                f,
                "║   current: {:<32} catalog-miss {:>5} ║",
                s.last_index.as_deref().unwrap_or("-"),
                s.catalog_failures
            )?;
            if let Some(e) = &s.last_error {
                writeln!(f, "║   last error: {:<47}║", truncate(e, 47))?;
            }
        }
        if !self.failed_models.is_empty() {
            writeln!(f, "╠──────────────────────────────────────────────────────────────╣")?;
            for (model, err) in &self.failed_models {
                writeln!(f, "║ FAILED {:<20} {:<33}║", model, truncate(err, 33))?;
            }
        }
        writeln!(f, "╚══════════════════════════════════════════════════════════════╝")?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_clears_previous_error() {
        let s = RolloverStats::default();
        s.record_failure("boom");
        s.record_success("x-2025-11-0002", Utc::now());

        let snap = s.snapshot("x", true, true);
        assert_eq!(snap.rollovers_ok, 1);
        assert_eq!(snap.rollovers_failed, 1);
        assert_eq!(snap.last_index.as_deref(), Some("x-2025-11-0002"));
        assert!(snap.last_error.is_none());
    }

    #[test]
    fn report_renders_failed_models() {
        let r = CoordinatorReport {
            instance: "acme".into(),
            indices: vec![RolloverStats::default().snapshot("acme-orders", true, false)],
            failed_models: vec![("alerts".into(), "invalid cron expression".into())],
        };
        let text = r.to_string();
        assert!(text.contains("acme-orders"));
        assert!(text.contains("FAILED alerts"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("短文本", 10), "短文本");
        assert_eq!(truncate("abcdef", 4).chars().count(), 4);
    }
}
