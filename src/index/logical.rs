use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::naming::{next_technical_name, parse_technical_name, technical_name, wildcard};
use crate::core::schedule::{partition_span_or_default, CronSchedule};
use crate::core::{Model, RolloverMode};
use crate::engine::AliasAction;
use crate::error::{bounded, Error, Result};
use crate::index::context::EngineContext;
use crate::stats::{IndexStats, RolloverStats};
use crate::storage::CatalogEntry;

/// 回退序号撞名时最多探测的次数
const MAX_NAME_PROBES: usize = 16;

/// 逻辑索引的三类别名
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AliasNames {
    /// 写入别名：恒指向唯一的当前技术索引
    pub current: String,
    /// 修正写入别名：最近 N 个技术索引（窗口为 0 时不存在）
    pub patch: Option<String>,
    /// 读取别名：全部保留中的技术索引
    pub search: String,
}

impl AliasNames {
    fn for_logical(name: &str, patch_window: usize) -> Self {
        Self {
            current: format!("{}-current", name),
            patch: (patch_window > 0).then(|| format!("{}-patch", name)),
            search: format!("{}-search", name),
        }
    }

    fn all(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.current.as_str())
            .chain(self.patch.as_deref())
            .chain(std::iter::once(self.search.as_str()))
    }
}

/// 一次 rollover 的结果
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RolloverReport {
    pub new_index: String,
    /// 别名查询失败，按空集合计算序号
    pub sequence_fallback: bool,
    pub evicted_from_patch: Vec<String>,
    pub purged: Option<String>,
    pub catalog_written: bool,
}

/// catalog 校正结果
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: Vec<String>,
    pub removed: Vec<String>,
}

struct ScheduleHandle {
    id: u64,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// 逻辑索引：一个模型对应的一组按时间分区的技术索引
///
/// - 名称 `{instance}-{model}`；技术索引与别名都以 `名称-` 为前缀
/// - rollover 内部串行（`rollover_gate`），不同逻辑索引之间完全独立
pub struct LogicalIndex {
    name: String,
    model: Model,
    schedule: CronSchedule,
    aliases: AliasNames,
    ctx: EngineContext,
    initialized: AtomicBool,
    rollover_gate: tokio::sync::Mutex<()>,
    job: Mutex<Option<ScheduleHandle>>,
    job_seq: AtomicU64,
    stats: RolloverStats,
}

pub fn logical_name(instance: &str, model: &str) -> String {
    format!("{}-{}", instance, model)
}

impl LogicalIndex {
    /// 初始化逻辑索引（模板 → 基础索引 → 别名 → catalog 引导）
    ///
    /// 每一步都先查存在性再变更，可重复执行。搜索引擎错误中止本索引的初始化；
    /// catalog 写失败只记日志。调度不在这里启动，由调用方决定何时 `start`。
    pub async fn initialize(
        ctx: EngineContext,
        instance: &str,
        model: Model,
        update_template_if_exists: bool,
    ) -> Result<Arc<Self>> {
        let name = logical_name(instance, &model.name);
        let opts = &model.elasticsearch;

        if opts.rollover_mode != RolloverMode::Cron {
            return Err(Error::ModeMismatch {
                model: model.name.clone(),
                expected: RolloverMode::Cron.as_str(),
                found: opts.rollover_mode.as_str(),
            });
        }
        let schedule = CronSchedule::parse(&opts.cron)?;
        if opts.purge_enabled && opts.purge_max_indices == 0 {
            return Err(Error::Config(format!(
                "model {}: purge_max_indices must be at least 1 when purge is enabled",
                model.name
            )));
        }

        let idx = Arc::new(Self {
            aliases: AliasNames::for_logical(&name, opts.patch_window),
            name,
            schedule,
            ctx,
            initialized: AtomicBool::new(false),
            rollover_gate: tokio::sync::Mutex::new(()),
            job: Mutex::new(None),
            job_seq: AtomicU64::new(0),
            stats: RolloverStats::default(),
            model,
        });

        let deadline = idx.ctx.init_timeout;
        bounded("initialize", deadline, idx.bootstrap(update_template_if_exists)).await?;
        idx.initialized.store(true, Ordering::Release);
        tracing::info!(
            "Logical index {} initialized (cron: {}, patch window: {}, purge: {})",
            idx.name,
            idx.schedule.expr(),
            idx.model.elasticsearch.patch_window,
            idx.model.elasticsearch.purge_enabled
        );
        Ok(idx)
    }

    async fn bootstrap(&self, update_template_if_exists: bool) -> Result<()> {
        let engine = &self.ctx.engine;
        let pattern = wildcard(&self.name);

        // 1) 模板
        let template = self.template_name();
        let template_existed = engine.template_exists(&template).await?;
        if !template_existed || update_template_if_exists {
            engine
                .put_template(&template, &[pattern.clone()], &self.model.mapping())
                .await?;
            tracing::info!(
                "Template {} {}",
                template,
                if template_existed { "updated" } else { "created" }
            );
        }

        // 2) 当月基础索引（序号 0001）
        let now = self.ctx.now();
        let base = technical_name(&self.name, now.year(), now.month(), 1);
        if !engine.index_exists(&base).await? {
            engine.create_index(&base).await?;
            tracing::info!("Base index {} created", base);
        }

        // 3) 别名：仅在缺失时建立
        for alias in self.aliases.all() {
            if !engine.alias_exists(alias).await? {
                engine.put_alias(&pattern, alias).await?;
                tracing::info!("Alias {} -> {} created", alias, pattern);
            }
        }

        // 4) 首次初始化：登记基础索引（best-effort）
        if !template_existed {
            let entry = CatalogEntry::new(&self.name, &base, now);
            if let Err(e) = self.ctx.catalog.insert(&entry).await {
                self.stats.record_catalog_failure();
                tracing::warn!(
                    "Catalog bootstrap for {} failed (continuing, engine stays authoritative): {}",
                    base,
                    e
                );
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn aliases(&self) -> &AliasNames {
        &self.aliases
    }

    pub fn template_name(&self) -> String {
        format!("{}-template", self.name)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.job.lock().is_some()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
            .snapshot(&self.name, self.is_initialized(), self.is_running())
    }

    /// 执行一次 rollover
    ///
    /// 步骤严格顺序：别名重指 → patch → search → catalog → purge。
    /// 只有原子 rollover 本身失败才中止；之后的步骤失败只记日志。
    pub async fn rollover(&self) -> Result<RolloverReport> {
        let _gate = self.rollover_gate.lock().await;
        let r = self.rollover_locked().await;
        match &r {
            Ok(report) => self.stats.record_success(&report.new_index, self.ctx.now()),
            Err(e) => self.stats.record_failure(&e.to_string()),
        }
        r
    }

    async fn rollover_locked(&self) -> Result<RolloverReport> {
        let engine = &self.ctx.engine;
        let op = self.ctx.op_timeout;
        let now = self.ctx.now();
        let mut report = RolloverReport::default();

        // 1) current 别名背后的索引；失败则按空集合继续（保证可用性）
        let mut known =
            match bounded("get current alias", op, engine.get_alias(&self.aliases.current)).await {
                Ok(v) => self.own_members(v),
                Err(e) => {
                    tracing::warn!(
                        "Alias lookup for {} failed, falling back to sequence 0001: {}",
                        self.aliases.current,
                        e
                    );
                    self.stats.record_sequence_fallback();
                    report.sequence_fallback = true;
                    Vec::new()
                }
            };

        // 2) 下一个名字
        let new_index = self.next_free_name(&mut known, now).await?;

        // 3) 原子 rollover：唯一的真相边界
        bounded(
            "rollover",
            op,
            engine.rollover(&self.aliases.current, &new_index),
        )
        .await?;
        tracing::info!("Rolled over {} -> {}", self.aliases.current, new_index);
        report.new_index = new_index.clone();

        // 4) patch 窗口
        if let Some(patch) = &self.aliases.patch {
            report.evicted_from_patch = self.advance_patch(patch, &new_index).await;
        }

        // 5) search：在通配上重申（幂等）
        let search_ok = match bounded(
            "put search alias",
            op,
            engine.put_alias(&wildcard(&self.name), &self.aliases.search),
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "Adding {} to {} failed, skipping purge this cycle: {}",
                    new_index,
                    self.aliases.search,
                    e
                );
                false
            }
        };

        // 6) catalog（best-effort）
        let entry = CatalogEntry::new(&self.name, &new_index, now);
        match bounded("catalog insert", op, self.ctx.catalog.insert(&entry)).await {
            Ok(()) => report.catalog_written = true,
            Err(e) => {
                self.stats.record_catalog_failure();
                tracing::warn!("Catalog insert for {} failed (not retried): {}", new_index, e);
            }
        }

        // 7) purge：每轮最多删一个
        if self.model.elasticsearch.purge_enabled && search_ok {
            report.purged = self.purge_oldest(&new_index).await;
        }

        if self.ctx.reconcile_after_rollover {
            if let Err(e) = self.reconcile_catalog().await {
                tracing::warn!("Catalog reconcile for {} failed: {}", self.name, e);
            }
        }

        Ok(report)
    }

    /// 别名成员里只保留本逻辑索引的技术索引（排除前缀相同的其他逻辑索引）
    fn own_members(&self, members: Vec<String>) -> Vec<String> {
        members
            .into_iter()
            .filter(|m| parse_technical_name(&self.name, m).is_some())
            .collect()
    }

    fn next_name(&self, known: &[String], now: DateTime<Utc>) -> Result<String> {
        next_technical_name(&self.name, known, now).ok_or_else(|| Error::SequenceExhausted {
            logical: self.name.clone(),
            year: now.year(),
            month: now.month(),
        })
    }

    /// 计算下一个名字，并探测是否已存在（回退序号时可能撞到已有索引）
    async fn next_free_name(&self, known: &mut Vec<String>, now: DateTime<Utc>) -> Result<String> {
        let mut candidate = self.next_name(known, now)?;
        for _ in 0..MAX_NAME_PROBES {
            match bounded(
                "index exists",
                self.ctx.op_timeout,
                self.ctx.engine.index_exists(&candidate),
            )
            .await
            {
                Ok(false) => return Ok(candidate),
                Ok(true) => {
                    tracing::warn!("Technical index {} already exists, skipping", candidate);
                    known.push(candidate);
                    candidate = self.next_name(known, now)?;
                }
                Err(e) => {
                    tracing::debug!("Existence probe for {} failed: {}", candidate, e);
                    return Ok(candidate);
                }
            }
        }
        Ok(candidate)
    }

    /// 把新索引加入 patch，必要时同批淘汰最老的成员
    async fn advance_patch(&self, patch: &str, new_index: &str) -> Vec<String> {
        let engine = &self.ctx.engine;
        let op = self.ctx.op_timeout;
        let window = self.model.elasticsearch.patch_window;

        let mut actions = Vec::new();
        let mut evicted = Vec::new();
        match bounded("get patch alias", op, engine.get_alias(patch)).await {
            Ok(members) => {
                let mut members = self.own_members(members);
                members.retain(|m| m != new_index);
                members.sort();
                // 加入新索引后恰好 window 个
                let excess = (members.len() + 1).saturating_sub(window);
                for old in members.into_iter().take(excess) {
                    actions.push(AliasAction::remove(old.clone(), patch));
                    evicted.push(old);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Patch alias lookup for {} failed, adding {} without eviction: {}",
                    patch,
                    new_index,
                    e
                );
            }
        }
        actions.push(AliasAction::add(new_index, patch));

        if let Err(e) = bounded("update patch alias", op, engine.update_aliases(&actions)).await {
            tracing::warn!("Patch alias update for {} failed: {}", patch, e);
            return Vec::new();
        }
        if !evicted.is_empty() {
            tracing::info!("Evicted {:?} from {}", evicted, patch);
        }
        evicted
    }

    /// search 下超过上限时删除最老的一个技术索引及其 catalog 条目
    async fn purge_oldest(&self, new_index: &str) -> Option<String> {
        let engine = &self.ctx.engine;
        let op = self.ctx.op_timeout;
        let max = self.model.elasticsearch.purge_max_indices;

        let members = match bounded("get search alias", op, engine.get_alias(&self.aliases.search)).await
        {
            Ok(m) => self.own_members(m),
            Err(e) => {
                tracing::warn!("Purge skipped for {}: {}", self.name, e);
                return None;
            }
        };
        if members.len() <= max {
            return None;
        }
        // 名字内嵌可排序的年月+序号：字典序最小即最老
        let oldest = members.iter().min()?.clone();
        if oldest == new_index {
            return None;
        }

        if let Err(e) = bounded("delete index", op, engine.delete_index(&oldest)).await {
            tracing::warn!("Purge of {} failed: {}", oldest, e);
            return None;
        }
        self.stats.record_purge();
        tracing::info!(
            "Purged {} ({} indices behind {}, max {})",
            oldest,
            members.len(),
            self.aliases.search,
            max
        );

        if let Err(e) = bounded("catalog delete", op, self.ctx.catalog.delete(&self.name, &oldest)).await
        {
            self.stats.record_catalog_failure();
            tracing::warn!("Catalog delete for {} failed: {}", oldest, e);
        }
        Some(oldest)
    }

    /// 历史范围查询
    ///
    /// `depth_days == 0` 返回单个通配；否则查 `[at - (depth+1)×span, at]` 内创建的技术索引，
    /// span 取调度的相邻触发间隔（缺省 24h）。
    pub async fn find_indices(&self, at: DateTime<Utc>, depth_days: u32) -> Result<Vec<String>> {
        if depth_days == 0 {
            return Ok(vec![wildcard(&self.name)]);
        }
        let span = partition_span_or_default(Some(&self.schedule), at);
        let lookback = span
            .checked_mul(depth_days.saturating_add(1))
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .ok_or_else(|| Error::Config(format!("lookback of {} partitions overflows", depth_days)))?;
        let from = at - lookback;
        bounded(
            "catalog range query",
            self.ctx.op_timeout,
            self.ctx.catalog.find_range(&self.name, from, at),
        )
        .await
    }

    /// 以 search 别名为准校正 catalog：补登缺失条目，删除已不存在的条目
    pub async fn reconcile_catalog(&self) -> Result<ReconcileReport> {
        let op = self.ctx.op_timeout;
        let live: BTreeSet<String> = self
            .own_members(
                bounded(
                    "get search alias",
                    op,
                    self.ctx.engine.get_alias(&self.aliases.search),
                )
                .await?,
            )
            .into_iter()
            .collect();
        let recorded: BTreeSet<String> =
            bounded("catalog list", op, self.ctx.catalog.list(&self.name))
                .await?
                .into_iter()
                .map(|e| e.technical_name)
                .collect();

        let mut report = ReconcileReport::default();
        for name in live.difference(&recorded) {
            let created_at = self.infer_created_at(name);
            let entry = CatalogEntry::new(&self.name, name, created_at);
            bounded("catalog insert", op, self.ctx.catalog.insert(&entry)).await?;
            report.inserted.push(name.clone());
        }
        for name in recorded.difference(&live) {
            bounded("catalog delete", op, self.ctx.catalog.delete(&self.name, name)).await?;
            report.removed.push(name.clone());
        }
        if !report.inserted.is_empty() || !report.removed.is_empty() {
            tracing::info!(
                "Catalog reconciled for {}: +{} -{}",
                self.name,
                report.inserted.len(),
                report.removed.len()
            );
        }
        Ok(report)
    }

    /// 无记录时的创建时间：取名字里年月的 1 日，解析不了就用当前时间
    fn infer_created_at(&self, technical: &str) -> DateTime<Utc> {
        parse_technical_name(&self.name, technical)
            .and_then(|(y, m, _)| Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single())
            .unwrap_or_else(|| self.ctx.now())
    }

    /// 启动调度；未初始化或已在运行时返回 false
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.is_initialized() {
            return false;
        }
        let mut job = self.job.lock();
        if job.is_some() {
            return false;
        }
        let (tx, rx) = watch::channel(false);
        let id = self.job_seq.fetch_add(1, Ordering::Relaxed);
        let idx = self.clone();
        let task = tokio::spawn(async move { idx.schedule_loop(id, rx).await });
        *job = Some(ScheduleHandle { id, stop: tx, task });
        tracing::info!("Schedule started for {} ({})", self.name, self.schedule.expr());
        true
    }

    /// 发出停止信号；进行中的 rollover 会跑完
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        let handle = self.job.lock().take()?;
        let _ = handle.stop.send(true);
        Some(handle.task)
    }

    pub async fn stop_and_wait(&self) {
        if let Some(task) = self.stop() {
            if let Err(e) = task.await {
                tracing::warn!("Schedule task for {} ended abnormally: {}", self.name, e);
            }
        }
    }

    async fn schedule_loop(self: Arc<Self>, id: u64, mut stop: watch::Receiver<bool>) {
        loop {
            let now = self.ctx.now();
            let Some(next) = self.schedule.next_after(now) else {
                tracing::warn!("No upcoming firing for {}, schedule ends", self.name);
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *stop.borrow() {
                break;
            }

            // 串行执行：超时的 rollover 只会推迟下一次触发
            match self.rollover().await {
                Ok(r) => tracing::debug!("Rollover of {} done: {:?}", self.name, r),
                Err(e) => tracing::error!("Rollover of {} failed: {}", self.name, e),
            }
        }

        // 自行结束（无后续触发）时释放槽位；已被 stop 取走或换成新任务则不动
        let mut job = self.job.lock();
        if job.as_ref().map(|h| h.id) == Some(id) {
            *job = None;
        }
        drop(job);
        tracing::info!("Schedule stopped for {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ElasticsearchOptions, FieldKind};
    use crate::engine::MemoryEngine;
    use crate::index::context::Clock;
    use crate::storage::{CatalogStore, SqliteCatalog};
    use async_trait::async_trait;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn at(y: i32, m: u32, d: u32) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            )))
        }

        fn set(&self, t: DateTime<Utc>) {
            *self.0.lock() = t;
        }

        fn advance(&self, d: chrono::Duration) {
            *self.0.lock() += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }

    /// insert 恒失败的 catalog
    struct BrokenCatalog;

    #[async_trait]
    impl CatalogStore for BrokenCatalog {
        async fn insert(&self, _: &CatalogEntry) -> Result<()> {
            Err(Error::CatalogTask("database is down".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<()> {
            Err(Error::CatalogTask("database is down".into()))
        }
        async fn find_range(&self, _: &str, _: DateTime<Utc>, _: DateTime<Utc>) -> Result<Vec<String>> {
            Err(Error::CatalogTask("database is down".into()))
        }
        async fn list(&self, _: &str) -> Result<Vec<CatalogEntry>> {
            Err(Error::CatalogTask("database is down".into()))
        }
    }

    struct Fixture {
        engine: Arc<MemoryEngine>,
        catalog: Arc<SqliteCatalog>,
        clock: Arc<ManualClock>,
        ctx: EngineContext,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(MemoryEngine::new());
        let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let clock = ManualClock::at(2025, 11, 26);
        let ctx = EngineContext::new(engine.clone(), catalog.clone()).with_clock(clock.clone());
        Fixture {
            engine,
            catalog,
            clock,
            ctx,
        }
    }

    fn model(patch_window: usize, purge_max: Option<usize>) -> Model {
        Model::new(
            "orders",
            ElasticsearchOptions {
                patch_window,
                purge_enabled: purge_max.is_some(),
                purge_max_indices: purge_max.unwrap_or(30),
                ..ElasticsearchOptions::default()
            },
        )
        .with_field("customer", FieldKind::Keyword)
    }

    async fn catalog_names(f: &Fixture) -> Vec<String> {
        f.catalog
            .list("acme-orders")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.technical_name)
            .collect()
    }

    #[tokio::test]
    async fn initialize_bootstraps_template_base_index_aliases_and_catalog() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(2, None), false)
            .await
            .unwrap();

        assert_eq!(idx.name(), "acme-orders");
        assert!(idx.is_initialized());
        let (patterns, mapping) = f.engine.template("acme-orders-template").unwrap();
        assert_eq!(patterns, vec!["acme-orders-*"]);
        assert_eq!(mapping["properties"]["customer"]["type"], "keyword");

        assert_eq!(f.engine.indices(), vec!["acme-orders-2025-11-0001"]);
        for alias in ["acme-orders-current", "acme-orders-patch", "acme-orders-search"] {
            assert_eq!(f.engine.members(alias), vec!["acme-orders-2025-11-0001"]);
        }
        assert_eq!(catalog_names(&f).await, vec!["acme-orders-2025-11-0001"]);
    }

    #[tokio::test]
    async fn reinitialize_is_idempotent_and_only_updates_template_on_request() {
        let f = fixture();
        LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false)
            .await
            .unwrap();

        // 第二次：模板已存在，不写 catalog、不改模板
        let changed = model(0, None).with_field("amount", FieldKind::Double);
        LogicalIndex::initialize(f.ctx.clone(), "acme", changed.clone(), false)
            .await
            .unwrap();
        let (_, mapping) = f.engine.template("acme-orders-template").unwrap();
        assert!(mapping["properties"].get("amount").is_none());
        assert_eq!(catalog_names(&f).await.len(), 1);
        assert!(f.engine.members("acme-orders-patch").is_empty());

        LogicalIndex::initialize(f.ctx.clone(), "acme", changed, true)
            .await
            .unwrap();
        let (_, mapping) = f.engine.template("acme-orders-template").unwrap();
        assert_eq!(mapping["properties"]["amount"]["type"], "double");
        assert_eq!(f.engine.indices().len(), 1);
    }

    #[tokio::test]
    async fn configuration_errors_fail_initialization() {
        let f = fixture();

        let mut m = model(0, None);
        m.elasticsearch.rollover_mode = RolloverMode::TimeBased;
        let r = LogicalIndex::initialize(f.ctx.clone(), "acme", m, false).await;
        assert!(matches!(r, Err(Error::ModeMismatch { .. })));

        let mut m = model(0, None);
        m.elasticsearch.cron = "not a cron".into();
        let r = LogicalIndex::initialize(f.ctx.clone(), "acme", m, false).await;
        assert!(matches!(r, Err(Error::InvalidCron { .. })));

        let r = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, Some(0)), false).await;
        assert!(matches!(r, Err(Error::Config(_))));

        // 配置错误在触达引擎之前就返回
        assert!(f.engine.indices().is_empty());
    }

    #[tokio::test]
    async fn engine_error_aborts_initialization() {
        let f = fixture();
        f.engine.fail_next("create index");
        let r = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false).await;
        assert!(matches!(r, Err(Error::Engine { op: "create index", .. })));
        assert!(f.engine.members("acme-orders-current").is_empty());
    }

    #[tokio::test]
    async fn catalog_failure_does_not_block_initialization_or_rollover() {
        let engine = Arc::new(MemoryEngine::new());
        let ctx = EngineContext::new(engine.clone(), Arc::new(BrokenCatalog))
            .with_clock(ManualClock::at(2025, 11, 26));
        let idx = LogicalIndex::initialize(ctx, "acme", model(0, None), false)
            .await
            .unwrap();

        let r = idx.rollover().await.unwrap();
        assert_eq!(r.new_index, "acme-orders-2025-11-0002");
        assert!(!r.catalog_written);
        assert_eq!(engine.members("acme-orders-current"), vec!["acme-orders-2025-11-0002"]);
        assert_eq!(idx.stats().catalog_failures, 2);
    }

    #[tokio::test]
    async fn rollovers_chain_sequences_and_wire_aliases() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false)
            .await
            .unwrap();

        for seq in 2..=4 {
            let r = idx.rollover().await.unwrap();
            assert_eq!(r.new_index, technical_name("acme-orders", 2025, 11, seq));
            assert!(r.catalog_written);
            // current ⊆ search
            let current = f.engine.members("acme-orders-current");
            assert_eq!(current, vec![r.new_index.clone()]);
            assert!(f.engine.members("acme-orders-search").contains(&r.new_index));
        }
        assert_eq!(f.engine.members("acme-orders-search").len(), 4);
        assert_eq!(catalog_names(&f).await.len(), 4);
        assert_eq!(idx.stats().rollovers_ok, 3);
    }

    #[tokio::test]
    async fn month_boundary_restarts_sequence() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false)
            .await
            .unwrap();
        idx.rollover().await.unwrap();
        idx.rollover().await.unwrap();

        f.clock.set(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        let r = idx.rollover().await.unwrap();
        assert_eq!(r.new_index, "acme-orders-2025-12-0001");
    }

    #[tokio::test]
    async fn patch_window_keeps_most_recent_indices() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(2, None), false)
            .await
            .unwrap();

        for _ in 0..3 {
            idx.rollover().await.unwrap();
            assert!(f.engine.members("acme-orders-patch").len() <= 2);
        }
        assert_eq!(
            f.engine.members("acme-orders-patch"),
            vec!["acme-orders-2025-11-0003", "acme-orders-2025-11-0004"]
        );

        // 淘汰与新增同批提交
        let last = f.engine.alias_batches().pop().unwrap();
        assert_eq!(
            last,
            vec![
                AliasAction::remove("acme-orders-2025-11-0002", "acme-orders-patch"),
                AliasAction::add("acme-orders-2025-11-0004", "acme-orders-patch"),
            ]
        );
    }

    #[tokio::test]
    async fn purge_bounds_search_alias_and_catalog() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, Some(3)), false)
            .await
            .unwrap();

        let mut purged = Vec::new();
        for _ in 0..6 {
            let r = idx.rollover().await.unwrap();
            assert!(f.engine.members("acme-orders-search").len() <= 3);
            assert!(catalog_names(&f).await.len() <= 3);
            purged.extend(r.purged);
            f.clock.advance(chrono::Duration::hours(1));
        }
        assert_eq!(
            purged,
            vec![
                "acme-orders-2025-11-0001",
                "acme-orders-2025-11-0002",
                "acme-orders-2025-11-0003",
                "acme-orders-2025-11-0004",
            ]
        );
        assert_eq!(
            f.engine.members("acme-orders-search"),
            vec![
                "acme-orders-2025-11-0005",
                "acme-orders-2025-11-0006",
                "acme-orders-2025-11-0007",
            ]
        );
        assert_eq!(idx.stats().purged, 4);
    }

    #[tokio::test]
    async fn alias_lookup_failure_falls_back_without_collision() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false)
            .await
            .unwrap();
        idx.rollover().await.unwrap();

        f.engine.fail_next("get alias");
        let r = idx.rollover().await.unwrap();
        assert!(r.sequence_fallback);
        // 回退到 0001，探测跳过 0001/0002
        assert_eq!(r.new_index, "acme-orders-2025-11-0003");
        assert_eq!(idx.stats().sequence_fallbacks, 1);
    }

    #[tokio::test]
    async fn failed_rollover_leaves_everything_untouched() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(2, Some(5)), false)
            .await
            .unwrap();

        f.engine.fail_next("rollover");
        assert!(idx.rollover().await.is_err());
        assert_eq!(f.engine.indices(), vec!["acme-orders-2025-11-0001"]);
        assert_eq!(f.engine.members("acme-orders-current"), vec!["acme-orders-2025-11-0001"]);
        assert_eq!(catalog_names(&f).await.len(), 1);

        let s = idx.stats();
        assert_eq!(s.rollovers_failed, 1);
        assert!(s.last_error.is_some());

        // 下一次触发照常
        let r = idx.rollover().await.unwrap();
        assert_eq!(r.new_index, "acme-orders-2025-11-0002");
    }

    #[tokio::test]
    async fn find_indices_uses_wildcard_or_catalog_window() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false)
            .await
            .unwrap();

        let at = Utc.with_ymd_and_hms(2025, 11, 26, 12, 0, 0).unwrap();
        assert_eq!(idx.find_indices(at, 0).await.unwrap(), vec!["acme-orders-*"]);

        for (seq, day) in [(2u32, 20u32), (3, 24), (4, 25)] {
            let entry = CatalogEntry::new(
                "acme-orders",
                &technical_name("acme-orders", 2025, 11, seq),
                Utc.with_ymd_and_hms(2025, 11, day, 12, 0, 0).unwrap(),
            );
            f.catalog.insert(&entry).await.unwrap();
        }

        // 每日调度：depth=2 → 回看 3 天 [11-23 12:00, 11-26 12:00]
        let r = idx.find_indices(at, 2).await.unwrap();
        assert_eq!(
            r,
            vec![
                "acme-orders-2025-11-0003",
                "acme-orders-2025-11-0004",
                "acme-orders-2025-11-0001",
            ]
        );

        let r = idx.find_indices(at, 10).await.unwrap();
        assert_eq!(r.len(), 4);
    }

    #[tokio::test]
    async fn find_indices_window_follows_hourly_cadence() {
        let f = fixture();
        let mut m = model(0, None);
        m.elasticsearch.cron = "0 * * * *".into();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", m, false)
            .await
            .unwrap();

        let at = Utc.with_ymd_and_hms(2025, 11, 26, 12, 0, 0).unwrap();
        // base 在 12:00 登记；再放一条 3 小时前的
        f.catalog
            .insert(&CatalogEntry::new(
                "acme-orders",
                "acme-orders-2025-11-0002",
                at - chrono::Duration::hours(3),
            ))
            .await
            .unwrap();

        // 每小时调度：depth=1 → 回看 2 小时
        assert_eq!(
            idx.find_indices(at, 1).await.unwrap(),
            vec!["acme-orders-2025-11-0001"]
        );
        assert_eq!(idx.find_indices(at, 3).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reconcile_resyncs_catalog_from_search_alias() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(0, None), false)
            .await
            .unwrap();

        // 引擎里有、catalog 里没有
        f.engine
            .seed_index("acme-orders-2025-10-0007", &["acme-orders-search"]);
        // catalog 里有、引擎里没有
        f.catalog
            .insert(&CatalogEntry::new("acme-orders", "acme-orders-2025-09-0001", f.clock.now()))
            .await
            .unwrap();

        let r = idx.reconcile_catalog().await.unwrap();
        assert_eq!(r.inserted, vec!["acme-orders-2025-10-0007"]);
        assert_eq!(r.removed, vec!["acme-orders-2025-09-0001"]);

        let entries = f.catalog.list("acme-orders").await.unwrap();
        let restored = entries
            .iter()
            .find(|e| e.technical_name == "acme-orders-2025-10-0007")
            .unwrap();
        assert_eq!(
            restored.created_at,
            Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap()
        );

        // 再跑一次无变化
        assert_eq!(idx.reconcile_catalog().await.unwrap(), ReconcileReport::default());
    }

    #[tokio::test]
    async fn schedule_fires_and_stops() {
        let engine = Arc::new(MemoryEngine::new());
        let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
        let ctx = EngineContext::new(engine.clone(), catalog)
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let mut m = model(0, None);
        m.elasticsearch.cron = "* * * * * *".into();
        let idx = LogicalIndex::initialize(ctx, "acme", m, false).await.unwrap();

        assert!(idx.start());
        assert!(!idx.start(), "second start must be a no-op");
        assert!(idx.is_running());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while idx.stats().rollovers_ok == 0 {
            if tokio::time::Instant::now() >= deadline {
                panic!("schedule did not fire in time");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        idx.stop_and_wait().await;
        assert!(!idx.is_running());
        let fired = idx.stats().rollovers_ok;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(idx.stats().rollovers_ok, fired);
        assert!(engine.indices().len() >= 2);
    }

    #[tokio::test]
    async fn exhausted_month_sequence_fails_rollover_without_side_effects() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(1, None), false)
            .await
            .unwrap();
        f.engine
            .seed_index("acme-orders-2025-11-9999", &["acme-orders-current"]);
        let before = f.engine.indices();

        let r = idx.rollover().await;
        assert!(matches!(
            r,
            Err(Error::SequenceExhausted { year: 2025, month: 11, .. })
        ));
        assert_eq!(f.engine.indices(), before);
        assert_eq!(catalog_names(&f).await.len(), 1);
        assert_eq!(idx.stats().rollovers_failed, 1);

        // 换月后序号重新可用；current 指向两个索引，由引擎拒绝
        f.clock.set(Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        let r = idx.rollover().await;
        assert!(matches!(r, Err(Error::Engine { op: "rollover", .. })));
    }

    #[tokio::test]
    async fn indices_of_prefix_sharing_logical_index_are_left_alone() {
        let f = fixture();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", model(2, Some(2)), false)
            .await
            .unwrap();
        // "acme-orders-eu" 的索引同样匹配 "acme-orders-*"
        let foreign = "acme-orders-eu-2025-11-0001";
        f.engine
            .seed_index(foreign, &["acme-orders-patch", "acme-orders-search"]);

        let r = idx.rollover().await.unwrap();
        assert!(r.evicted_from_patch.is_empty());
        assert_eq!(r.purged, None);

        let r = idx.rollover().await.unwrap();
        assert_eq!(r.evicted_from_patch, vec!["acme-orders-2025-11-0001"]);
        assert_eq!(r.purged.as_deref(), Some("acme-orders-2025-11-0001"));

        assert!(f.engine.indices().contains(&foreign.to_string()));
        assert!(f.engine.members("acme-orders-patch").contains(&foreign.to_string()));

        let rec = idx.reconcile_catalog().await.unwrap();
        assert!(rec.inserted.is_empty());
        assert!(!catalog_names(&f).await.contains(&foreign.to_string()));
    }

    #[tokio::test]
    async fn stalled_engine_times_out_initialization() {
        let f = fixture();
        let ctx = f
            .ctx
            .clone()
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));
        f.engine.stall_next("create index", Duration::from_secs(10));

        let started = std::time::Instant::now();
        let r = LogicalIndex::initialize(ctx, "acme", model(0, None), false).await;
        assert!(matches!(r, Err(Error::Timeout { op: "initialize", .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(f.engine.indices().is_empty());
        assert!(catalog_names(&f).await.is_empty());
    }

    #[tokio::test]
    async fn stalled_rollover_aborts_cycle_without_catalog_write() {
        let f = fixture();
        let ctx = f
            .ctx
            .clone()
            .with_timeouts(Duration::from_secs(5), Duration::from_millis(100));
        let idx = LogicalIndex::initialize(ctx, "acme", model(1, None), false)
            .await
            .unwrap();

        f.engine.stall_next("rollover", Duration::from_secs(10));
        let r = idx.rollover().await;
        assert!(matches!(r, Err(Error::Timeout { op: "rollover", .. })));
        assert_eq!(f.engine.indices(), vec!["acme-orders-2025-11-0001"]);
        assert_eq!(f.engine.members("acme-orders-current"), vec!["acme-orders-2025-11-0001"]);
        assert_eq!(catalog_names(&f).await, vec!["acme-orders-2025-11-0001"]);
        assert_eq!(idx.stats().rollovers_failed, 1);

        // 下一轮不受影响
        let r = idx.rollover().await.unwrap();
        assert_eq!(r.new_index, "acme-orders-2025-11-0002");
    }

    #[tokio::test]
    async fn schedule_without_upcoming_firing_releases_slot() {
        let f = fixture();
        let mut m = model(0, None);
        // 7 段表达式：年份已过，不会再触发
        m.elasticsearch.cron = "0 0 0 1 1 * 2020".into();
        let idx = LogicalIndex::initialize(f.ctx.clone(), "acme", m, false)
            .await
            .unwrap();

        assert!(idx.start());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while idx.is_running() {
            if tokio::time::Instant::now() >= deadline {
                panic!("schedule slot was not released");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!idx.stats().running);
        assert!(idx.stop().is_none());
        // 可以重新启动
        assert!(idx.start());
        idx.stop_and_wait().await;
    }
}
