use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::core::Model;
use crate::error::{Error, Result};
use crate::index::context::EngineContext;
use crate::index::logical::{logical_name, LogicalIndex, ReconcileReport};
use crate::stats::CoordinatorReport;

/// 实例级注册表：模型名 → 逻辑索引
///
/// 单个模型初始化失败不影响其他模型；失败原因保留在 `failed_models` 里供状态页展示。
pub struct Coordinator {
    instance: String,
    ctx: EngineContext,
    indices: DashMap<String, Arc<LogicalIndex>>,
    failed: Mutex<Vec<(String, String)>>,
    /// 模型更新串行化：替换注册项与交接调度必须成对完成
    reinit_gate: tokio::sync::Mutex<()>,
}

/// `outer` 的通配 `{outer}-*` 是否会覆盖 `inner` 的技术索引
fn shadows(outer: &str, inner: &str) -> bool {
    inner.len() > outer.len()
        && inner.starts_with(outer)
        && inner.as_bytes()[outer.len()] == b'-'
}

/// 实例名会成为索引名前缀：按 Elasticsearch 索引命名规则校验
pub fn validate_instance_name(instance: &str) -> Result<()> {
    const FORBIDDEN: &[char] = &['\\', '/', '*', '?', '"', '<', '>', '|', ' ', ',', '#', ':'];

    let reason = if instance.is_empty() {
        Some("must not be empty")
    } else if instance != instance.to_lowercase() {
        Some("must be lowercase")
    } else if instance.starts_with(['-', '_', '+', '.']) {
        Some("must not start with '-', '_', '+' or '.'")
    } else if instance.contains(FORBIDDEN) {
        Some("contains a character not allowed in index names")
    } else if instance.len() > 200 {
        Some("is too long")
    } else {
        None
    };
    match reason {
        Some(r) => Err(Error::Config(format!("instance name {:?} {}", instance, r))),
        None => Ok(()),
    }
}

impl Coordinator {
    /// 为每个模型建立逻辑索引（并发初始化）
    ///
    /// 只有实例名非法才整体失败；模型级错误被收集，空模型列表得到空协调器。
    /// 调度不自动启动，调用 `start_all`。
    pub async fn init_instance(ctx: EngineContext, instance: &str, models: &[Model]) -> Result<Self> {
        validate_instance_name(instance)?;
        let coordinator = Self {
            instance: instance.to_string(),
            ctx,
            indices: DashMap::new(),
            failed: Mutex::new(Vec::new()),
            reinit_gate: tokio::sync::Mutex::new(()),
        };

        let mut seen = HashSet::new();
        let mut unique = Vec::new();
        for model in models {
            if seen.insert(model.name.clone()) {
                unique.push(model);
            } else {
                coordinator.record_failure(
                    &format!("{} (duplicate)", model.name),
                    "duplicate model name".to_string(),
                );
            }
        }
        let names: Vec<String> = unique
            .iter()
            .map(|m| logical_name(instance, &m.name))
            .collect();

        let mut set = JoinSet::new();
        for (model, name) in unique.into_iter().zip(&names) {
            if let Some(other) = names.iter().find(|o| shadows(name, o)) {
                coordinator.record_failure(
                    &model.name,
                    format!("logical name {} overlaps {}", name, other),
                );
                continue;
            }
            let (ctx, instance, model) = (coordinator.ctx.clone(), instance.to_string(), model.clone());
            set.spawn(async move {
                let name = model.name.clone();
                (name, LogicalIndex::initialize(ctx, &instance, model, false).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(idx))) => {
                    coordinator.indices.insert(name, idx);
                }
                Ok((name, Err(e))) => coordinator.record_failure(&name, e.to_string()),
                Err(e) => tracing::error!("Initialization task panicked: {}", e),
            }
        }

        tracing::info!(
            "Instance {} ready: {} logical indices, {} failed",
            coordinator.instance,
            coordinator.indices.len(),
            coordinator.failed.lock().len()
        );
        Ok(coordinator)
    }

    fn record_failure(&self, model: &str, err: String) {
        tracing::error!("Model {} excluded from instance {}: {}", model, self.instance, err);
        let mut failed = self.failed.lock();
        failed.retain(|(m, _)| m != model);
        failed.push((model.to_string(), err));
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// 按模型名或逻辑名查找
    pub fn get(&self, name: &str) -> Option<Arc<LogicalIndex>> {
        if let Some(idx) = self.indices.get(name) {
            return Some(idx.value().clone());
        }
        let model = name.strip_prefix(&self.instance)?.strip_prefix('-')?;
        self.indices.get(model).map(|e| e.value().clone())
    }

    /// 全部逻辑索引，按名字排序
    pub fn logical_indices(&self) -> Vec<Arc<LogicalIndex>> {
        let mut v: Vec<_> = self.indices.iter().map(|e| e.value().clone()).collect();
        v.sort_by(|a, b| a.name().cmp(b.name()));
        v
    }

    pub fn failed_models(&self) -> Vec<(String, String)> {
        self.failed.lock().clone()
    }

    /// 启动全部调度；返回本次新启动的个数
    pub fn start_all(&self) -> usize {
        self.logical_indices()
            .iter()
            .filter(|idx| idx.start())
            .count()
    }

    /// 停止全部调度并等待各自的循环退出（进行中的 rollover 会跑完）
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self
            .logical_indices()
            .iter()
            .filter_map(|idx| idx.stop())
            .collect();
        for h in handles {
            if let Err(e) = h.await {
                tracing::warn!("Schedule task ended abnormally: {}", e);
            }
        }
        tracing::info!("All schedules of instance {} stopped", self.instance);
    }

    /// 模型更新：以 `update_template_if_exists = true` 重新初始化并替换注册项
    ///
    /// 新实例初始化失败时旧实例保持原状。
    pub async fn reinitialize(&self, model: &Model) -> Result<Arc<LogicalIndex>> {
        let _gate = self.reinit_gate.lock().await;

        let name = logical_name(&self.instance, &model.name);
        if let Some(other) = self
            .logical_indices()
            .iter()
            .map(|i| i.name().to_string())
            .find(|o| *o != name && (shadows(&name, o) || shadows(o, &name)))
        {
            return Err(Error::Config(format!(
                "logical name {} overlaps {}",
                name, other
            )));
        }

        let fresh =
            LogicalIndex::initialize(self.ctx.clone(), &self.instance, model.clone(), true).await?;

        let previous = self.indices.insert(model.name.clone(), fresh.clone());
        self.failed.lock().retain(|(m, _)| m != &model.name);

        if let Some(old) = previous {
            let was_running = old.is_running();
            old.stop_and_wait().await;
            if was_running {
                fresh.start();
            }
        }
        tracing::info!("Logical index {} reinitialized", name);
        Ok(fresh)
    }

    /// 对每个逻辑索引校正 catalog；单个失败不影响其他
    pub async fn reconcile_all(&self) -> Vec<(String, Result<ReconcileReport>)> {
        let mut out = Vec::new();
        for idx in self.logical_indices() {
            let r = idx.reconcile_catalog().await;
            if let Err(e) = &r {
                tracing::warn!("Catalog reconcile for {} failed: {}", idx.name(), e);
            }
            out.push((idx.name().to_string(), r));
        }
        out
    }

    /// 对指定逻辑索引做历史范围查询
    pub async fn find_indices(&self, name: &str, at: DateTime<Utc>, depth_days: u32) -> Result<Vec<String>> {
        let idx = self
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("logical index {}", name)))?;
        idx.find_indices(at, depth_days).await
    }

    pub fn report(&self) -> CoordinatorReport {
        CoordinatorReport {
            instance: self.instance.clone(),
            indices: self.logical_indices().iter().map(|i| i.stats()).collect(),
            failed_models: self.failed_models(),
        }
    }

    /// 定期状态报告循环
    pub async fn report_loop(self: Arc<Self>, interval_secs: u64) {
        // 首次报告延迟 5 秒
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;

        loop {
            tracing::info!("\n{}", self.report());
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs.max(1))).await;
        }
    }
}
