use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::Model;
use crate::engine::{ElasticClient, ElasticConfig, MemoryEngine, SearchEngine};
use crate::error::{Error, Result};
use crate::index::EngineContext;
use crate::storage::SqliteCatalog;

/// 搜索引擎后端
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineBackend {
    #[default]
    Elastic,
    /// 进程内引擎：dry-run，不连任何集群
    Memory,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: EngineBackend,
    #[serde(flatten)]
    pub elastic: ElasticConfig,
}

/// 进程配置（TOML）
///
/// ```toml
/// instance = "acme"
///
/// [engine]
/// backend = "elastic"
/// url = "https://es.internal:9200"
/// api_key = "..."
///
/// [[models]]
/// name = "orders"
/// fields = [{ name = "customer.id", kind = "keyword" }]
/// [models.elasticsearch]
/// cron = "0 0 * * *"
/// patch_window = 2
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub instance: String,
    #[serde(default)]
    pub engine: EngineConfig,
    /// 缺省：`{data_dir}/logidx/{instance}-catalog.db`
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub init_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub op_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub start_scheduling: bool,
    /// 0 表示不启动状态服务
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default)]
    pub reconcile_after_rollover: bool,
    #[serde(default)]
    pub models: Vec<Model>,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_status_port() -> u16 {
    6060
}

fn default_report_interval() -> u64 {
    300
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {:?}: {}", path, e)))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 进程级检查；模型级错误留到初始化时按模型隔离
    pub fn validate(&self) -> Result<()> {
        if self.init_timeout_secs == 0 || self.op_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least 1 second".into()));
        }
        if self.report_interval_secs == 0 {
            return Err(Error::Config("report_interval_secs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn catalog_path(&self) -> PathBuf {
        if let Some(p) = &self.catalog_path {
            return p.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("logidx")
            .join(format!("{}-catalog.db", self.instance))
    }

    pub fn build_engine(&self) -> Result<Arc<dyn SearchEngine>> {
        Ok(match self.engine.backend {
            EngineBackend::Elastic => Arc::new(ElasticClient::new(self.engine.elastic.clone())?),
            EngineBackend::Memory => Arc::new(MemoryEngine::new()),
        })
    }

    /// 组装引擎 + catalog + 超时，得到协调器的运行上下文
    pub fn build_context(&self) -> Result<EngineContext> {
        let engine = self.build_engine()?;
        let path = self.catalog_path();
        let catalog = Arc::new(SqliteCatalog::open(&path)?);
        tracing::info!("Catalog at {:?}", path);

        let mut ctx = EngineContext::new(engine, catalog).with_timeouts(
            Duration::from_secs(self.init_timeout_secs),
            Duration::from_secs(self.op_timeout_secs),
        );
        ctx.reconcile_after_rollover = self.reconcile_after_rollover;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldKind;

    fn unique_tmp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("logidx-config-{}-{}", tag, nanos))
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = Config::from_toml(r#"instance = "acme""#).unwrap();
        assert_eq!(cfg.engine.backend, EngineBackend::Elastic);
        assert_eq!(cfg.engine.elastic.url, "http://localhost:9200");
        assert_eq!(cfg.init_timeout_secs, 60);
        assert_eq!(cfg.op_timeout_secs, 60);
        assert!(cfg.start_scheduling);
        assert_eq!(cfg.status_port, 6060);
        assert!(!cfg.reconcile_after_rollover);
        assert!(cfg.models.is_empty());
        assert!(cfg
            .catalog_path()
            .ends_with(Path::new("logidx").join("acme-catalog.db")));
    }

    #[test]
    fn full_config_parses_engine_and_models() {
        let cfg = Config::from_toml(
            r#"
            instance = "acme"
            catalog_path = "/var/lib/logidx/catalog.db"
            op_timeout_secs = 15
            status_port = 0

            [engine]
            backend = "memory"
            url = "https://es.internal:9200"
            username = "svc"
            password = "secret"

            [[models]]
            name = "orders"
            fields = [
                { name = "customer.id", kind = "keyword" },
                { name = "amount", kind = "double" },
            ]
            [models.elasticsearch]
            cron = "0 */6 * * *"
            patch_window = 2
            purge_enabled = true
            purge_max_indices = 10

            [[models]]
            name = "audit"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.engine.backend, EngineBackend::Memory);
        assert_eq!(cfg.engine.elastic.username.as_deref(), Some("svc"));
        assert_eq!(cfg.op_timeout_secs, 15);
        assert_eq!(cfg.status_port, 0);
        assert_eq!(cfg.catalog_path(), PathBuf::from("/var/lib/logidx/catalog.db"));

        assert_eq!(cfg.models.len(), 2);
        let orders = &cfg.models[0];
        assert_eq!(orders.fields[1].kind, FieldKind::Double);
        assert_eq!(orders.elasticsearch.cron, "0 */6 * * *");
        assert_eq!(orders.elasticsearch.purge_max_indices, 10);
        assert_eq!(cfg.models[1].elasticsearch.cron, "0 0 * * *");
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(Config::from_toml("instance = 3"), Err(Error::Config(_))));
        assert!(matches!(
            Config::from_toml("instance = \"a\"\nop_timeout_secs = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::load(Path::new("/nonexistent/logidx.toml")),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn memory_backend_context_runs_end_to_end() {
        let dir = unique_tmp_dir("ctx");
        let text = format!(
            "instance = \"acme\"\ncatalog_path = {:?}\n[engine]\nbackend = \"memory\"\n",
            dir.join("catalog.db")
        );
        let cfg = Config::from_toml(&text).unwrap();
        let ctx = cfg.build_context().unwrap();
        assert_eq!(ctx.op_timeout, Duration::from_secs(60));

        let entry = crate::storage::CatalogEntry::new("acme-x", "acme-x-2025-11-0001", ctx.now());
        ctx.catalog.insert(&entry).await.unwrap();
        assert!(dir.join("catalog.db").exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
