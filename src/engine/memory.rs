use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use wildmatch::WildMatch;

use crate::engine::{AliasAction, SearchEngine};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct MemoryState {
    /// 模板名 → (index_patterns, mappings)
    templates: BTreeMap<String, (Vec<String>, Value)>,
    /// 索引名 → 别名集合
    indices: BTreeMap<String, BTreeSet<String>>,
    /// 已提交的批量别名变更（按顺序）
    alias_batches: Vec<Vec<AliasAction>>,
    /// 下一次调用时注入失败的操作
    fail_next: HashSet<&'static str>,
    /// 下一次调用前先挂起的操作
    stall_next: HashMap<&'static str, Duration>,
}

impl MemoryState {
    fn take_failure(&mut self, op: &'static str) -> Result<()> {
        if self.fail_next.remove(op) {
            return Err(Error::Engine {
                op,
                status: 503,
                body: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn resolve(&self, pattern: &str) -> Vec<String> {
        if !pattern.contains('*') && !pattern.contains('?') {
            return self
                .indices
                .contains_key(pattern)
                .then(|| vec![pattern.to_string()])
                .unwrap_or_default();
        }
        let m = WildMatch::new(pattern);
        self.indices
            .keys()
            .filter(|name| m.matches(name))
            .cloned()
            .collect()
    }

    fn members(&self, alias: &str) -> Vec<String> {
        self.indices
            .iter()
            .filter(|(_, aliases)| aliases.contains(alias))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn missing(op: &'static str, what: &str) -> Error {
    Error::Engine {
        op,
        status: 404,
        body: format!("no such index or alias [{}]", what),
    }
}

/// 进程内搜索引擎：用于 dry-run 部署与测试
///
/// 语义对齐 Elasticsearch：通配只匹配索引名；rollover 要求别名恰好指向一个索引。
#[derive(Debug, Default)]
pub struct MemoryEngine {
    state: Mutex<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让 `op` 的下一次调用返回 503
    pub fn fail_next(&self, op: &'static str) {
        self.state.lock().fail_next.insert(op);
    }

    /// 让 `op` 的下一次调用先挂起 `d`（模拟无响应的集群）
    pub fn stall_next(&self, op: &'static str, d: Duration) {
        self.state.lock().stall_next.insert(op, d);
    }

    async fn stall(&self, op: &'static str) {
        let d = self.state.lock().stall_next.remove(op);
        if let Some(d) = d {
            tokio::time::sleep(d).await;
        }
    }

    pub fn indices(&self) -> Vec<String> {
        self.state.lock().indices.keys().cloned().collect()
    }

    pub fn members(&self, alias: &str) -> Vec<String> {
        self.state.lock().members(alias)
    }

    pub fn template(&self, name: &str) -> Option<(Vec<String>, Value)> {
        self.state.lock().templates.get(name).cloned()
    }

    pub fn alias_batches(&self) -> Vec<Vec<AliasAction>> {
        self.state.lock().alias_batches.clone()
    }

    /// 直接放入一个索引（模拟外部创建 / 旧数据）
    pub fn seed_index(&self, index: &str, aliases: &[&str]) {
        let mut st = self.state.lock();
        let entry = st.indices.entry(index.to_string()).or_default();
        for a in aliases {
            entry.insert(a.to_string());
        }
    }
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn template_exists(&self, name: &str) -> Result<bool> {
        self.stall("template exists").await;
        let mut st = self.state.lock();
        st.take_failure("template exists")?;
        Ok(st.templates.contains_key(name))
    }

    async fn put_template(&self, name: &str, patterns: &[String], mapping: &Value) -> Result<()> {
        self.stall("put template").await;
        let mut st = self.state.lock();
        st.take_failure("put template")?;
        st.templates
            .insert(name.to_string(), (patterns.to_vec(), mapping.clone()));
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.stall("index exists").await;
        let mut st = self.state.lock();
        st.take_failure("index exists")?;
        Ok(st.indices.contains_key(index))
    }

    async fn create_index(&self, index: &str) -> Result<()> {
        self.stall("create index").await;
        let mut st = self.state.lock();
        st.take_failure("create index")?;
        if st.indices.contains_key(index) {
            return Err(Error::Engine {
                op: "create index",
                status: 400,
                body: format!("resource_already_exists_exception [{}]", index),
            });
        }
        st.indices.insert(index.to_string(), BTreeSet::new());
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        self.stall("alias exists").await;
        let mut st = self.state.lock();
        st.take_failure("alias exists")?;
        Ok(st.indices.values().any(|a| a.contains(alias)))
    }

    async fn put_alias(&self, pattern: &str, alias: &str) -> Result<()> {
        self.stall("put alias").await;
        let mut st = self.state.lock();
        st.take_failure("put alias")?;
        let targets = st.resolve(pattern);
        if targets.is_empty() && !pattern.contains('*') {
            return Err(missing("put alias", pattern));
        }
        for t in targets {
            if let Some(a) = st.indices.get_mut(&t) {
                a.insert(alias.to_string());
            }
        }
        Ok(())
    }

    async fn rollover(&self, alias: &str, new_index: &str) -> Result<()> {
        self.stall("rollover").await;
        let mut st = self.state.lock();
        st.take_failure("rollover")?;
        let members = st.members(alias);
        let [old] = members.as_slice() else {
            return Err(Error::Engine {
                op: "rollover",
                status: 400,
                body: format!(
                    "alias [{}] must point to exactly one index, found {}",
                    alias,
                    members.len()
                ),
            });
        };
        if st.indices.contains_key(new_index) {
            return Err(Error::Engine {
                op: "rollover",
                status: 400,
                body: format!("resource_already_exists_exception [{}]", new_index),
            });
        }
        let old = old.clone();
        if let Some(a) = st.indices.get_mut(&old) {
            a.remove(alias);
        }
        st.indices
            .insert(new_index.to_string(), BTreeSet::from([alias.to_string()]));
        Ok(())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        self.stall("update aliases").await;
        let mut st = self.state.lock();
        st.take_failure("update aliases")?;
        // 先整体校验，保证批量原子
        for a in actions {
            let (AliasAction::Add { index, .. } | AliasAction::Remove { index, .. }) = a;
            if !st.indices.contains_key(index) {
                return Err(missing("update aliases", index));
            }
        }
        for a in actions {
            match a {
                AliasAction::Add { index, alias } => {
                    if let Some(s) = st.indices.get_mut(index) {
                        s.insert(alias.clone());
                    }
                }
                AliasAction::Remove { index, alias } => {
                    if let Some(s) = st.indices.get_mut(index) {
                        s.remove(alias);
                    }
                }
            }
        }
        st.alias_batches.push(actions.to_vec());
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.stall("delete index").await;
        let mut st = self.state.lock();
        st.take_failure("delete index")?;
        st.indices.remove(index);
        Ok(())
    }

    async fn get_alias(&self, alias: &str) -> Result<Vec<String>> {
        self.stall("get alias").await;
        let mut st = self.state.lock();
        st.take_failure("get alias")?;
        Ok(st.members(alias))
    }
}
