pub mod elastic;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use elastic::{ElasticClient, ElasticConfig};
pub use memory::MemoryEngine;

/// 批量别名变更中的单个动作（按提交顺序执行）
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AliasAction {
    Add { index: String, alias: String },
    Remove { index: String, alias: String },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }
}

/// 搜索引擎客户端契约
///
/// ## 契约
/// - `get_alias` 返回按字典序排序的索引名；别名不存在时返回空集合。
/// - `rollover` 必须原子地创建新索引并把别名切过去；失败时不得留下半完成状态。
/// - `delete_index` 对不存在的索引视为成功。
#[async_trait]
pub trait SearchEngine: Send + Sync {
    async fn template_exists(&self, name: &str) -> Result<bool>;
    async fn put_template(&self, name: &str, patterns: &[String], mapping: &Value) -> Result<()>;
    async fn index_exists(&self, index: &str) -> Result<bool>;
    async fn create_index(&self, index: &str) -> Result<()>;
    async fn alias_exists(&self, alias: &str) -> Result<bool>;
    async fn put_alias(&self, pattern: &str, alias: &str) -> Result<()>;
    async fn rollover(&self, alias: &str, new_index: &str) -> Result<()>;
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()>;
    async fn delete_index(&self, index: &str) -> Result<()>;
    async fn get_alias(&self, alias: &str) -> Result<Vec<String>>;
}
