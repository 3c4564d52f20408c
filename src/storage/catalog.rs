use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{Error, Result};

/// 技术索引目录条目：(逻辑名, 技术名, 创建时间)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub logical_name: String,
    pub technical_name: String,
    pub created_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn new(logical: &str, technical: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            logical_name: logical.to_string(),
            technical_name: technical.to_string(),
            created_at,
        }
    }
}

/// 技术索引目录（关系型存储）
///
/// ## 契约
/// - `insert` 幂等：同一 (logical, technical) 重复插入不报错、不覆盖创建时间。
/// - `find_range` 闭区间 `[from, to]`，按创建时间升序。
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert(&self, entry: &CatalogEntry) -> Result<()>;
    async fn delete(&self, logical: &str, technical: &str) -> Result<()>;
    async fn find_range(
        &self,
        logical: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>>;
    async fn list(&self, logical: &str) -> Result<Vec<CatalogEntry>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS technical_indices (
    logical_name   TEXT    NOT NULL,
    technical_name TEXT    NOT NULL,
    created_at_ms  INTEGER NOT NULL,
    PRIMARY KEY (logical_name, technical_name)
);
CREATE INDEX IF NOT EXISTS technical_indices_created
    ON technical_indices (logical_name, created_at_ms);
";

/// SQLite 实现；阻塞调用统一放到 `spawn_blocking`
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("cannot create catalog dir {:?}: {}", parent, e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let r = tokio::task::spawn_blocking(move || {
            let c = conn.lock();
            f(&c)
        })
        .await
        .map_err(|e| Error::CatalogTask(e.to_string()))?;
        Ok(r?)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn insert(&self, entry: &CatalogEntry) -> Result<()> {
        let e = entry.clone();
        self.with_conn(move |c| {
            c.prepare_cached(
                "INSERT OR IGNORE INTO technical_indices
                    (logical_name, technical_name, created_at_ms) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![
                e.logical_name,
                e.technical_name,
                e.created_at.timestamp_millis()
            ])?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, logical: &str, technical: &str) -> Result<()> {
        let (l, t) = (logical.to_string(), technical.to_string());
        self.with_conn(move |c| {
            c.prepare_cached(
                "DELETE FROM technical_indices WHERE logical_name = ?1 AND technical_name = ?2",
            )?
            .execute(params![l, t])?;
            Ok(())
        })
        .await
    }

    async fn find_range(
        &self,
        logical: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let l = logical.to_string();
        let (from_ms, to_ms) = (from.timestamp_millis(), to.timestamp_millis());
        self.with_conn(move |c| {
            let mut stmt = c.prepare_cached(
                "SELECT technical_name FROM technical_indices
                 WHERE logical_name = ?1 AND created_at_ms BETWEEN ?2 AND ?3
                 ORDER BY created_at_ms, technical_name",
            )?;
            let rows = stmt.query_map(params![l, from_ms, to_ms], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    async fn list(&self, logical: &str) -> Result<Vec<CatalogEntry>> {
        let l = logical.to_string();
        self.with_conn(move |c| {
            let mut stmt = c.prepare_cached(
                "SELECT logical_name, technical_name, created_at_ms FROM technical_indices
                 WHERE logical_name = ?1
                 ORDER BY created_at_ms, technical_name",
            )?;
            let rows = stmt.query_map(params![l], |row| {
                Ok(CatalogEntry {
                    logical_name: row.get(0)?,
                    technical_name: row.get(1)?,
                    created_at: millis_to_utc(row.get(2)?),
                })
            })?;
            rows.collect()
        })
        .await
    }
}
