use std::time::Duration;

/// 协调器统一错误类型
///
/// 分类：
/// - 配置错误（`Config` / `InvalidCron` / `ModeMismatch`）：只影响单个逻辑索引的初始化
/// - 外部依赖错误（`Engine` / `Transport` / `Catalog` / `Timeout`）：记录日志；catalog 在 rollover 中为 best-effort
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid cron expression {expr:?}: {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("rollover mode mismatch for model {model}: expected {expected}, found {found}")]
    ModeMismatch {
        model: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("search engine {op} failed (status {status}): {body}")]
    Engine {
        op: &'static str,
        status: u16,
        body: String,
    },

    #[error("search engine transport error during {op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("catalog task failed: {0}")]
    CatalogTask(String),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{logical}: sequence exhausted for {year:04}-{month:02}")]
    SequenceExhausted {
        logical: String,
        year: i32,
        month: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// 为单次外部调用加上超时上限；超时转为 `Error::Timeout`
pub async fn bounded<T, F>(op: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout { op, after }),
    }
}
