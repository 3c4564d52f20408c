use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::engine::SearchEngine;
use crate::storage::CatalogStore;

/// 时间来源（测试中可替换为固定时钟）
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 协调器共享的外部依赖与超时设置
///
/// 显式构造并逐层传递，不走全局单例。
#[derive(Clone)]
pub struct EngineContext {
    pub engine: Arc<dyn SearchEngine>,
    pub catalog: Arc<dyn CatalogStore>,
    pub clock: Arc<dyn Clock>,
    /// 单个逻辑索引初始化的硬截止时间
    pub init_timeout: Duration,
    /// rollover 中每次外部调用的超时
    pub op_timeout: Duration,
    /// 每次 rollover 后以 search 别名为准校正 catalog
    pub reconcile_after_rollover: bool,
}

impl EngineContext {
    pub fn new(engine: Arc<dyn SearchEngine>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            engine,
            catalog,
            clock: Arc::new(SystemClock),
            init_timeout: Duration::from_secs(60),
            op_timeout: Duration::from_secs(60),
            reconcile_after_rollover: false,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_timeouts(mut self, init_timeout: Duration, op_timeout: Duration) -> Self {
        self.init_timeout = init_timeout;
        self.op_timeout = op_timeout;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
