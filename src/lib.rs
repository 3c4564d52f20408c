#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod index;
pub mod query;
pub mod stats;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use index::{Coordinator, EngineContext, LogicalIndex};
pub use query::StatusServer;
