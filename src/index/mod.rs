pub mod context;
pub mod coordinator;
pub mod logical;

pub use context::{Clock, EngineContext, SystemClock};
pub use coordinator::{validate_instance_name, Coordinator};
pub use logical::{AliasNames, LogicalIndex, ReconcileReport, RolloverReport};
