pub mod model;
pub mod naming;
pub mod schedule;

pub use model::*;
pub use naming::{next_technical_name, parse_technical_name, wildcard};
pub use schedule::CronSchedule;
