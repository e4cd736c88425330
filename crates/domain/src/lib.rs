pub mod entities;
pub mod ports;
pub mod repositories;

pub use cronbeat_core::{SchedulerError, SchedulerResult};
pub use entities::*;
pub use ports::*;
pub use repositories::*;
