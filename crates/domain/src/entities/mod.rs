pub mod cron_schedule;
pub mod destination;
pub mod entry;
pub mod job;
pub mod outcome;

pub use cron_schedule::CronSchedule;
pub use destination::{DestinationCategory, DestinationConfig};
pub use entry::Entry;
pub use job::JobDefinition;
pub use outcome::DispatchOutcome;
