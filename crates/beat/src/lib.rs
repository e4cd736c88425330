pub mod cron_utils;
pub mod job_service;
pub mod lock;
pub mod outcome;
pub mod registry;
pub mod router;
pub mod schedule_sync;
pub mod scheduler;

pub use cron_utils::CronTrigger;
pub use job_service::{JobService, NewJobRequest};
pub use lock::LockCoordinator;
pub use outcome::OutcomeRecorder;
pub use registry::TaskRegistry;
pub use router::DispatchRouter;
pub use schedule_sync::{ChangeCursor, ScheduleSyncService};
pub use scheduler::{BeatScheduler, BeatState, ScheduleEntry};
