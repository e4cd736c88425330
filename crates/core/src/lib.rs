pub mod config;
pub mod errors;

pub use config::{
    AppConfig, BeatConfig, DatabaseConfig, ExecutorConfig, LockStoreConfig, ObservabilityConfig,
};
pub use errors::{SchedulerError, SchedulerResult};
