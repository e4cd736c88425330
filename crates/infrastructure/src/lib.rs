pub mod amqp_executor;
pub mod database;
pub mod in_memory;
pub mod observability;
pub mod redis_lock;

pub use amqp_executor::{AmqpExecutorFactory, AmqpTaskExecutor};
pub use database::postgres::{
    PostgresDestinationRepository, PostgresOutcomeRepository, PostgresScheduleRepository,
};
pub use in_memory::{
    InMemoryDestinationRepository, InMemoryExecutorFactory, InMemoryLockStore,
    InMemoryOutcomeRepository, InMemoryScheduleRepository, InMemoryTaskExecutor,
};
pub use observability::{MetricsCollector, StructuredLogger};
pub use redis_lock::RedisLockStore;
