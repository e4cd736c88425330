pub mod postgres_destination_repository;
pub mod postgres_outcome_repository;
pub mod postgres_schedule_repository;

pub use postgres_destination_repository::PostgresDestinationRepository;
pub use postgres_outcome_repository::PostgresOutcomeRepository;
pub use postgres_schedule_repository::PostgresScheduleRepository;
