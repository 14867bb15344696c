pub mod app_config;
pub mod database;
pub mod executor;
pub mod memory;
pub mod retry;
pub mod schedule_repo;

pub use database::DbClient;
pub use executor::{StatsSnapshot, TxExecutor};
pub use memory::{InMemoryDatabase, InMemoryScheduleLookup};
pub use retry::RetryPolicy;
pub use schedule_repo::PgScheduleLookup;
