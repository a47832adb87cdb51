pub mod config;
pub mod database;
pub mod work_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use work_repository::WorkItemRepository;
