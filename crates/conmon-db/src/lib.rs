pub mod config;
pub mod dao;
pub mod database;
pub mod repository;

pub use config::DatabaseConfig;
pub use dao::Dao;
pub use database::Database;
pub use repository::{RecordRepository, SourceRepository};
