// Storybench Infrastructure - SQLite Adapter
// Implements: PersistenceGateway

mod connection;
mod gateway;
mod migration;

pub use connection::create_pool;
pub use gateway::{ResponseRow, SqliteGateway};
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by wrapping in helper functions
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
