pub mod database;
pub mod repositories;
pub mod run_lock;

pub use database::Database;
pub use run_lock::SqliteRunLock;
