//! SQLite persistence layer.

pub mod pool;
pub mod store;

pub use pool::DatabasePool;
pub use store::SqliteStore;
