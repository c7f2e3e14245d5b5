//! Session store: schema, access contract and SQLite implementation

pub mod connect;
pub mod init;
pub mod sqlite;
pub mod store;

pub use connect::wait_for_store;
pub use init::{init_database, init_memory_database};
pub use sqlite::SqliteSessionStore;
pub use store::SessionStore;
