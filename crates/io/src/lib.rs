// File I/O: raw rows in and out, plus durable staging of canonical batches

pub mod csv;
pub mod error;
pub mod json;
pub mod sqlite;

pub use error::IoError;
pub use sqlite::SqliteRecordStore;

/// Record store schema version, kept in `PRAGMA user_version`.
/// Increment when the schema changes in a way old versions can't read.
pub const STORE_SCHEMA_VERSION: i32 = 1;
