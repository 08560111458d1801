//! Persistence layer — content store, key-value namespaces, and the gateway
//! that keeps the metadata index consistent with content.

pub mod gateway;
pub mod index;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use gateway::{DeleteOutcome, PersistenceGateway, SaveOutcome};
pub use libsql_backend::{LibSqlBackend, LibSqlKvStore};
pub use traits::{ContentStore, KeyValueStore};
