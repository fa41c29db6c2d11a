//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Per-driver connection pools
//! - Registered connections and the registry that owns them
//! - Compiled query execution
//! - Schema introspection
//! - Read-committed units of work
//! - Persistence of connection records and the metadata bootstrap

pub mod connection;
pub mod executor;
pub mod migration;
pub mod params;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod store;
pub mod transaction;
pub mod types;

pub use connection::Connection;
pub use executor::QueryExecutor;
pub use migration::{DEFAULT_MIGRATION, load_script, run_script};
pub use pool::DbPool;
pub use registry::ConnectionRegistry;
pub use schema::SchemaInspector;
pub use store::{CONNECTION_TABLE, ConnectionStore, SqlConnectionStore};
pub use transaction::{DbTransaction, TxCoordinator};
