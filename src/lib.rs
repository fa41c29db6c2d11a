//! datapoint library
//!
//! A runtime registry of SQL connections (PostgreSQL, MySQL, SQLite) with
//! catalog introspection and a compiler that turns structured query
//! descriptions into parameterized SQL.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod transport;

pub use config::Config;
pub use db::{Connection, ConnectionRegistry, QueryExecutor, SchemaInspector};
pub use error::{DbError, DbResult};
