//! Data models for datapoint.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{ConnectionInfo, ConnectionSummary, DriverKind};
pub use query::{
    AggregateFunction, ColumnRef, Condition, Join, JoinKind, JoinRule, Operator, Query,
    QueryResult, QueryType, Row, SqlValue, TableKey, TableRef,
};
pub use schema::{Column, ForeignKeyRef, Function, Table};
