//! Query specification compiler.
//!
//! Turns a [`crate::models::Query`] into SQL text plus an argument list for
//! one [`Dialect`]. Identifiers are always quoted; values are always bound.

pub mod builder;
pub mod compiler;
pub mod dialect;

pub use builder::{SqlBuilder, Statement};
pub use compiler::compile;
pub use dialect::Dialect;
