//! Bootstrap of the metadata store.

use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use std::borrow::Cow;
use std::path::Path;
use tracing::info;

/// Script creating the table that backs [`crate::db::SqlConnectionStore`].
pub const DEFAULT_MIGRATION: &str = include_str!("../../migrations/registered_database.sql");

/// Load the migration script at `path`, or the embedded default.
pub fn load_script(path: Option<&Path>) -> DbResult<Cow<'static, str>> {
    match path {
        Some(path) => std::fs::read_to_string(path).map(Cow::Owned).map_err(|e| {
            DbError::invalid_input(format!(
                "Failed to read migration '{}': {}",
                path.display(),
                e
            ))
        }),
        None => Ok(Cow::Borrowed(DEFAULT_MIGRATION)),
    }
}

/// Execute a (possibly multi-statement) script against `pool`.
pub async fn run_script(pool: &DbPool, script: &str) -> DbResult<()> {
    match pool {
        DbPool::MySql(p) => {
            sqlx::raw_sql(script).execute(p).await?;
        }
        DbPool::Postgres(p) => {
            sqlx::raw_sql(script).execute(p).await?;
        }
        DbPool::SQLite(p) => {
            sqlx::raw_sql(script).execute(p).await?;
        }
    }
    info!(driver = %pool.driver(), "Metadata migration applied");
    Ok(())
}
