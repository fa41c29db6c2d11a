//! Query execution engine.
//!
//! Compiles a [`Query`] for the target connection's dialect, runs it under a
//! deadline and materializes rows keyed by output label.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific fetch and write operations
//! - `postgres`: PostgreSQL-specific fetch and write operations
//! - `sqlite`: SQLite-specific fetch and write operations
//!
//! The MySQL and SQLite submodules are generic over [`sqlx::Executor`], so the
//! same code runs against a pool or against an open transaction. The
//! PostgreSQL one prepares before binding and so works on a single
//! connection: one acquired from the pool, or the transaction's own.

use crate::config::DEFAULT_QUERY_TIMEOUT_SECS;
use crate::db::connection::Connection;
use crate::db::transaction::DbTransaction;
use crate::error::{DbError, DbResult};
use crate::models::{Query, QueryResult, QueryType, TableKey};
use crate::query::compile;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Query executor that handles compiled query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    default_timeout: Duration,
}

impl QueryExecutor {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        }
    }

    /// Create an executor whose deadline defaults to `timeout_secs`.
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            default_timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Compile and run `query` against a registered connection.
    ///
    /// Opens the connection's handle first if it has none, and compiles for
    /// the driver of that handle. Selects return rows; writes return only the
    /// affected row count. Opening counts against the deadline.
    pub async fn run(
        &self,
        connection: &Connection,
        query: &Query,
        deadline: Option<Duration>,
    ) -> DbResult<QueryResult> {
        let deadline = deadline.unwrap_or(self.default_timeout);

        with_deadline(deadline, async {
            let pool = connection.ensure_open().await?;
            let statement = compile(query, pool.dialect())?;

            debug!(
                connection_id = %connection.id(),
                query_type = %query.query_type,
                timeout_secs = deadline.as_secs(),
                "Executing query"
            );

            let start = Instant::now();
            if query.query_type == QueryType::Select {
                let rows = pool.fetch(&statement).await?;
                Ok(QueryResult::rows(
                    output_labels(query),
                    rows,
                    start.elapsed().as_millis() as u64,
                ))
            } else {
                let affected = pool.execute(&statement).await?;
                Ok(QueryResult::write_result(
                    affected,
                    start.elapsed().as_millis() as u64,
                ))
            }
        })
        .await
    }

    /// Compile and run `query` inside an already-open transaction.
    pub async fn run_in(
        &self,
        tx: &mut DbTransaction,
        query: &Query,
        deadline: Option<Duration>,
    ) -> DbResult<QueryResult> {
        let deadline = deadline.unwrap_or(self.default_timeout);
        let statement = compile(query, tx.dialect())?;

        let start = Instant::now();
        if query.query_type == QueryType::Select {
            let rows = with_deadline(deadline, tx.fetch(&statement)).await?;
            Ok(QueryResult::rows(
                output_labels(query),
                rows,
                start.elapsed().as_millis() as u64,
            ))
        } else {
            let affected = with_deadline(deadline, tx.execute(&statement)).await?;
            Ok(QueryResult::write_result(
                affected,
                start.elapsed().as_millis() as u64,
            ))
        }
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Projection labels in projection order.
fn output_labels(query: &Query) -> Vec<String> {
    let root = TableKey::from(&query.table);
    query.columns.iter().map(|c| c.label(&root)).collect()
}

/// Run `work`, abandoning it once `deadline` elapses.
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    work: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    match timeout(deadline, work).await {
        Ok(result) => result,
        Err(_) => Err(DbError::timeout("query execution", deadline.as_secs())),
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.

pub(crate) mod mysql {
    use crate::db::params::bind_mysql;
    use crate::db::types::RowToValues;
    use crate::error::DbResult;
    use crate::models::Row;
    use crate::query::Statement;
    use sqlx::MySql;

    pub async fn fetch<'c, E>(executor: E, statement: &Statement) -> DbResult<Vec<Row>>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let mut query = sqlx::query(&statement.sql);
        for arg in &statement.args {
            query = bind_mysql(query, arg);
        }
        let rows = query.fetch_all(executor).await?;
        Ok(rows.iter().map(RowToValues::to_row).collect())
    }

    pub async fn execute<'c, E>(executor: E, statement: &Statement) -> DbResult<u64>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let mut query = sqlx::query(&statement.sql);
        for arg in &statement.args {
            query = bind_mysql(query, arg);
        }
        Ok(query.execute(executor).await?.rows_affected())
    }
}

pub(crate) mod postgres {
    use crate::db::params::{PgParam, coerce_postgres, unspecified_type};
    use crate::db::types::RowToValues;
    use crate::error::{DbError, DbResult};
    use crate::models::Row;
    use crate::query::Statement;
    use sqlx::postgres::PgConnection;
    use sqlx::{Either, Executor, Statement as _};

    /// Prepare `statement` with unspecified parameter types and coerce each
    /// argument to the type the server inferred for its placeholder.
    ///
    /// The prepared statement is cached on `conn`, so the following execution
    /// reuses it.
    async fn bind_params(conn: &mut PgConnection, statement: &Statement) -> DbResult<Vec<PgParam>> {
        if statement.args.is_empty() {
            return Ok(Vec::new());
        }
        let unspecified = vec![unspecified_type(); statement.args.len()];
        let prepared = (&mut *conn)
            .prepare_with(&statement.sql, &unspecified)
            .await?;
        let Some(Either::Left(types)) = prepared.parameters() else {
            return Err(DbError::internal("prepared statement reported no parameter types"));
        };
        statement
            .args
            .iter()
            .zip(types)
            .map(|(arg, target)| coerce_postgres(arg, target))
            .collect()
    }

    pub async fn fetch(conn: &mut PgConnection, statement: &Statement) -> DbResult<Vec<Row>> {
        let params = bind_params(conn, statement).await?;
        let mut query = sqlx::query(&statement.sql);
        for param in params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&mut *conn).await?;
        Ok(rows.iter().map(RowToValues::to_row).collect())
    }

    pub async fn execute(conn: &mut PgConnection, statement: &Statement) -> DbResult<u64> {
        let params = bind_params(conn, statement).await?;
        let mut query = sqlx::query(&statement.sql);
        for param in params {
            query = query.bind(param);
        }
        Ok(query.execute(&mut *conn).await?.rows_affected())
    }
}

pub(crate) mod sqlite {
    use crate::db::params::bind_sqlite;
    use crate::db::types::RowToValues;
    use crate::error::DbResult;
    use crate::models::Row;
    use crate::query::Statement;
    use sqlx::Sqlite;

    pub async fn fetch<'c, E>(executor: E, statement: &Statement) -> DbResult<Vec<Row>>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let mut query = sqlx::query(&statement.sql);
        for arg in &statement.args {
            query = bind_sqlite(query, arg);
        }
        let rows = query.fetch_all(executor).await?;
        Ok(rows.iter().map(RowToValues::to_row).collect())
    }

    pub async fn execute<'c, E>(executor: E, statement: &Statement) -> DbResult<u64>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let mut query = sqlx::query(&statement.sql);
        for arg in &statement.args {
            query = bind_sqlite(query, arg);
        }
        Ok(query.execute(executor).await?.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::migration::run_script;
    use crate::db::pool::DbPool;
    use crate::models::{AggregateFunction, ColumnRef, ConnectionInfo, DriverKind, SqlValue, TableRef};
    use tempfile::TempDir;

    #[test]
    fn test_executor_defaults() {
        let executor = QueryExecutor::new();
        assert_eq!(
            executor.default_timeout(),
            Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS)
        );
        let executor = QueryExecutor::with_timeout(5);
        assert_eq!(executor.default_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_output_labels_follow_projection() {
        let query = Query::select(TableRef::new("orders"))
            .with_column(ColumnRef::new("id"))
            .with_column(ColumnRef::new("total").with_function(AggregateFunction::Sum));
        assert_eq!(
            output_labels(&query),
            vec!["orders.id".to_string(), "sum(orders.total)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let err = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "Timeout");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_statement_follows_driver_of_live_handle() {
        let dir = TempDir::new().unwrap();
        let info = ConnectionInfo::sqlite("a", dir.path().join("a.db").to_string_lossy());
        let conn = Connection::open("c1", info.clone(), PoolOptions::default())
            .await
            .unwrap();
        run_script(
            &conn.ensure_open().await.unwrap(),
            "CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (1), (2), (3);",
        )
        .await
        .unwrap();

        // recipe names another driver while a SQLite handle is the live one;
        // MySQL's unbounded LIMIT is not a valid SQLite limit
        let mut relabeled = info.clone();
        relabeled.driver = DriverKind::MySQL;
        let handle = DbPool::connect(&info, &PoolOptions::default()).await.unwrap();
        conn.install(relabeled, handle).await;

        let page = Query::select(TableRef::new("t"))
            .with_column(ColumnRef::new("id"))
            .with_order_by(ColumnRef::new("id"))
            .with_offset(1);
        let result = QueryExecutor::new().run(&conn, &page, None).await.unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0]["t.id"], SqlValue::Int(2));
    }
}
