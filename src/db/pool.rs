//! Database handles.
//!
//! [`DbPool`] wraps the database-specific pools (MySqlPool, PgPool,
//! SqlitePool) so each driver keeps full type support. A pool is opened
//! either from a registered [`ConnectionInfo`] or, for the metadata store,
//! from a URL.

use crate::config::PoolOptions;
use crate::db::executor::{mysql, postgres, sqlite};
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionInfo, DriverKind, Row};
use crate::query::{Dialect, Statement};
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Executor, MySqlPool, PgPool, SqlitePool};
use std::str::FromStr;
use tracing::debug;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for a registered connection.
    pub async fn connect(info: &ConnectionInfo, options: &PoolOptions) -> DbResult<Self> {
        debug!(driver = %info.driver, endpoint = %info.endpoint(), "Opening pool");
        let map_err = |e: sqlx::Error| connect_error(info.driver, e);

        match info.driver {
            DriverKind::PostgreSQL => {
                let connect = PgConnectOptions::new()
                    .host(&info.host)
                    .port(info.effective_port())
                    .username(&info.user)
                    .password(&info.password)
                    .database(&info.database_name);
                let pool = pool_options::<sqlx::Postgres>(options, false)
                    .connect_with(connect)
                    .await
                    .map_err(map_err)?;
                Ok(DbPool::Postgres(pool))
            }
            DriverKind::MySQL => {
                let connect = MySqlConnectOptions::new()
                    .host(&info.host)
                    .port(info.effective_port())
                    .username(&info.user)
                    .password(&info.password)
                    .database(&info.database_name)
                    .charset("utf8mb4");
                let pool = pool_options::<sqlx::MySql>(options, false)
                    .connect_with(connect)
                    .await
                    .map_err(map_err)?;
                Ok(DbPool::MySql(pool))
            }
            DriverKind::SQLite => {
                let connect = SqliteConnectOptions::new()
                    .filename(&info.database_name)
                    .create_if_missing(true)
                    .foreign_keys(true);
                let pool = pool_options::<sqlx::Sqlite>(options, true)
                    .connect_with(connect)
                    .await
                    .map_err(map_err)?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Open a pool from a connection URL.
    ///
    /// MySQL sessions are switched to READ COMMITTED on connect, since MySQL
    /// cannot change the level of a transaction after it has started.
    pub async fn connect_url(url: &str, options: &PoolOptions) -> DbResult<Self> {
        let driver = DriverKind::from_connection_string(url).ok_or_else(|| {
            DbError::invalid_input(
                "Unsupported URL scheme. Use postgres://, mysql:// or sqlite:",
            )
        })?;
        let map_err = |e: sqlx::Error| connect_error(driver, e);

        match driver {
            DriverKind::PostgreSQL => {
                let connect = PgConnectOptions::from_str(url).map_err(map_err)?;
                let pool = pool_options::<sqlx::Postgres>(options, false)
                    .connect_with(connect)
                    .await
                    .map_err(map_err)?;
                Ok(DbPool::Postgres(pool))
            }
            DriverKind::MySQL => {
                let connect = MySqlConnectOptions::from_str(url)
                    .map_err(map_err)?
                    .charset("utf8mb4");
                let pool = pool_options::<sqlx::MySql>(options, false)
                    .after_connect(|conn, _meta| {
                        Box::pin(async move {
                            conn.execute("SET SESSION TRANSACTION ISOLATION LEVEL READ COMMITTED")
                                .await?;
                            Ok(())
                        })
                    })
                    .connect_with(connect)
                    .await
                    .map_err(map_err)?;
                Ok(DbPool::MySql(pool))
            }
            DriverKind::SQLite => {
                let connect = SqliteConnectOptions::from_str(url).map_err(map_err)?;
                let pool = pool_options::<sqlx::Sqlite>(options, true)
                    .connect_with(connect)
                    .await
                    .map_err(map_err)?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            DbPool::MySql(pool) => pool.is_closed(),
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::SQLite(pool) => pool.is_closed(),
        }
    }

    pub fn driver(&self) -> DriverKind {
        match self {
            DbPool::MySql(_) => DriverKind::MySQL,
            DbPool::Postgres(_) => DriverKind::PostgreSQL,
            DbPool::SQLite(_) => DriverKind::SQLite,
        }
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::for_driver(self.driver())
    }

    /// Run a compiled read statement and materialize every row.
    pub async fn fetch(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        match self {
            DbPool::MySql(p) => mysql::fetch(p, statement).await,
            DbPool::Postgres(p) => postgres::fetch(&mut *p.acquire().await?, statement).await,
            DbPool::SQLite(p) => sqlite::fetch(p, statement).await,
        }
    }

    /// Run a compiled write statement and return the affected row count.
    pub async fn execute(&self, statement: &Statement) -> DbResult<u64> {
        match self {
            DbPool::MySql(p) => mysql::execute(p, statement).await,
            DbPool::Postgres(p) => postgres::execute(&mut *p.acquire().await?, statement).await,
            DbPool::SQLite(p) => sqlite::execute(p, statement).await,
        }
    }
}

fn pool_options<DB: sqlx::Database>(
    options: &PoolOptions,
    is_sqlite: bool,
) -> sqlx::pool::PoolOptions<DB> {
    sqlx::pool::PoolOptions::<DB>::new()
        .min_connections(options.min_connections_or_default())
        .max_connections(options.max_connections_or_default(is_sqlite))
        .acquire_timeout(options.acquire_timeout_or_default())
        .idle_timeout(Some(options.idle_timeout_or_default()))
        .test_before_acquire(options.test_before_acquire_or_default())
}

fn connect_error(driver: DriverKind, error: sqlx::Error) -> DbError {
    let suggestion = connection_suggestion(driver, &error);
    DbError::connection(format!("Failed to connect: {}", error), suggestion)
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(driver: DriverKind, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", driver);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the database user and password".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match driver {
        DriverKind::PostgreSQL => {
            "Verify host, port (default 5432), user and database name".to_string()
        }
        DriverKind::MySQL => "Verify host, port (default 3306), user and database name".to_string(),
        DriverKind::SQLite => {
            "Verify the database file path exists and its directory is writable".to_string()
        }
    }
}
