//! Persistence of registered connections.
//!
//! [`ConnectionStore`] is what the registry writes through. Every write
//! accepts the caller's active transaction so it can take part in a larger
//! unit of work; without one it runs in its own.

use crate::db::pool::DbPool;
use crate::db::transaction::{DbTransaction, TxCoordinator};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnRef, ConnectionInfo, DriverKind, Query, Row, SqlValue, TableRef};
use crate::query::{Dialect, compile};
use async_trait::async_trait;
use tracing::debug;

/// Table holding one row per registered connection.
pub const CONNECTION_TABLE: &str = "registered_database";

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Coordinator for units of work spanning several store calls.
    fn coordinator(&self) -> &TxCoordinator;

    async fn list_connections(&self) -> DbResult<Vec<(String, ConnectionInfo)>>;

    async fn insert_connection(
        &self,
        tx: Option<&mut DbTransaction>,
        id: &str,
        info: &ConnectionInfo,
    ) -> DbResult<()>;

    /// Fails with `NotFound` when no row carries `id`.
    async fn update_connection(
        &self,
        tx: Option<&mut DbTransaction>,
        id: &str,
        info: &ConnectionInfo,
    ) -> DbResult<()>;

    /// Deleting an unknown id succeeds.
    async fn delete_connection(&self, tx: Option<&mut DbTransaction>, id: &str) -> DbResult<()>;
}

/// [`ConnectionStore`] over the metadata database.
#[derive(Debug, Clone)]
pub struct SqlConnectionStore {
    coordinator: TxCoordinator,
    dialect: Dialect,
}

impl SqlConnectionStore {
    pub fn new(pool: DbPool) -> Self {
        let dialect = pool.dialect();
        Self {
            coordinator: TxCoordinator::new(pool),
            dialect,
        }
    }

    async fn write(
        &self,
        tx: Option<&mut DbTransaction>,
        id: &str,
        query: Query,
    ) -> DbResult<u64> {
        let statement = compile(&query, self.dialect)?;
        self.coordinator
            .read_committed(tx, move |tx| {
                Box::pin(async move { tx.execute(&statement).await })
            })
            .await
            .map_err(|e| e.into_persist(id))
    }
}

fn field_columns(info: &ConnectionInfo) -> [ColumnRef; 7] {
    [
        ColumnRef::new("name").with_value(info.name.as_str()),
        ColumnRef::new("host").with_value(info.host.as_str()),
        ColumnRef::new("port").with_value(i64::from(info.port)),
        ColumnRef::new("db_user").with_value(info.user.as_str()),
        ColumnRef::new("password").with_value(info.password.as_str()),
        ColumnRef::new("db_name").with_value(info.database_name.as_str()),
        ColumnRef::new("driver").with_value(info.driver.as_str()),
    ]
}

fn id_filter(id: &str) -> ColumnRef {
    ColumnRef::new("id").with_value(id)
}

fn list_query() -> Query {
    let mut query = Query::select(TableRef::new(CONNECTION_TABLE))
        .with_order_by(ColumnRef::new("name"))
        .with_order_by(ColumnRef::new("id"));
    for column in [
        "id", "name", "host", "port", "db_user", "password", "db_name", "driver",
    ] {
        query = query.with_column(ColumnRef::new(column));
    }
    query
}

fn text(row: &Row, column: &str) -> String {
    match row.get(&format!("{}.{}", CONNECTION_TABLE, column)) {
        Some(SqlValue::Int(n)) => n.to_string(),
        Some(value) => value.as_str().unwrap_or_default().to_string(),
        None => String::new(),
    }
}

fn decode_row(row: &Row) -> DbResult<(String, ConnectionInfo)> {
    let id = text(row, "id");
    let driver_name = text(row, "driver");
    let driver = DriverKind::from_name(&driver_name)
        .ok_or_else(|| DbError::persist(format!("Unknown driver '{}'", driver_name), &id))?;
    let port = match row.get(&format!("{}.port", CONNECTION_TABLE)) {
        None | Some(SqlValue::Null) => 0,
        Some(value) => value
            .as_i64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| DbError::persist(format!("Invalid port {:?}", value), &id))?,
    };

    let info = ConnectionInfo {
        name: text(row, "name"),
        driver,
        host: text(row, "host"),
        port,
        user: text(row, "db_user"),
        password: text(row, "password"),
        database_name: text(row, "db_name"),
    };
    Ok((id, info))
}

#[async_trait]
impl ConnectionStore for SqlConnectionStore {
    fn coordinator(&self) -> &TxCoordinator {
        &self.coordinator
    }

    async fn list_connections(&self) -> DbResult<Vec<(String, ConnectionInfo)>> {
        let statement = compile(&list_query(), self.dialect)?;
        let rows = self
            .coordinator
            .pool()
            .fetch(&statement)
            .await
            .map_err(|e| e.into_persist("*"))?;
        debug!(count = rows.len(), "Loaded registered connections");
        rows.iter().map(decode_row).collect()
    }

    async fn insert_connection(
        &self,
        tx: Option<&mut DbTransaction>,
        id: &str,
        info: &ConnectionInfo,
    ) -> DbResult<()> {
        let mut query = Query::insert(CONNECTION_TABLE).with_column(id_filter(id));
        for column in field_columns(info) {
            query = query.with_column(column);
        }
        self.write(tx, id, query).await?;
        Ok(())
    }

    async fn update_connection(
        &self,
        tx: Option<&mut DbTransaction>,
        id: &str,
        info: &ConnectionInfo,
    ) -> DbResult<()> {
        let mut query = Query::update(CONNECTION_TABLE).with_filter(id_filter(id));
        for column in field_columns(info) {
            query = query.with_column(column);
        }
        match self.write(tx, id, query).await? {
            0 => Err(DbError::connection_not_found(id)),
            _ => Ok(()),
        }
    }

    async fn delete_connection(&self, tx: Option<&mut DbTransaction>, id: &str) -> DbResult<()> {
        let query = Query::delete(CONNECTION_TABLE).with_filter(id_filter(id));
        self.write(tx, id, query).await?;
        Ok(())
    }
}
