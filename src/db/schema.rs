//! Schema introspection module.
//!
//! Reconstructs tables, columns and single-column foreign keys of a
//! connection's default schema from one catalog query per call.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! database type. Every catalog query returns one row per (column, constraint)
//! pair, ordered by table then ordinal position, which lets [`TableFolder`]
//! build the result in a single pass over the stream.

use crate::db::connection::Connection;
use crate::db::executor::with_deadline;
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{Column, ForeignKeyRef, Function, Table};
use futures_util::TryStreamExt;
use std::time::Duration;
use tracing::debug;

/// Schema inspector for database introspection.
pub struct SchemaInspector;

impl SchemaInspector {
    /// Tables of the connection's default schema, optionally narrowed to one.
    ///
    /// A filter that matches nothing fails with `NotFound`.
    pub async fn introspect(
        connection: &Connection,
        table: Option<&str>,
        deadline: Option<Duration>,
    ) -> DbResult<Vec<Table>> {
        let id = connection.id();
        let work = async {
            let pool = connection.ensure_open().await?;
            match &pool {
                DbPool::Postgres(p) => postgres::tables(p, table).await,
                DbPool::MySql(p) => mysql::tables(p, table).await,
                DbPool::SQLite(p) => sqlite::tables(p, table).await,
            }
        };
        let tables = bounded(deadline, work)
            .await
            .map_err(|e| e.into_introspection(id))?;

        if let Some(name) = table {
            if tables.is_empty() {
                return Err(DbError::not_found("Table", name));
            }
        }
        debug!(connection_id = %id, table = ?table, count = tables.len(), "Introspected tables");
        Ok(tables)
    }

    /// Stored routines of the default schema with their input argument types.
    ///
    /// SQLite has no stored routines; the list is always empty.
    pub async fn list_functions(
        connection: &Connection,
        deadline: Option<Duration>,
    ) -> DbResult<Vec<Function>> {
        let id = connection.id();
        let work = async {
            let pool = connection.ensure_open().await?;
            match &pool {
                DbPool::Postgres(p) => postgres::functions(p).await,
                DbPool::MySql(p) => mysql::functions(p).await,
                DbPool::SQLite(_) => Ok(Vec::new()),
            }
        };
        let functions = bounded(deadline, work)
            .await
            .map_err(|e| e.into_introspection(id))?;
        debug!(connection_id = %id, count = functions.len(), "Listed functions");
        Ok(functions)
    }
}

async fn bounded<T>(
    deadline: Option<Duration>,
    work: impl std::future::Future<Output = DbResult<T>>,
) -> DbResult<T> {
    match deadline {
        Some(deadline) => with_deadline(deadline, work).await,
        None => work.await,
    }
}

// =============================================================================
// Single-pass folding
// =============================================================================

/// One catalog row: a column, possibly paired with one of its constraints.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CatalogRow {
    pub table: String,
    pub column: String,
    pub data_type: String,
    pub is_required: bool,
    pub is_primary_key: bool,
    pub foreign_key: Option<ForeignKeyRef>,
}

/// Folds catalog rows sorted by (table, ordinal) into tables.
///
/// A change of table name starts a table, a change of column name starts a
/// column, and any other row only adds its constraint to the current column.
#[derive(Debug, Default)]
pub(crate) struct TableFolder {
    tables: Vec<Table>,
}

impl TableFolder {
    pub fn push(&mut self, row: CatalogRow) {
        let starts_table = self.tables.last().is_none_or(|t| t.name != row.table);
        if starts_table {
            self.tables.push(Table::new(row.table.clone()));
        }
        let Some(table) = self.tables.last_mut() else {
            return;
        };

        let starts_column = table.columns.last().is_none_or(|c| c.name != row.column);
        if starts_column {
            table
                .columns
                .push(Column::new(row.column, row.data_type, row.is_required));
        }
        let Some(column) = table.columns.last_mut() else {
            return;
        };

        column.is_primary_key |= row.is_primary_key;
        if column.foreign_key.is_none() {
            column.foreign_key = row.foreign_key;
        }
    }

    pub fn finish(self) -> Vec<Table> {
        self.tables
    }
}

/// Folds (routine, overload, argument type) rows sorted by routine.
#[derive(Debug, Default)]
pub(crate) struct FunctionFolder {
    functions: Vec<Function>,
    current: Option<String>,
}

impl FunctionFolder {
    pub fn push(&mut self, name: String, specific_name: String, argument: Option<String>) {
        if self.current.as_deref() != Some(specific_name.as_str()) {
            self.functions.push(Function {
                name,
                argument_types: Vec::new(),
            });
            self.current = Some(specific_name);
        }
        if let (Some(function), Some(argument)) = (self.functions.last_mut(), argument) {
            function.argument_types.push(argument);
        }
    }

    pub fn finish(self) -> Vec<Function> {
        self.functions
    }
}

fn foreign_key(table: Option<String>, column: Option<String>) -> Option<ForeignKeyRef> {
    match (table, column) {
        (Some(table), Some(column)) => Some(ForeignKeyRef::new(table, column)),
        _ => None,
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const TABLES: &str = r#"
            SELECT
                c.table_name::text AS table_name,
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                (c.is_nullable = 'NO') AS is_required,
                COALESCE(tc.constraint_type = 'PRIMARY KEY', FALSE) AS is_primary_key,
                CASE WHEN tc.constraint_type = 'FOREIGN KEY' THEN ccu.table_name::text END AS fk_table,
                CASE WHEN tc.constraint_type = 'FOREIGN KEY' THEN ccu.column_name::text END AS fk_column
            FROM information_schema.columns c
            JOIN information_schema.tables t
                ON t.table_schema = c.table_schema
                AND t.table_name = c.table_name
                AND t.table_type = 'BASE TABLE'
            LEFT JOIN information_schema.key_column_usage kcu
                ON kcu.table_schema = c.table_schema
                AND kcu.table_name = c.table_name
                AND kcu.column_name = c.column_name
            LEFT JOIN information_schema.table_constraints tc
                ON tc.constraint_schema = kcu.constraint_schema
                AND tc.constraint_name = kcu.constraint_name
                AND tc.constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY')
            LEFT JOIN information_schema.referential_constraints rc
                ON rc.constraint_schema = tc.constraint_schema
                AND rc.constraint_name = tc.constraint_name
            LEFT JOIN information_schema.key_column_usage ccu
                ON ccu.constraint_schema = rc.unique_constraint_schema
                AND ccu.constraint_name = rc.unique_constraint_name
                AND ccu.ordinal_position = kcu.position_in_unique_constraint
            WHERE c.table_schema = current_schema()
            AND ($1::text IS NULL OR c.table_name::text = $1)
            ORDER BY c.table_name, c.ordinal_position, tc.constraint_type
            "#;

        pub const FUNCTIONS: &str = r#"
            SELECT
                r.routine_name::text AS routine_name,
                r.specific_name::text AS specific_name,
                p.data_type::text AS argument_type
            FROM information_schema.routines r
            LEFT JOIN information_schema.parameters p
                ON p.specific_schema = r.specific_schema
                AND p.specific_name = r.specific_name
                AND p.parameter_mode IN ('IN', 'INOUT')
            WHERE r.routine_schema = current_schema()
            ORDER BY r.routine_name, r.specific_name, p.ordinal_position
            "#;
    }

    pub mod mysql {
        pub const TABLES: &str = r#"
            SELECT
                CONVERT(c.TABLE_NAME USING utf8mb4) AS table_name,
                CONVERT(c.COLUMN_NAME USING utf8mb4) AS column_name,
                CONVERT(c.COLUMN_TYPE USING utf8mb4) AS data_type,
                CAST(c.IS_NULLABLE = 'NO' AS SIGNED) AS is_required,
                CAST(COALESCE(tc.CONSTRAINT_TYPE = 'PRIMARY KEY', 0) AS SIGNED) AS is_primary_key,
                CASE WHEN tc.CONSTRAINT_TYPE = 'FOREIGN KEY'
                    THEN CONVERT(kcu.REFERENCED_TABLE_NAME USING utf8mb4) END AS fk_table,
                CASE WHEN tc.CONSTRAINT_TYPE = 'FOREIGN KEY'
                    THEN CONVERT(kcu.REFERENCED_COLUMN_NAME USING utf8mb4) END AS fk_column
            FROM information_schema.COLUMNS c
            JOIN information_schema.TABLES t
                ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND t.TABLE_NAME = c.TABLE_NAME
                AND t.TABLE_TYPE = 'BASE TABLE'
            LEFT JOIN information_schema.KEY_COLUMN_USAGE kcu
                ON kcu.TABLE_SCHEMA = c.TABLE_SCHEMA
                AND kcu.TABLE_NAME = c.TABLE_NAME
                AND kcu.COLUMN_NAME = c.COLUMN_NAME
            LEFT JOIN information_schema.TABLE_CONSTRAINTS tc
                ON tc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
                AND tc.TABLE_NAME = kcu.TABLE_NAME
                AND tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND tc.CONSTRAINT_TYPE IN ('PRIMARY KEY', 'FOREIGN KEY')
            WHERE c.TABLE_SCHEMA = DATABASE()
            AND (? IS NULL OR c.TABLE_NAME = ?)
            ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION, tc.CONSTRAINT_TYPE
            "#;

        pub const FUNCTIONS: &str = r#"
            SELECT
                CONVERT(r.ROUTINE_NAME USING utf8mb4) AS routine_name,
                CONVERT(r.SPECIFIC_NAME USING utf8mb4) AS specific_name,
                CONVERT(p.DATA_TYPE USING utf8mb4) AS argument_type
            FROM information_schema.ROUTINES r
            LEFT JOIN information_schema.PARAMETERS p
                ON p.SPECIFIC_SCHEMA = r.ROUTINE_SCHEMA
                AND p.SPECIFIC_NAME = r.SPECIFIC_NAME
                AND p.PARAMETER_MODE IN ('IN', 'INOUT')
            WHERE r.ROUTINE_SCHEMA = DATABASE()
            ORDER BY r.ROUTINE_NAME, r.SPECIFIC_NAME, p.ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const TABLES: &str = r#"
            SELECT
                m.name AS table_name,
                p.name AS column_name,
                p.type AS data_type,
                (p."notnull" <> 0 OR p.pk > 0) AS is_required,
                (p.pk > 0) AS is_primary_key,
                f."table" AS fk_table,
                COALESCE(
                    f."to",
                    (SELECT t.name FROM pragma_table_info(f."table") t WHERE t.pk = 1)
                ) AS fk_column
            FROM sqlite_master m
            JOIN pragma_table_info(m.name) p
            LEFT JOIN pragma_foreign_key_list(m.name) f ON f."from" = p.name
            WHERE m.type = 'table'
            AND m.name NOT LIKE 'sqlite\_%' ESCAPE '\'
            AND (?1 IS NULL OR m.name = ?1)
            ORDER BY m.name, p.cid
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::postgres::PgRow;
    use sqlx::{PgPool, Row};

    fn catalog_row(row: &PgRow) -> Result<CatalogRow, sqlx::Error> {
        Ok(CatalogRow {
            table: row.try_get("table_name")?,
            column: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            is_required: row.try_get("is_required")?,
            is_primary_key: row.try_get("is_primary_key")?,
            foreign_key: foreign_key(row.try_get("fk_table")?, row.try_get("fk_column")?),
        })
    }

    pub async fn tables(pool: &PgPool, table: Option<&str>) -> DbResult<Vec<Table>> {
        let mut rows = sqlx::query(queries::postgres::TABLES)
            .bind(table)
            .fetch(pool);
        let mut folder = TableFolder::default();
        while let Some(row) = rows.try_next().await? {
            folder.push(catalog_row(&row)?);
        }
        Ok(folder.finish())
    }

    pub async fn functions(pool: &PgPool) -> DbResult<Vec<Function>> {
        let mut rows = sqlx::query(queries::postgres::FUNCTIONS).fetch(pool);
        let mut folder = FunctionFolder::default();
        while let Some(row) = rows.try_next().await? {
            folder.push(
                row.try_get("routine_name")?,
                row.try_get("specific_name")?,
                row.try_get("argument_type")?,
            );
        }
        Ok(folder.finish())
    }
}

mod mysql {
    use super::*;
    use sqlx::mysql::MySqlRow;
    use sqlx::{MySqlPool, Row};

    fn catalog_row(row: &MySqlRow) -> Result<CatalogRow, sqlx::Error> {
        Ok(CatalogRow {
            table: row.try_get("table_name")?,
            column: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            is_required: row.try_get::<i64, _>("is_required")? != 0,
            is_primary_key: row.try_get::<i64, _>("is_primary_key")? != 0,
            foreign_key: foreign_key(row.try_get("fk_table")?, row.try_get("fk_column")?),
        })
    }

    pub async fn tables(pool: &MySqlPool, table: Option<&str>) -> DbResult<Vec<Table>> {
        let mut rows = sqlx::query(queries::mysql::TABLES)
            .bind(table)
            .bind(table)
            .fetch(pool);
        let mut folder = TableFolder::default();
        while let Some(row) = rows.try_next().await? {
            folder.push(catalog_row(&row)?);
        }
        Ok(folder.finish())
    }

    pub async fn functions(pool: &MySqlPool) -> DbResult<Vec<Function>> {
        let mut rows = sqlx::query(queries::mysql::FUNCTIONS).fetch(pool);
        let mut folder = FunctionFolder::default();
        while let Some(row) = rows.try_next().await? {
            folder.push(
                row.try_get("routine_name")?,
                row.try_get("specific_name")?,
                row.try_get("argument_type")?,
            );
        }
        Ok(folder.finish())
    }
}

mod sqlite {
    use super::*;
    use sqlx::sqlite::SqliteRow;
    use sqlx::{Row, SqlitePool};

    fn catalog_row(row: &SqliteRow) -> Result<CatalogRow, sqlx::Error> {
        Ok(CatalogRow {
            table: row.try_get("table_name")?,
            column: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            is_required: row.try_get::<i64, _>("is_required")? != 0,
            is_primary_key: row.try_get::<i64, _>("is_primary_key")? != 0,
            foreign_key: foreign_key(row.try_get("fk_table")?, row.try_get("fk_column")?),
        })
    }

    pub async fn tables(pool: &SqlitePool, table: Option<&str>) -> DbResult<Vec<Table>> {
        let mut rows = sqlx::query(queries::sqlite::TABLES)
            .bind(table)
            .fetch(pool);
        let mut folder = TableFolder::default();
        while let Some(row) = rows.try_next().await? {
            folder.push(catalog_row(&row)?);
        }
        Ok(folder.finish())
    }
}
