//! Row decoding into [`SqlValue`]s.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column's type name into a logical category
//! 2. Database-specific decoders extract the value for that category
//!
//! NULL is checked on the raw value before any typed decode. SQLite is
//! dynamically typed, so its rows are classified by each value's storage
//! class rather than by the declared column type.

use crate::models::{Row, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::warn;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_ascii_lowercase();
    let base = lower
        .split(|c: char| c == '(' || c == ' ')
        .next()
        .unwrap_or_default();

    match base {
        "int" | "int2" | "int4" | "int8" | "integer" | "smallint" | "mediumint" | "bigint"
        | "tinyint" | "serial" | "smallserial" | "bigserial" | "year" => TypeCategory::Integer,
        "float" | "float4" | "float8" | "real" | "double" => TypeCategory::Float,
        "numeric" | "decimal" => TypeCategory::Decimal,
        "bool" | "boolean" => TypeCategory::Boolean,
        "timestamp" | "timestamptz" | "datetime" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" | "timetz" => TypeCategory::Time,
        "uuid" => TypeCategory::Uuid,
        "json" | "jsonb" => TypeCategory::Json,
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary"
        | "bit" => TypeCategory::Binary,
        "text" | "tinytext" | "mediumtext" | "longtext" | "varchar" | "char" | "bpchar"
        | "character" | "name" | "citext" | "enum" | "set" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// Trait for converting database rows into labelled values.
pub trait RowToValues {
    fn to_values(&self) -> Vec<(String, SqlValue)>;

    fn to_row(&self) -> Row {
        self.to_values().into_iter().collect()
    }
}

impl RowToValues for PgRow {
    fn to_values(&self) -> Vec<(String, SqlValue)> {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                let value = if is_null(self.try_get_raw(idx).map(|v| v.is_null())) {
                    SqlValue::Null
                } else {
                    let category = categorize_type(col.type_info().name());
                    postgres::decode_column(self, idx, category)
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToValues for MySqlRow {
    fn to_values(&self) -> Vec<(String, SqlValue)> {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                let value = if is_null(self.try_get_raw(idx).map(|v| v.is_null())) {
                    SqlValue::Null
                } else {
                    let category = categorize_type(col.type_info().name());
                    mysql::decode_column(self, idx, category)
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToValues for SqliteRow {
    fn to_values(&self) -> Vec<(String, SqlValue)> {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                let value = match self.try_get_raw(idx) {
                    Ok(raw) if raw.is_null() => SqlValue::Null,
                    Ok(raw) => {
                        let storage = raw.type_info().name().to_string();
                        let declared = categorize_type(col.type_info().name());
                        sqlite::decode_column(self, idx, &storage, declared)
                    }
                    Err(e) => {
                        warn!(column = %col.name(), error = %e, "Failed to read SQLite value");
                        SqlValue::Null
                    }
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

fn is_null(raw: Result<bool, sqlx::Error>) -> bool {
    raw.unwrap_or(true)
}

fn float_value(v: f64) -> SqlValue {
    SqlValue::Float(v)
}

fn decode_failed(category: TypeCategory, idx: usize) -> SqlValue {
    warn!(?category, column = idx, "Failed to decode column value");
    SqlValue::Null
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> SqlValue {
        let value = match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .ok()
                .map(float_value),
            TypeCategory::Decimal => row
                .try_get::<sqlx::types::Decimal, _>(idx)
                .ok()
                .map(|d| SqlValue::Text(d.to_string())),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(SqlValue::Bool),
            TypeCategory::Timestamp => row
                .try_get::<DateTime<Utc>, _>(idx)
                .or_else(|_| row.try_get::<NaiveDateTime, _>(idx).map(|v| v.and_utc()))
                .ok()
                .map(SqlValue::Timestamp),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Uuid => row
                .try_get::<uuid::Uuid, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(SqlValue::Bytes),
            TypeCategory::Text | TypeCategory::Unknown => row
                .try_get::<String, _>(idx)
                .or_else(|_| row.try_get_unchecked::<String, _>(idx))
                .ok()
                .map(SqlValue::Text),
        };
        value.unwrap_or_else(|| decode_failed(category, idx))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<SqlValue> {
        row.try_get::<i64, _>(idx)
            .or_else(|_| row.try_get::<i32, _>(idx).map(i64::from))
            .or_else(|_| row.try_get::<i16, _>(idx).map(i64::from))
            .ok()
            .map(SqlValue::Int)
    }
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> SqlValue {
        let value = match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
                .ok()
                .map(float_value),
            TypeCategory::Decimal => row
                .try_get::<sqlx::types::Decimal, _>(idx)
                .ok()
                .map(|d| SqlValue::Text(d.to_string())),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(SqlValue::Bool),
            TypeCategory::Timestamp => row
                .try_get::<DateTime<Utc>, _>(idx)
                .or_else(|_| row.try_get::<NaiveDateTime, _>(idx).map(|v| v.and_utc()))
                .ok()
                .map(SqlValue::Timestamp),
            TypeCategory::Date => row
                .try_get::<NaiveDate, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Time => row
                .try_get::<NaiveTime, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .ok()
                .map(|v| SqlValue::Text(v.to_string())),
            TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(SqlValue::Bytes),
            TypeCategory::Uuid | TypeCategory::Text | TypeCategory::Unknown => row
                .try_get::<String, _>(idx)
                .or_else(|_| row.try_get_unchecked::<String, _>(idx))
                .ok()
                .map(SqlValue::Text),
        };
        value.unwrap_or_else(|| decode_failed(category, idx))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<SqlValue> {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(SqlValue::Int(v));
        }
        // BIGINT UNSIGNED above i64::MAX has no integer representation here
        match row.try_get::<u64, _>(idx) {
            Ok(v) => Some(
                i64::try_from(v).map_or_else(|_| SqlValue::Text(v.to_string()), SqlValue::Int),
            ),
            Err(_) => None,
        }
    }
}

mod sqlite {
    use super::*;

    /// `storage` is the runtime storage class of the value.
    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        storage: &str,
        declared: TypeCategory,
    ) -> SqlValue {
        let value = match (storage, declared) {
            ("INTEGER", TypeCategory::Boolean) => {
                row.try_get::<bool, _>(idx).ok().map(SqlValue::Bool)
            }
            ("INTEGER", _) => row.try_get::<i64, _>(idx).ok().map(SqlValue::Int),
            ("REAL", _) => row.try_get::<f64, _>(idx).ok().map(float_value),
            ("BLOB", _) => row.try_get::<Vec<u8>, _>(idx).ok().map(SqlValue::Bytes),
            _ => row
                .try_get_unchecked::<String, _>(idx)
                .ok()
                .map(SqlValue::Text),
        };
        value.unwrap_or_else(|| decode_failed(declared, idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED"), TypeCategory::Integer);
        assert_eq!(categorize_type("INT8"), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_not_fooled_by_substrings() {
        assert_eq!(categorize_type("INTERVAL"), TypeCategory::Unknown);
        assert_eq!(categorize_type("POINT"), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_decimal_and_float() {
        assert_eq!(categorize_type("DECIMAL(10,2)"), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
        assert_eq!(categorize_type("double precision"), TypeCategory::Float);
        assert_eq!(categorize_type("FLOAT8"), TypeCategory::Float);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("TIMESTAMPTZ"), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::Timestamp);
        assert_eq!(
            categorize_type("timestamp without time zone"),
            TypeCategory::Timestamp
        );
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
    }

    #[test]
    fn test_categorize_type_misc() {
        assert_eq!(categorize_type("jsonb"), TypeCategory::Json);
        assert_eq!(categorize_type("UUID"), TypeCategory::Uuid);
        assert_eq!(categorize_type("BYTEA"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR(255)"), TypeCategory::Text);
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
    }
}
