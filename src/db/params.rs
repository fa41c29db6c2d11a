//! Parameter binding utilities.
//!
//! Binds [`SqlValue`] arguments of a compiled statement to database-specific
//! query objects, in placeholder order. PostgreSQL arguments are first
//! coerced to the parameter types the server inferred for the statement.

use crate::error::{DbError, DbResult};
use crate::models::SqlValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::encode::{Encode, IsNull};
use sqlx::error::BoxDynError;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgTypeInfo};
use sqlx::sqlite::SqliteArguments;
use sqlx::types::{Decimal, Uuid};
use sqlx::{MySql, Postgres, Sqlite, Type, TypeInfo};
use std::str::FromStr;

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// A PostgreSQL argument coerced to the parameter type the server inferred.
///
/// Every statement parameter is prepared with an unspecified type (OID 0), so
/// the server decides each placeholder's type from its context. The value is
/// then encoded in that type's binary format and reported under it.
#[derive(Debug, Clone)]
pub(crate) struct PgParam {
    value: PgValue,
    type_info: PgTypeInfo,
}

#[derive(Debug, Clone, PartialEq)]
enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    Timestamptz(DateTime<Utc>),
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    /// UTF-8 text sent as is: text, varchar, char, citext, enums.
    Text(String),
}

/// The parameter type every placeholder is prepared with.
pub(crate) fn unspecified_type() -> PgTypeInfo {
    PgTypeInfo::with_oid(Oid(0))
}

impl Type<Postgres> for PgParam {
    fn type_info() -> PgTypeInfo {
        unspecified_type()
    }
}

impl Encode<'_, Postgres> for PgParam {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        match &self.value {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => <bool as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int2(v) => <i16 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int4(v) => <i32 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Int8(v) => <i64 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Float4(v) => <f32 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Float8(v) => <f64 as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Numeric(v) => <Decimal as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Uuid(v) => <Uuid as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Date(v) => <NaiveDate as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Time(v) => <NaiveTime as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Timestamp(v) => <NaiveDateTime as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Timestamptz(v) => <DateTime<Utc> as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Json(v) => <serde_json::Value as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Bytes(v) => <Vec<u8> as Encode<Postgres>>::encode_by_ref(v, buf),
            PgValue::Text(v) => {
                buf.extend_from_slice(v.as_bytes());
                Ok(IsNull::No)
            }
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(self.type_info.clone())
    }
}

/// Coerce `value` to the PostgreSQL parameter type `target`.
///
/// Text is parsed into the target type, so string literals reach uuid, date,
/// numeric and json columns the way they would in hand-written SQL. Targets
/// without a native mapping receive the value's text form.
pub(crate) fn coerce_postgres(value: &SqlValue, target: &PgTypeInfo) -> DbResult<PgParam> {
    let type_name = target.name().to_ascii_uppercase();
    let value = match value {
        SqlValue::Null => PgValue::Null,
        SqlValue::Text(v) => parse_text(v, &type_name)?,
        SqlValue::Bool(v) => match type_name.as_str() {
            "BOOL" => PgValue::Bool(*v),
            "INT2" | "INT4" | "INT8" => integer(i64::from(*v), &type_name)?,
            _ => parse_text(&v.to_string(), &type_name)?,
        },
        SqlValue::Int(v) => match type_name.as_str() {
            "BOOL" => PgValue::Bool(*v != 0),
            "INT2" | "INT4" | "INT8" => integer(*v, &type_name)?,
            "FLOAT4" => PgValue::Float4(*v as f32),
            "FLOAT8" => PgValue::Float8(*v as f64),
            "NUMERIC" => PgValue::Numeric(Decimal::from(*v)),
            _ => parse_text(&v.to_string(), &type_name)?,
        },
        SqlValue::Float(v) => match type_name.as_str() {
            "FLOAT4" => PgValue::Float4(*v as f32),
            "FLOAT8" => PgValue::Float8(*v),
            "INT2" | "INT4" | "INT8" if v.fract() == 0.0 => integer(*v as i64, &type_name)?,
            "NUMERIC" => PgValue::Numeric(
                Decimal::try_from(*v).map_err(|_| out_of_range(&v.to_string(), &type_name))?,
            ),
            _ => parse_text(&v.to_string(), &type_name)?,
        },
        SqlValue::Timestamp(v) => match type_name.as_str() {
            "TIMESTAMP" => PgValue::Timestamp(v.naive_utc()),
            "DATE" => PgValue::Date(v.date_naive()),
            "TIME" => PgValue::Time(v.time()),
            "TIMESTAMPTZ" => PgValue::Timestamptz(*v),
            _ => parse_text(&v.to_rfc3339(), &type_name)?,
        },
        SqlValue::Bytes(v) => match (type_name.as_str(), std::str::from_utf8(v)) {
            ("BYTEA", _) | (_, Err(_)) => PgValue::Bytes(v.clone()),
            (_, Ok(text)) => parse_text(text, &type_name)?,
        },
    };
    Ok(PgParam {
        value,
        type_info: target.clone(),
    })
}

fn integer(v: i64, type_name: &str) -> DbResult<PgValue> {
    let overflow = |_| out_of_range(&v.to_string(), type_name);
    Ok(match type_name {
        "INT2" => PgValue::Int2(i16::try_from(v).map_err(overflow)?),
        "INT4" => PgValue::Int4(i32::try_from(v).map_err(overflow)?),
        _ => PgValue::Int8(v),
    })
}

fn parse_text(text: &str, type_name: &str) -> DbResult<PgValue> {
    let trimmed = text.trim();
    let parsed = match type_name {
        "BOOL" => match trimmed.to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" | "on" | "1" => Some(PgValue::Bool(true)),
            "f" | "false" | "n" | "no" | "off" | "0" => Some(PgValue::Bool(false)),
            _ => None,
        },
        "INT2" | "INT4" | "INT8" => match trimmed.parse::<i64>() {
            Ok(v) => Some(integer(v, type_name)?),
            Err(_) => None,
        },
        "FLOAT4" => trimmed.parse().ok().map(PgValue::Float4),
        "FLOAT8" => trimmed.parse().ok().map(PgValue::Float8),
        "NUMERIC" => Decimal::from_str(trimmed)
            .or_else(|_| Decimal::from_scientific(trimmed))
            .ok()
            .map(PgValue::Numeric),
        "UUID" => Uuid::parse_str(trimmed).ok().map(PgValue::Uuid),
        "DATE" => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .map(PgValue::Date),
        "TIME" => ["%H:%M:%S%.f", "%H:%M"]
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
            .map(PgValue::Time),
        "TIMESTAMP" => parse_naive_timestamp(trimmed).map(PgValue::Timestamp),
        "TIMESTAMPTZ" => parse_timestamptz(trimmed).map(PgValue::Timestamptz),
        "JSON" | "JSONB" => Some(PgValue::Json(
            serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::from(text)),
        )),
        "BYTEA" => Some(PgValue::Bytes(text.as_bytes().to_vec())),
        _ => Some(PgValue::Text(text.to_string())),
    };
    parsed.ok_or_else(|| {
        DbError::execution(
            format!(
                "invalid input syntax for type {}: \"{}\"",
                type_name.to_ascii_lowercase(),
                text
            ),
            Some("22P02".to_string()),
            "Pass the value in the column type's literal format",
        )
    })
}

fn parse_naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .map(|v| v.with_timezone(&Utc))
        .ok()
        .or_else(|| parse_naive_timestamp(text).map(|v| v.and_utc()))
}

fn out_of_range(text: &str, type_name: &str) -> DbError {
    DbError::execution(
        format!(
            "value {} is out of range for type {}",
            text,
            type_name.to_ascii_lowercase()
        ),
        Some("22003".to_string()),
        "Pass a value the column type can hold",
    )
}

/// Bind a value to a SQLite query.
pub(crate) fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q SqlValue,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coerce(value: impl Into<SqlValue>, type_name: &'static str) -> DbResult<PgValue> {
        coerce_postgres(&value.into(), &PgTypeInfo::with_name(type_name)).map(|p| p.value)
    }

    #[test]
    fn test_text_parses_into_inferred_type() {
        let id = "7d9f8e2a-0c4b-4e55-9a1d-3f2b6c8e1a90";
        assert_eq!(
            coerce(id, "UUID").unwrap(),
            PgValue::Uuid(Uuid::parse_str(id).unwrap())
        );
        assert_eq!(
            coerce("2024-02-29", "DATE").unwrap(),
            PgValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(coerce("12.50", "NUMERIC").unwrap(), PgValue::Numeric(Decimal::new(1250, 2)));
        assert_eq!(coerce("42", "INT4").unwrap(), PgValue::Int4(42));
        assert_eq!(coerce("yes", "BOOL").unwrap(), PgValue::Bool(true));
        assert_eq!(
            coerce(r#"{"a":1}"#, "JSONB").unwrap(),
            PgValue::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            coerce("2024-01-02 03:04:05", "TIMESTAMP").unwrap(),
            PgValue::Timestamp(
                NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_opt(3, 4, 5)
                    .unwrap()
            )
        );
        assert_eq!(
            coerce("2024-01-02T03:04:05+02:00", "TIMESTAMPTZ").unwrap(),
            PgValue::Timestamptz(
                NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_opt(1, 4, 5)
                    .unwrap()
                    .and_utc()
            )
        );
    }

    #[test]
    fn test_text_like_and_custom_types_stay_text() {
        assert_eq!(coerce("open", "TEXT").unwrap(), PgValue::Text("open".into()));
        assert_eq!(coerce("open", "VARCHAR").unwrap(), PgValue::Text("open".into()));
        // enum types report their own name
        assert_eq!(coerce("happy", "mood").unwrap(), PgValue::Text("happy".into()));
    }

    #[test]
    fn test_unparseable_text_is_execution_failure() {
        let err = coerce("not-a-uuid", "UUID").unwrap_err();
        assert_eq!(err.kind(), "ExecutionFailed");
        assert!(err.to_string().contains("uuid"), "{}", err);

        let err = coerce("2024-13-40", "DATE").unwrap_err();
        assert_eq!(err.kind(), "ExecutionFailed");
    }

    #[test]
    fn test_numbers_narrow_to_column_width() {
        assert_eq!(coerce(7i64, "INT2").unwrap(), PgValue::Int2(7));
        assert_eq!(coerce(7i64, "FLOAT8").unwrap(), PgValue::Float8(7.0));
        assert_eq!(coerce(3.0f64, "INT4").unwrap(), PgValue::Int4(3));
        assert_eq!(coerce(7i64, "TEXT").unwrap(), PgValue::Text("7".into()));

        let err = coerce(70_000i64, "INT2").unwrap_err();
        assert_eq!(err.kind(), "ExecutionFailed");
        assert!(coerce(1.5f64, "INT8").is_err());
    }

    #[test]
    fn test_null_keeps_inferred_type() {
        let param = coerce_postgres(&SqlValue::Null, &PgTypeInfo::with_name("UUID")).unwrap();
        assert_eq!(param.value, PgValue::Null);
        let produced = param.produces().unwrap();
        assert_eq!(produced.name(), "UUID");
    }
}
