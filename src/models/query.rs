//! Query specification and result models.
//!
//! A [`Query`] is plain data: a join tree of [`TableRef`]s, projected and
//! filtered [`ColumnRef`]s, ordering and paging. It carries no SQL text;
//! `crate::query` turns it into a statement for a particular dialect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A dynamically-typed scalar, bound as a parameter or read back from a row.
///
/// JSON strings always deserialize as `Text`; `Timestamp` and `Bytes` are
/// produced by row decoding or constructed directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    /// Binary data (base64 encoded in JSON)
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// A present-but-null JSON value is kept as `Some(SqlValue::Null)`; only a
/// missing field means "no value".
fn explicit_value<'de, D>(deserializer: D) -> Result<Option<SqlValue>, D::Error>
where
    D: Deserializer<'de>,
{
    SqlValue::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one occurrence of a physical table inside a join tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableKey {
    pub name: String,
    /// Zero uses the bare table name as alias; `n` yields `name` + `n`.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub occurrence: u32,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl TableKey {
    pub fn new(name: impl Into<String>, occurrence: u32) -> Self {
        Self {
            name: name.into(),
            occurrence,
        }
    }

    pub fn alias(&self) -> String {
        if self.occurrence == 0 {
            self.name.clone()
        } else {
            format!("{}{}", self.name, self.occurrence)
        }
    }
}

impl From<&str> for TableKey {
    fn from(name: &str) -> Self {
        Self::new(name, 0)
    }
}

impl From<&TableRef> for TableKey {
    fn from(table: &TableRef) -> Self {
        table.key()
    }
}

/// A node of the join tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub occurrence: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
}

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self::aliased(name, 0)
    }

    /// A repeated use of `name`, aliased as `name` + `occurrence`.
    pub fn aliased(name: impl Into<String>, occurrence: u32) -> Self {
        Self {
            name: name.into(),
            occurrence,
            joins: Vec::new(),
        }
    }

    pub fn key(&self) -> TableKey {
        TableKey::new(self.name.clone(), self.occurrence)
    }

    pub fn alias(&self) -> String {
        self.key().alias()
    }

    /// Attach a child table joined by `kind` on the ANDed `conditions`.
    pub fn join(mut self, kind: JoinKind, table: TableRef, conditions: Vec<Condition>) -> Self {
        self.joins.push(Join {
            table,
            rule: JoinRule { kind, conditions },
        });
        self
    }

    /// Number of table references in this subtree, root included.
    pub fn table_count(&self) -> usize {
        1 + self
            .joins
            .iter()
            .map(|j| j.table.table_count())
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub table: TableRef,
    pub rule: JoinRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRule {
    #[serde(default)]
    pub kind: JoinKind,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Inner => "JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub left: ColumnRef,
    #[serde(default)]
    pub operator: Operator,
    pub right: ColumnRef,
}

impl Condition {
    pub fn new(left: ColumnRef, operator: Operator, right: ColumnRef) -> Self {
        Self {
            left,
            operator,
            right,
        }
    }

    pub fn eq(left: ColumnRef, right: ColumnRef) -> Self {
        Self::new(left, Operator::Eq, right)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[default]
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=", alias = "<>")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// A column of some table in the join tree.
///
/// `table` defaults to the root table. `desc` is only read in `orderBy`,
/// `value` only in `where` and in insert/update column lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableKey>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<AggregateFunction>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub desc: bool,
    #[serde(
        default,
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<SqlValue>,
}

impl ColumnRef {
    /// A column of the root table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
            function: None,
            desc: false,
            value: None,
        }
    }

    /// A column of a specific table occurrence.
    pub fn of(table: impl Into<TableKey>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            ..Self::new(name)
        }
    }

    pub fn with_function(mut self, function: AggregateFunction) -> Self {
        self.function = Some(function);
        self
    }

    pub fn descending(mut self) -> Self {
        self.desc = true;
        self
    }

    pub fn with_value(mut self, value: impl Into<SqlValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Alias of the table this column belongs to.
    pub fn table_alias(&self, root: &TableKey) -> String {
        self.table.as_ref().unwrap_or(root).alias()
    }

    /// Output label: `alias.name`, or `function(alias.name)` when aggregated.
    pub fn label(&self, root: &TableKey) -> String {
        let dimension = format!("{}.{}", self.table_alias(root), self.name);
        match self.function {
            Some(function) => format!("{}({})", function.as_str(), dimension),
            None => dimension,
        }
    }
}

/// One query against one registered connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    #[serde(rename = "type")]
    pub query_type: QueryType,
    pub table: TableRef,
    #[serde(default)]
    pub columns: Vec<ColumnRef>,
    #[serde(default)]
    pub order_by: Vec<ColumnRef>,
    #[serde(default, rename = "where")]
    pub filters: Vec<ColumnRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Permit UPDATE/DELETE statements that end up without a WHERE clause.
    #[serde(default)]
    pub allow_unfiltered: bool,
}

impl Query {
    pub fn new(query_type: QueryType, table: TableRef) -> Self {
        Self {
            query_type,
            table,
            columns: Vec::new(),
            order_by: Vec::new(),
            filters: Vec::new(),
            limit: None,
            offset: None,
            allow_unfiltered: false,
        }
    }

    pub fn select(table: TableRef) -> Self {
        Self::new(QueryType::Select, table)
    }

    pub fn insert(table: impl Into<String>) -> Self {
        Self::new(QueryType::Insert, TableRef::new(table))
    }

    pub fn update(table: impl Into<String>) -> Self {
        Self::new(QueryType::Update, TableRef::new(table))
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(QueryType::Delete, TableRef::new(table))
    }

    pub fn with_column(mut self, column: ColumnRef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_order_by(mut self, column: ColumnRef) -> Self {
        self.order_by.push(column);
        self
    }

    pub fn with_filter(mut self, column: ColumnRef) -> Self {
        self.filters.push(column);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn allowing_unfiltered(mut self) -> Self {
        self.allow_unfiltered = true;
        self
    }
}

/// One materialized row, keyed by output label.
pub type Row = BTreeMap<String, SqlValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Output labels in projection order.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn rows(columns: Vec<String>, rows: Vec<Row>, execution_time_ms: u64) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
            execution_time_ms,
        }
    }

    /// Create a result for write operations (INSERT/UPDATE/DELETE).
    pub fn write_result(rows_affected: u64, execution_time_ms: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            rows_affected: Some(rows_affected),
            execution_time_ms,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_untagged() {
        let values: Vec<SqlValue> =
            serde_json::from_str(r#"[null, true, 70, 1.5, "2024-01-01T00:00:00Z"]"#).unwrap();
        assert_eq!(values[0], SqlValue::Null);
        assert_eq!(values[1], SqlValue::Bool(true));
        assert_eq!(values[2], SqlValue::Int(70));
        assert_eq!(values[3], SqlValue::Float(1.5));
        // strings are never reinterpreted
        assert_eq!(values[4], SqlValue::Text("2024-01-01T00:00:00Z".to_string()));
    }

    #[test]
    fn test_bytes_serialize_as_base64() {
        let json = serde_json::to_value(SqlValue::Bytes(b"hello world".to_vec())).unwrap();
        assert_eq!(json, serde_json::json!("aGVsbG8gd29ybGQ="));
    }

    #[test]
    fn test_value_absent_vs_null() {
        let absent: ColumnRef = serde_json::from_str(r#"{"name":"id"}"#).unwrap();
        assert_eq!(absent.value, None);

        let null: ColumnRef = serde_json::from_str(r#"{"name":"id","value":null}"#).unwrap();
        assert_eq!(null.value, Some(SqlValue::Null));

        let text: ColumnRef = serde_json::from_str(r#"{"name":"id","value":"x"}"#).unwrap();
        assert_eq!(text.value, Some(SqlValue::from("x")));
    }

    #[test]
    fn test_aliases_and_labels() {
        let root = TableKey::from("example");
        assert_eq!(root.alias(), "example");
        assert_eq!(TableKey::new("example", 3).alias(), "example3");

        let plain = ColumnRef::new("id");
        assert_eq!(plain.label(&root), "example.id");

        let summed = ColumnRef::of(TableKey::new("example", 3), "age")
            .with_function(AggregateFunction::Avg);
        assert_eq!(summed.label(&root), "avg(example3.age)");
    }

    #[test]
    fn test_query_json_shape() {
        let query: Query = serde_json::from_str(
            r#"{
                "type": "select",
                "table": {
                    "name": "orders",
                    "joins": [{
                        "table": {"name": "customers"},
                        "rule": {
                            "kind": "left",
                            "conditions": [{
                                "left": {"name": "customer_id"},
                                "right": {"table": {"name": "customers"}, "name": "id"}
                            }]
                        }
                    }]
                },
                "columns": [{"name": "id"}, {"name": "total", "function": "sum"}],
                "where": [{"name": "status", "value": "open"}],
                "orderBy": [{"name": "id", "desc": true}],
                "limit": 10
            }"#,
        )
        .unwrap();
        assert_eq!(query.query_type, QueryType::Select);
        assert_eq!(query.table.table_count(), 2);
        assert_eq!(query.table.joins[0].rule.kind, JoinKind::Left);
        assert_eq!(query.table.joins[0].rule.conditions[0].operator, Operator::Eq);
        assert_eq!(query.columns[1].function, Some(AggregateFunction::Sum));
        assert!(query.order_by[0].desc);
        assert_eq!(query.limit, Some(10));
        assert!(!query.allow_unfiltered);
    }

    #[test]
    fn test_unknown_query_type_rejected() {
        let err = serde_json::from_str::<Query>(r#"{"type":"merge","table":{"name":"t"}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_query_result_write() {
        let result = QueryResult::write_result(5, 20);
        assert_eq!(result.rows_affected, Some(5));
        assert_eq!(result.row_count(), 0);
    }
}
