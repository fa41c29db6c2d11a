//! Schema-related data models.
//!
//! Structures produced by catalog introspection. Column order is the
//! catalog's ordinal order and is preserved everywhere these travel.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    #[serde(rename = "columnList")]
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of the primary-key columns, in ordinal order.
    pub fn primary_key(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Database-specific type (e.g., "integer", "varchar", "TEXT")
    #[serde(rename = "type")]
    pub data_type: String,
    pub is_required: bool,
    #[serde(rename = "isPK")]
    pub is_primary_key: bool,
    #[serde(rename = "fk", skip_serializing_if = "Option::is_none", default)]
    pub foreign_key: Option<ForeignKeyRef>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, is_required: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_required,
            is_primary_key: false,
            foreign_key: None,
        }
    }
}

/// Single-column foreign-key target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKeyRef {
    pub table_name: String,
    pub column_name: String,
}

impl ForeignKeyRef {
    pub fn new(table_name: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            column_name: column_name.into(),
        }
    }
}

/// A stored routine and the types of its input arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    pub name: String,
    #[serde(rename = "typeList")]
    pub argument_types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_json_shape() {
        let mut table = Table::new("books");
        let mut id = Column::new("id", "integer", true);
        id.is_primary_key = true;
        let mut author = Column::new("author_id", "integer", false);
        author.foreign_key = Some(ForeignKeyRef::new("authors", "id"));
        table.columns = vec![id, author];

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["name"], "books");
        assert_eq!(json["columnList"][0]["isPK"], true);
        assert_eq!(json["columnList"][0]["type"], "integer");
        assert!(json["columnList"][0].get("fk").is_none());
        assert_eq!(json["columnList"][1]["fk"]["tableName"], "authors");
        assert_eq!(json["columnList"][1]["fk"]["columnName"], "id");
    }

    #[test]
    fn test_primary_key_and_lookup() {
        let mut table = Table::new("pairs");
        let mut a = Column::new("a", "int", true);
        a.is_primary_key = true;
        let b = Column::new("b", "int", true);
        let mut c = Column::new("c", "int", true);
        c.is_primary_key = true;
        table.columns = vec![a, b, c];
        assert_eq!(table.primary_key(), vec!["a", "c"]);
        assert!(table.column("b").is_some());
        assert!(table.column("z").is_none());
    }
}
