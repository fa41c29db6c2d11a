//! Incremental SQL text plus argument list.
//!
//! The builder is the only place SQL text is assembled. Identifiers go
//! through [`SqlBuilder::push_ident`]; values only ever go through
//! [`SqlBuilder::push_bind`], which appends a placeholder and records the
//! value in the argument list.

use super::dialect::Dialect;
use crate::models::SqlValue;

/// A compiled statement: SQL text and its ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

#[derive(Debug)]
pub struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    args: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            args: Vec::new(),
        }
    }

    /// Append trusted SQL text (keywords, punctuation).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn push_ident(&mut self, ident: &str) -> &mut Self {
        self.dialect.quote_ident_into(ident, &mut self.sql);
        self
    }

    /// `"alias"."column"`
    pub fn push_qualified(&mut self, alias: &str, column: &str) -> &mut Self {
        self.push_ident(alias).push(".").push_ident(column)
    }

    pub fn push_bind(&mut self, value: SqlValue) -> &mut Self {
        self.args.push(value);
        self.dialect.placeholder_into(self.args.len(), &mut self.sql);
        self
    }

    /// Append `items` separated by `separator`, rendering each with `f`.
    pub fn push_separated<T>(
        &mut self,
        items: impl IntoIterator<Item = T>,
        separator: &str,
        mut f: impl FnMut(&mut Self, T),
    ) -> &mut Self {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(separator);
            }
            f(self, item);
        }
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            args: self.args,
        }
    }
}
