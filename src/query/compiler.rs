//! Compile a [`Query`] into a parameterized [`Statement`].
//!
//! Each query type is compiled independently from the same model. Select
//! walks the join tree breadth-first: children are appended to the work
//! list after the siblings already on it, so every level is emitted before
//! the next.

use super::builder::{SqlBuilder, Statement};
use super::dialect::Dialect;
use crate::error::{DbError, DbResult};
use crate::models::{ColumnRef, Join, Query, QueryType, SqlValue, TableKey, TableRef};
use std::collections::HashSet;
use tracing::debug;

/// Compile `query` for `dialect`.
pub fn compile(query: &Query, dialect: Dialect) -> DbResult<Statement> {
    let statement = match query.query_type {
        QueryType::Select => compile_select(query, dialect)?,
        QueryType::Insert => compile_insert(query, dialect)?,
        QueryType::Update => compile_update(query, dialect)?,
        QueryType::Delete => compile_delete(query, dialect)?,
    };
    debug!(
        query_type = %query.query_type,
        table = %query.table.name,
        args = statement.args.len(),
        "Compiled query"
    );
    Ok(statement)
}

/// An equality (or IS NULL) filter on one column.
struct Predicate<'a> {
    alias: Option<String>,
    column: &'a str,
    value: &'a SqlValue,
}

/// Join tree flattened in emission order, plus every alias it defines.
struct JoinPlan<'a> {
    joins: Vec<&'a Join>,
    aliases: HashSet<String>,
}

impl<'a> JoinPlan<'a> {
    fn build(root: &'a TableRef) -> DbResult<Self> {
        let mut aliases = HashSet::new();
        aliases.insert(root.alias());

        let mut joins = Vec::new();
        let mut work: Vec<&TableRef> = vec![root];
        let mut next = 0;
        while let Some(table) = work.get(next).copied() {
            next += 1;
            for join in &table.joins {
                let alias = join.table.alias();
                if !aliases.insert(alias.clone()) {
                    return Err(DbError::compile(format!(
                        "table alias '{}' appears more than once in the join tree",
                        alias
                    )));
                }
                joins.push(join);
                work.push(&join.table);
            }
        }
        Ok(Self { joins, aliases })
    }

    fn resolve(&self, column: &ColumnRef, root: &TableKey) -> DbResult<String> {
        let alias = column.table_alias(root);
        if self.aliases.contains(&alias) {
            Ok(alias)
        } else {
            Err(DbError::compile(format!(
                "column '{}' references table alias '{}' which is not in the join tree",
                column.name, alias
            )))
        }
    }
}

fn compile_select(query: &Query, dialect: Dialect) -> DbResult<Statement> {
    if query.columns.is_empty() {
        return Err(DbError::compile("select requires at least one column"));
    }
    let root = query.table.key();
    let plan = JoinPlan::build(&query.table)?;

    let mut b = SqlBuilder::new(dialect);
    b.push("SELECT ");

    let mut group_keys: Vec<(String, &str)> = Vec::new();
    let mut aggregated = false;
    for (i, column) in query.columns.iter().enumerate() {
        let alias = plan.resolve(column, &root)?;
        if i > 0 {
            b.push(", ");
        }
        push_expression(&mut b, &alias, column);
        let label = column.label(&root);
        if let Some(max) = dialect.max_identifier_len() {
            if label.len() > max {
                return Err(DbError::compile(format!(
                    "output label '{}' is longer than {} bytes",
                    label, max
                )));
            }
        }
        b.push(" ").push_ident(&label);
        match column.function {
            Some(_) => aggregated = true,
            None => group_keys.push((alias, column.name.as_str())),
        }
    }

    b.push(" FROM ")
        .push_ident(&query.table.name)
        .push(" ")
        .push_ident(&root.alias());

    for join in &plan.joins {
        if join.rule.conditions.is_empty() {
            return Err(DbError::compile(format!(
                "join of '{}' has no conditions",
                join.table.alias()
            )));
        }
        let mut conditions = Vec::with_capacity(join.rule.conditions.len());
        for condition in &join.rule.conditions {
            if condition.left.function.is_some() || condition.right.function.is_some() {
                return Err(DbError::compile(
                    "aggregate functions are not allowed in join conditions",
                ));
            }
            conditions.push((
                plan.resolve(&condition.left, &root)?,
                condition.left.name.as_str(),
                condition.operator.as_sql(),
                plan.resolve(&condition.right, &root)?,
                condition.right.name.as_str(),
            ));
        }

        b.push(" ")
            .push(join.rule.kind.keyword())
            .push(" ")
            .push_ident(&join.table.name)
            .push(" ")
            .push_ident(&join.table.alias())
            .push(" ON ");
        b.push_separated(conditions, " AND ", |b, (la, lc, op, ra, rc)| {
            b.push_qualified(&la, lc)
                .push(" ")
                .push(op)
                .push(" ")
                .push_qualified(&ra, rc);
        });
    }

    let mut predicates = Vec::new();
    for filter in &query.filters {
        let alias = plan.resolve(filter, &root)?;
        if let Some(predicate) = predicate(filter, Some(alias))? {
            predicates.push(predicate);
        }
    }
    push_where(&mut b, predicates);

    if aggregated && !group_keys.is_empty() {
        b.push(" GROUP BY ");
        b.push_separated(group_keys, ", ", |b, (alias, name)| {
            b.push_qualified(&alias, name);
        });
    }

    if !query.order_by.is_empty() {
        let mut keys = Vec::with_capacity(query.order_by.len());
        for column in &query.order_by {
            keys.push((plan.resolve(column, &root)?, column));
        }
        b.push(" ORDER BY ");
        b.push_separated(keys, ", ", |b, (alias, column)| {
            push_expression(b, &alias, column);
            if column.desc {
                b.push(" DESC");
            }
        });
    }

    push_paging(&mut b, query.limit, query.offset);
    Ok(b.finish())
}

fn compile_insert(query: &Query, dialect: Dialect) -> DbResult<Statement> {
    check_single_table(query)?;
    if query.columns.is_empty() {
        return Err(DbError::compile("insert requires at least one column"));
    }
    if !query.filters.is_empty() {
        return Err(DbError::compile("insert does not take a where list"));
    }

    let mut b = SqlBuilder::new(dialect);
    b.push("INSERT INTO ").push_ident(&query.table.name).push(" (");
    b.push_separated(&query.columns, ",", |b, column| {
        b.push_ident(&column.name);
    });
    b.push(") VALUES (");
    b.push_separated(&query.columns, ",", |b, column| {
        b.push_bind(bound_value(column));
    });
    b.push(")");
    Ok(b.finish())
}

fn compile_update(query: &Query, dialect: Dialect) -> DbResult<Statement> {
    check_single_table(query)?;
    if query.columns.is_empty() {
        return Err(DbError::compile("update requires at least one column to set"));
    }
    let predicates = write_predicates(query)?;

    let mut b = SqlBuilder::new(dialect);
    b.push("UPDATE ").push_ident(&query.table.name).push(" SET ");
    b.push_separated(&query.columns, ", ", |b, column| {
        b.push_ident(&column.name)
            .push(" = ")
            .push_bind(bound_value(column));
    });
    push_where(&mut b, predicates);
    Ok(b.finish())
}

fn compile_delete(query: &Query, dialect: Dialect) -> DbResult<Statement> {
    check_single_table(query)?;
    if !query.columns.is_empty() {
        return Err(DbError::compile("delete does not take a column list"));
    }
    let predicates = write_predicates(query)?;

    let mut b = SqlBuilder::new(dialect);
    b.push("DELETE FROM ").push_ident(&query.table.name);
    push_where(&mut b, predicates);
    Ok(b.finish())
}

/// Insert/update/delete address exactly one table, without paging.
fn check_single_table(query: &Query) -> DbResult<()> {
    let verb = query.query_type.as_str();
    if !query.table.joins.is_empty() {
        return Err(DbError::compile(format!(
            "{} addresses a single table; joins are only valid for SELECT",
            verb
        )));
    }
    if !query.order_by.is_empty() || query.limit.is_some() || query.offset.is_some() {
        return Err(DbError::compile(format!(
            "{} does not support ordering or paging",
            verb
        )));
    }

    let root = query.table.key();
    let root_alias = root.alias();
    for column in query.columns.iter().chain(&query.filters) {
        if column.function.is_some() {
            return Err(DbError::compile(format!(
                "aggregate functions are not valid in {}",
                verb
            )));
        }
        if column.table_alias(&root) != root_alias {
            return Err(DbError::compile(format!(
                "column '{}' must belong to table '{}'",
                column.name, query.table.name
            )));
        }
    }
    Ok(())
}

/// Filters of an UPDATE/DELETE, refusing to touch every row unless asked to.
fn write_predicates(query: &Query) -> DbResult<Vec<Predicate<'_>>> {
    let mut predicates = Vec::new();
    for filter in &query.filters {
        if let Some(predicate) = predicate(filter, None)? {
            predicates.push(predicate);
        }
    }
    if predicates.is_empty() && !query.allow_unfiltered {
        let reason = match query.query_type {
            QueryType::Update => "This will update all rows in the table",
            _ => "This will delete all rows from the table",
        };
        return Err(DbError::dangerous_operation_blocked(
            format!("{} without WHERE", query.query_type),
            reason,
        ));
    }
    Ok(predicates)
}

/// A filter without a value contributes nothing.
fn predicate(filter: &ColumnRef, alias: Option<String>) -> DbResult<Option<Predicate<'_>>> {
    if filter.function.is_some() {
        return Err(DbError::compile(format!(
            "aggregate functions are not allowed in filters (column '{}')",
            filter.name
        )));
    }
    Ok(filter.value.as_ref().map(|value| Predicate {
        alias,
        column: filter.name.as_str(),
        value,
    }))
}

fn bound_value(column: &ColumnRef) -> SqlValue {
    column.value.clone().unwrap_or(SqlValue::Null)
}

fn push_expression(b: &mut SqlBuilder, alias: &str, column: &ColumnRef) {
    match column.function {
        Some(function) => {
            b.push(function.as_str())
                .push("(")
                .push_qualified(alias, &column.name)
                .push(")");
        }
        None => {
            b.push_qualified(alias, &column.name);
        }
    }
}

fn push_where(b: &mut SqlBuilder, predicates: Vec<Predicate<'_>>) {
    if predicates.is_empty() {
        return;
    }
    b.push(" WHERE ");
    b.push_separated(predicates, " AND ", |b, p| {
        match &p.alias {
            Some(alias) => b.push_qualified(alias, p.column),
            None => b.push_ident(p.column),
        };
        if p.value.is_null() {
            b.push(" IS NULL");
        } else {
            b.push(" = ").push_bind(p.value.clone());
        }
    });
}

fn push_paging(b: &mut SqlBuilder, limit: Option<u64>, offset: Option<u64>) {
    match (limit, offset) {
        (Some(limit), _) => {
            b.push(" LIMIT ").push(&limit.to_string());
        }
        (None, Some(_)) => {
            if let Some(all) = b.dialect().unbounded_limit() {
                b.push(" LIMIT ").push(all);
            }
        }
        (None, None) => {}
    }
    if let Some(offset) = offset {
        b.push(" OFFSET ").push(&offset.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AggregateFunction, Condition, JoinKind, TableKey};

    fn sqlite(query: &Query) -> DbResult<Statement> {
        compile(query, Dialect::Sqlite)
    }

    #[test]
    fn test_select_single_column() {
        let query = Query::select(TableRef::new("users")).with_column(ColumnRef::new("id"));
        let stmt = sqlite(&query).unwrap();
        assert_eq!(stmt.sql, r#"SELECT "users"."id" "users.id" FROM "users" "users""#);
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_postgres_rejects_labels_it_would_truncate() {
        let table = "t".repeat(40);
        let fits = Query::select(TableRef::new(table.as_str()))
            .with_column(ColumnRef::new("c".repeat(22).as_str()));
        assert!(compile(&fits, Dialect::Postgres).is_ok());

        let long = Query::select(TableRef::new(table.as_str()))
            .with_column(ColumnRef::new("c".repeat(23).as_str()));
        let err = compile(&long, Dialect::Postgres).unwrap_err();
        assert_eq!(err.kind(), "CompileFailed");
        assert!(err.to_string().contains("63"), "{}", err);

        // aggregate labels grow by the function name
        let summed = Query::select(TableRef::new(table.as_str())).with_column(
            ColumnRef::new("c".repeat(18)).with_function(AggregateFunction::Sum),
        );
        assert!(compile(&summed, Dialect::Postgres).is_err());

        assert!(compile(&long, Dialect::Sqlite).is_ok());
        assert!(compile(&long, Dialect::MySql).is_ok());
    }

    #[test]
    fn test_select_requires_columns() {
        let err = sqlite(&Query::select(TableRef::new("users"))).unwrap_err();
        assert_eq!(err.kind(), "CompileFailed");
    }

    #[test]
    fn test_select_where_skips_absent_and_handles_null() {
        let query = Query::select(TableRef::new("users"))
            .with_column(ColumnRef::new("id"))
            .with_filter(ColumnRef::new("name"))
            .with_filter(ColumnRef::new("deleted_at").with_value(SqlValue::Null))
            .with_filter(ColumnRef::new("status").with_value("active"));
        let stmt = sqlite(&query).unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT "users"."id" "users.id" FROM "users" "users" WHERE "users"."deleted_at" IS NULL AND "users"."status" = ?"#
        );
        assert_eq!(stmt.args, vec![SqlValue::from("active")]);
    }

    #[test]
    fn test_select_no_group_by_without_aggregate() {
        let query = Query::select(TableRef::new("t"))
            .with_column(ColumnRef::new("a"))
            .with_column(ColumnRef::new("b"));
        assert!(!sqlite(&query).unwrap().sql.contains("GROUP BY"));
    }

    #[test]
    fn test_select_aggregate_only_has_no_group_by() {
        let query = Query::select(TableRef::new("t"))
            .with_column(ColumnRef::new("id").with_function(AggregateFunction::Count));
        let stmt = sqlite(&query).unwrap();
        assert_eq!(stmt.sql, r#"SELECT count("t"."id") "count(t.id)" FROM "t" "t""#);
    }

    #[test]
    fn test_select_paging_per_dialect() {
        let query = Query::select(TableRef::new("t"))
            .with_column(ColumnRef::new("a"))
            .with_offset(20);
        assert!(sqlite(&query).unwrap().sql.ends_with(" LIMIT -1 OFFSET 20"));
        assert!(
            compile(&query, Dialect::MySql)
                .unwrap()
                .sql
                .ends_with(" LIMIT 18446744073709551615 OFFSET 20")
        );
        assert!(
            compile(&query, Dialect::Postgres)
                .unwrap()
                .sql
                .ends_with(r#""t" "t" OFFSET 20"#)
        );

        let query = query.with_limit(10);
        assert!(sqlite(&query).unwrap().sql.ends_with(" LIMIT 10 OFFSET 20"));
    }

    #[test]
    fn test_select_postgres_numbers_placeholders() {
        let query = Query::select(TableRef::new("t"))
            .with_column(ColumnRef::new("a"))
            .with_filter(ColumnRef::new("a").with_value(1))
            .with_filter(ColumnRef::new("b").with_value(2));
        let stmt = compile(&query, Dialect::Postgres).unwrap();
        assert!(stmt.sql.ends_with(r#"WHERE "t"."a" = $1 AND "t"."b" = $2"#));
    }

    #[test]
    fn test_select_mysql_quoting() {
        let query = Query::select(TableRef::new("orders")).with_column(ColumnRef::new("id"));
        let stmt = compile(&query, Dialect::MySql).unwrap();
        assert_eq!(stmt.sql, "SELECT `orders`.`id` `orders.id` FROM `orders` `orders`");
    }

    #[test]
    fn test_alias_collision_rejected() {
        let table = TableRef::new("a").join(
            JoinKind::Inner,
            TableRef::new("a"),
            vec![Condition::eq(ColumnRef::new("id"), ColumnRef::new("id"))],
        );
        let query = Query::select(table).with_column(ColumnRef::new("id"));
        let err = sqlite(&query).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_join_without_conditions_rejected() {
        let table = TableRef::new("a").join(JoinKind::Left, TableRef::new("b"), Vec::new());
        let query = Query::select(table).with_column(ColumnRef::new("id"));
        assert_eq!(sqlite(&query).unwrap_err().kind(), "CompileFailed");
    }

    #[test]
    fn test_unknown_alias_rejected() {
        let query = Query::select(TableRef::new("a"))
            .with_column(ColumnRef::of(TableKey::new("a", 2), "id"));
        let err = sqlite(&query).unwrap_err();
        assert!(err.to_string().contains("a2"));
    }

    #[test]
    fn test_join_operators() {
        use crate::models::Operator;
        let table = TableRef::new("a").join(
            JoinKind::Inner,
            TableRef::new("b"),
            vec![
                Condition::eq(ColumnRef::new("id"), ColumnRef::of("b", "a_id")),
                Condition::new(
                    ColumnRef::new("created"),
                    Operator::LtEq,
                    ColumnRef::of("b", "created"),
                ),
            ],
        );
        let query = Query::select(table).with_column(ColumnRef::new("id"));
        let stmt = sqlite(&query).unwrap();
        assert!(stmt.sql.ends_with(
            r#"JOIN "b" "b" ON "a"."id" = "b"."a_id" AND "a"."created" <= "b"."created""#
        ));
    }

    #[test]
    fn test_insert_absent_value_binds_null() {
        let query = Query::insert("t")
            .with_column(ColumnRef::new("a").with_value(1))
            .with_column(ColumnRef::new("b"));
        let stmt = compile(&query, Dialect::Postgres).unwrap();
        assert_eq!(stmt.sql, r#"INSERT INTO "t" ("a","b") VALUES ($1,$2)"#);
        assert_eq!(stmt.args, vec![SqlValue::Int(1), SqlValue::Null]);
    }

    #[test]
    fn test_insert_requires_columns() {
        assert_eq!(sqlite(&Query::insert("t")).unwrap_err().kind(), "CompileFailed");
    }

    #[test]
    fn test_update_without_filter_blocked() {
        let query = Query::update("t").with_column(ColumnRef::new("a").with_value(1));
        let err = sqlite(&query).unwrap_err();
        assert_eq!(err.kind(), "DangerousOperationBlocked");

        // a where entry without a value does not count as a filter
        let query = query.with_filter(ColumnRef::new("id"));
        assert_eq!(sqlite(&query).unwrap_err().kind(), "DangerousOperationBlocked");

        let stmt = sqlite(&query.allowing_unfiltered()).unwrap();
        assert_eq!(stmt.sql, r#"UPDATE "t" SET "a" = ?"#);
    }

    #[test]
    fn test_delete_without_filter_blocked() {
        let err = sqlite(&Query::delete("t")).unwrap_err();
        assert!(err.to_string().contains("DELETE without WHERE"));
        let stmt = sqlite(&Query::delete("t").allowing_unfiltered()).unwrap();
        assert_eq!(stmt.sql, r#"DELETE FROM "t""#);
    }

    #[test]
    fn test_delete_null_filter() {
        let query = Query::delete("t").with_filter(ColumnRef::new("owner").with_value(SqlValue::Null));
        let stmt = sqlite(&query).unwrap();
        assert_eq!(stmt.sql, r#"DELETE FROM "t" WHERE "owner" IS NULL"#);
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_write_rejects_joins_and_paging() {
        let mut query = Query::delete("t").with_filter(ColumnRef::new("id").with_value(1));
        query.table = TableRef::new("t").join(
            JoinKind::Inner,
            TableRef::new("u"),
            vec![Condition::eq(ColumnRef::new("id"), ColumnRef::of("u", "id"))],
        );
        assert_eq!(sqlite(&query).unwrap_err().kind(), "CompileFailed");

        let query = Query::update("t")
            .with_column(ColumnRef::new("a").with_value(1))
            .with_filter(ColumnRef::new("id").with_value(1))
            .with_limit(1);
        assert_eq!(sqlite(&query).unwrap_err().kind(), "CompileFailed");
    }

    #[test]
    fn test_write_rejects_foreign_table_columns() {
        let query = Query::delete("t").with_filter(ColumnRef::of("u", "id").with_value(1));
        assert_eq!(sqlite(&query).unwrap_err().kind(), "CompileFailed");
    }
}
