#![forbid(unsafe_code)]
//! Minimal SQL builder helpers driven by the static `EntitySchema` from `#[derive(Entity)]`.
//!
//! Statements use `?` placeholders and SQLite column types. Identifiers are emitted
//! as-is; the derive macro only admits plain ASCII identifiers.

use txorm_core::{EntitySchema, FieldDef, Filter, Value, ValueKind};

const PLACEHOLDER: &str = "?";

fn placeholders(n: usize) -> String {
    vec![PLACEHOLDER; n].join(", ")
}

/// SQLite storage class for a column kind.
pub fn sql_type(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::String => "TEXT",
        ValueKind::I32 | ValueKind::I64 | ValueKind::Bool => "INTEGER",
        ValueKind::F64 => "REAL",
        ValueKind::Null => "BLOB",
    }
}

fn column_def(field: &FieldDef) -> String {
    if field.identity {
        return format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", field.column);
    }
    let mut def = format!("{} {}", field.column, sql_type(field.kind));
    if field.rejects_null() {
        def.push_str(" NOT NULL");
    }
    if field.unique {
        def.push_str(" UNIQUE");
    }
    def
}

/// Build CREATE TABLE IF NOT EXISTS <table> (...) from the schema.
pub fn create_table(schema: &EntitySchema) -> String {
    let cols: Vec<String> = schema.fields.iter().map(column_def).collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({cols})",
        table = schema.table,
        cols = cols.join(", ")
    )
}

/// Build INSERT INTO <table> (<cols>) VALUES (<placeholders>)
pub fn insert(schema: &EntitySchema, columns: &[&str]) -> String {
    format!(
        "INSERT INTO {table} ({cols}) VALUES ({vals})",
        table = schema.table,
        cols = columns.join(", "),
        vals = placeholders(columns.len())
    )
}

/// Build UPDATE <table> SET <col1> = ?, ... WHERE <id> = ?
pub fn update_by_id(schema: &EntitySchema, columns: &[&str]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .map(|col| format!("{col} = {PLACEHOLDER}"))
        .collect();
    format!(
        "UPDATE {table} SET {set_clause} WHERE {id} = {PLACEHOLDER}",
        table = schema.table,
        set_clause = assignments.join(", "),
        id = schema.identity().column,
    )
}

/// Build DELETE FROM <table> WHERE <id> = ?
pub fn delete_by_id(schema: &EntitySchema) -> String {
    format!(
        "DELETE FROM {table} WHERE {id} = {PLACEHOLDER}",
        table = schema.table,
        id = schema.identity().column,
    )
}

/// Build SELECT <cols> FROM <table>
pub fn select_all(schema: &EntitySchema) -> String {
    format!(
        "SELECT {cols} FROM {table}",
        cols = schema.column_names().join(", "),
        table = schema.table
    )
}

/// Build WHERE clause for a conjunction (AND) of equality comparisons.
/// `Null` values render as `IS NULL` and bind no parameter.
/// Returns ("WHERE <c1> = ? AND <c2> IS NULL ...", params_in_order).
pub fn build_where_and(predicates: &[(&str, Value)]) -> (String, Vec<Value>) {
    if predicates.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut clauses = Vec::with_capacity(predicates.len());
    let mut params = Vec::with_capacity(predicates.len());
    for (column, value) in predicates {
        if value.is_null() {
            clauses.push(format!("{column} IS NULL"));
        } else {
            clauses.push(format!("{column} = {PLACEHOLDER}"));
            params.push(value.clone());
        }
    }
    (format!("WHERE {}", clauses.join(" AND ")), params)
}

/// Build SELECT ... WHERE <filter> ORDER BY <id> ASC [LIMIT n], with its parameters.
pub fn select_filtered(schema: &EntitySchema, filter: &Filter) -> (String, Vec<Value>) {
    let predicates: Vec<(&str, Value)> = filter
        .predicates
        .iter()
        .map(|(field, value)| (field.column, value.clone()))
        .collect();
    let (where_sql, params) = build_where_and(&predicates);
    let mut sql = select_all(schema);
    if !where_sql.is_empty() {
        sql.push(' ');
        sql.push_str(&where_sql);
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(schema.identity().column);
    sql.push_str(" ASC");
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ");
        sql.push_str(&limit.to_string());
    }
    (sql, params)
}
