//! Bidirectional conversion between [`Value`]/[`Row`] and SQLite.
//!
//! Values are bound through the [`Bind`] wrapper, which borrows the payload
//! instead of copying it. Results are read back column by column into
//! [`Row`]s whose field order follows the statement's result columns.
//!
//! # Round-trip guarantees
//!
//! - Integers, reals and blobs come back exactly as bound.
//! - Text that is not valid UTF-8 (written by another client) is read
//!   lossily rather than failing the whole query.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Params, ToSql, params_from_iter};
use tablestore_core::{ColumnDef, Row, Statement, Value};

use crate::error::Result;

/// Borrowing [`ToSql`] adapter for [`Value`].
pub(crate) struct Bind<'a>(pub(crate) &'a Value);

impl ToSql for Bind<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self.0 {
            Value::Null => ValueRef::Null,
            Value::Integer(v) => ValueRef::Integer(*v),
            Value::Real(v) => ValueRef::Real(*v),
            Value::Text(v) => ValueRef::Text(v.as_bytes()),
            Value::Blob(v) => ValueRef::Blob(v),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

/// Builds positional parameters for a statement's arguments.
pub(crate) fn bind_args(args: &[Value]) -> impl Params + '_ {
    params_from_iter(args.iter().map(Bind))
}

/// Converts a borrowed SQLite value into an owned [`Value`].
pub(crate) fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

/// Runs a row-returning statement and collects every row.
pub(crate) fn query_rows(conn: &Connection, statement: &Statement) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(&statement.sql)?;
    read_rows(&mut stmt, &statement.args)
}

/// Executes an already prepared statement and collects every row.
pub(crate) fn read_rows(stmt: &mut rusqlite::Statement<'_>, args: &[Value]) -> Result<Vec<Row>> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(bind_args(args))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Row::new();
        for (index, name) in names.iter().enumerate() {
            record.push(name.as_str(), from_value_ref(row.get_ref(index)?));
        }
        out.push(record);
    }
    Ok(out)
}

/// Reads a table's column definitions via `PRAGMA table_xinfo`.
///
/// Returns an empty list when the table does not exist.
pub(crate) fn load_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnDef>> {
    // hidden: 0 ordinary, 1 virtual-table hidden, 2 and 3 generated.
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk, hidden FROM pragma_table_xinfo(?1) WHERE hidden <> 1",
    )?;
    let mut columns = stmt
        .query_map([table], |row| {
            Ok(ColumnDef {
                name: row.get(0)?,
                decl_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(2)? != 0,
                default: row.get(3)?,
                primary_key: row.get(4)?,
                autoincrement: false,
                generated: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.iter().any(|c| c.primary_key > 0) && uses_autoincrement(conn, table)? {
        for column in columns.iter_mut().filter(|c| c.primary_key > 0) {
            column.autoincrement = true;
        }
    }
    Ok(columns)
}

/// Checks whether a table was declared with `AUTOINCREMENT`.
fn uses_autoincrement(conn: &Connection, table: &str) -> Result<bool> {
    let sql: Option<String> = conn
        .prepare("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE")?
        .query_row([table], |row| row.get::<_, Option<String>>(0))
        .optional()?
        .flatten();
    Ok(sql.is_some_and(|s| s.to_ascii_uppercase().contains("AUTOINCREMENT")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_read_back_every_storage_class() {
        let conn = Connection::open_in_memory().unwrap();
        let stmt = Statement {
            sql: "SELECT ?, ?, ?, ?, ?".to_string(),
            args: vec![
                Value::Null,
                Value::Integer(-7),
                Value::Real(2.5),
                Value::Text("héllo".into()),
                Value::Blob(vec![0, 1, 255]),
            ],
        };
        let rows = query_rows(&conn, &stmt).unwrap();
        assert_eq!(rows.len(), 1);
        let values: Vec<Value> = rows[0].values().cloned().collect();
        assert_eq!(values, stmt.args);
    }

    #[test]
    fn test_load_columns_reports_definitions() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL DEFAULT 'x', note)",
        )
        .unwrap();
        let columns = load_columns(&conn, "t").unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "note"]);
        assert!(columns[0].autoincrement);
        assert_eq!(columns[0].primary_key, 1);
        assert!(columns[1].not_null);
        assert_eq!(columns[1].default.as_deref(), Some("'x'"));
        assert_eq!(columns[2].decl_type, "");
    }

    #[test]
    fn test_repeated_result_names_keep_every_column() {
        let conn = Connection::open_in_memory().unwrap();
        let rows = query_rows(&conn, &Statement::new("SELECT 1 AS a, 2 AS a, 3 AS b")).unwrap();
        let fields: Vec<&str> = rows[0].fields().collect();
        assert_eq!(fields, vec!["a", "a", "b"]);
        assert_eq!(rows[0].get("a"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_load_columns_includes_generated_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE g (a INTEGER, c INTEGER GENERATED ALWAYS AS (a * 2))")
            .unwrap();
        let columns = load_columns(&conn, "g").unwrap();
        assert_eq!(columns.len(), 2);
        assert!(!columns[0].generated);
        assert!(columns[1].generated);
    }

    #[test]
    fn test_load_columns_missing_table_is_empty() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(load_columns(&conn, "nope").unwrap().is_empty());
    }
}
