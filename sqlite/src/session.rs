//! CRUD and DDL over a connection held by the execution queue.
//!
//! A [`Session`] only exists inside a queue operation, so every method runs
//! with exclusive access to the connection. Statements are rendered by
//! [`tablestore_core::statement`]; values are always bound.
//!
//! Sessions handed out by [`ExecutionQueue::transaction`] (and to upgrade
//! hooks) run inside a transaction. [`Session::atomically`] nests a
//! savepoint on top, so multi-statement operations such as table rebuilds
//! stay atomic whether or not an outer transaction exists.
//!
//! [`ExecutionQueue::transaction`]: crate::ExecutionQueue::transaction

use std::cell::Cell;

use rusqlite::Connection;
use tablestore_core::statement::{
    render_count, render_create_table, render_delete, render_drop_table, render_insert,
    render_reset_sequence, render_select, render_truncate, render_update,
};
use tablestore_core::{BuildError, ColumnDef, Constraint, Fields, Row, Statement, TableDescriptor};
use tracing::debug;

use crate::convert::{self, bind_args};
use crate::error::{Result, StoreError};
use crate::queue::Outcome;
use crate::rebuild::{self, AlterCapabilities};

/// Exclusive handle to the connection for the duration of one operation.
///
/// # Examples
///
/// ```no_run
/// use tablestore::{ConnectionOptions, ExecutionQueue};
/// use tablestore_core::{Constraint, Fields, Row, TableDescriptor};
///
/// let queue = ExecutionQueue::new();
/// queue.open("data.sqlite".as_ref(), &ConnectionOptions::default()).unwrap();
/// let rows = queue
///     .transaction(|session| {
///         session.create_table(&TableDescriptor::new("users", ["id", "name"]))?;
///         let id = session.insert("users", &Row::new().with("name", "A"))?;
///         session.select("users", Fields::All, Constraint::new("WHERE id = ?").arg(id))
///     })
///     .unwrap();
/// assert_eq!(rows.len(), 1);
/// ```
pub struct Session<'c> {
    conn: &'c Connection,
    capabilities: AlterCapabilities,
    depth: Cell<u32>,
}

impl<'c> Session<'c> {
    pub(crate) fn new(conn: &'c Connection, capabilities: AlterCapabilities) -> Self {
        Self {
            conn,
            capabilities,
            depth: Cell::new(0),
        }
    }

    pub(crate) fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// ALTER capabilities in effect for structural operations.
    pub fn capabilities(&self) -> AlterCapabilities {
        self.capabilities
    }

    /// Executes any statement.
    ///
    /// Row-producing statements return their rows; others report the number
    /// of changed rows.
    pub fn execute(&self, statement: &Statement) -> Result<Outcome> {
        debug!(sql = %statement.sql, args = statement.args.len(), "Executing statement");
        let mut stmt = self.conn.prepare(&statement.sql)?;
        let mut outcome = Outcome::default();
        if stmt.column_count() > 0 {
            outcome.rows = convert::read_rows(&mut stmt, &statement.args)?;
        } else {
            outcome.changes = stmt.execute(bind_args(&statement.args))?;
        }
        outcome.last_insert_rowid = self.conn.last_insert_rowid();
        Ok(outcome)
    }

    /// Executes a statement that returns no rows, reporting changed rows.
    pub(crate) fn exec(&self, statement: &Statement) -> Result<usize> {
        debug!(sql = %statement.sql, args = statement.args.len(), "Executing statement");
        Ok(self.conn.execute(&statement.sql, bind_args(&statement.args))?)
    }

    /// Runs `f` inside a savepoint.
    ///
    /// The savepoint is released when `f` succeeds and rolled back when it
    /// fails or panics. Calls nest; outside any transaction the outermost
    /// savepoint behaves like a transaction of its own.
    pub fn atomically<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let depth = self.depth.get();
        let mut savepoint = Savepoint::begin(self.conn, depth)?;
        self.depth.set(depth + 1);
        let result = f(self);
        self.depth.set(depth);
        match result {
            Ok(value) => {
                savepoint.release()?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }

    /// Inserts a row and returns its row id.
    pub fn insert(&self, table: &str, row: &Row) -> Result<i64> {
        self.exec(&render_insert(table, row)?)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Updates matching rows, returning how many changed.
    pub fn update(&self, table: &str, row: &Row, constraint: Constraint) -> Result<usize> {
        self.exec(&render_update(table, row, &constraint)?)
    }

    /// Deletes matching rows, returning how many were removed.
    pub fn delete(&self, table: &str, constraint: Constraint) -> Result<usize> {
        self.exec(&render_delete(table, &constraint)?)
    }

    /// Removes every row and restarts the table's `AUTOINCREMENT` counter.
    pub fn truncate(&self, table: &str) -> Result<()> {
        self.atomically(|s| {
            s.exec(&render_truncate(table)?)?;
            if s.table_exists("sqlite_sequence")? {
                s.exec(&render_reset_sequence(table)?)?;
            }
            Ok(())
        })
    }

    /// Selects matching rows.
    ///
    /// Each row's fields follow the requested order, or the table's column
    /// order for [`Fields::All`]. An empty result means no row matched;
    /// failures are reported as errors.
    pub fn select(&self, table: &str, fields: Fields, constraint: Constraint) -> Result<Vec<Row>> {
        let statement = render_select(table, &fields, &constraint)?;
        debug!(sql = %statement.sql, args = statement.args.len(), "Selecting rows");
        convert::query_rows(self.conn, &statement)
    }

    /// Counts matching rows.
    pub fn count(&self, table: &str, constraint: Constraint) -> Result<u64> {
        let statement = render_count(table, &constraint)?;
        debug!(sql = %statement.sql, args = statement.args.len(), "Counting rows");
        let count: i64 = self
            .conn
            .query_row(&statement.sql, bind_args(&statement.args), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Creates a table if it does not exist yet.
    pub fn create_table(&self, descriptor: &TableDescriptor) -> Result<()> {
        self.exec(&render_create_table(descriptor)?)?;
        Ok(())
    }

    /// Creates several tables atomically.
    pub fn create_tables(&self, descriptors: &[TableDescriptor]) -> Result<()> {
        self.atomically(|s| descriptors.iter().try_for_each(|d| s.create_table(d)))
    }

    /// Drops a table if it exists.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.exec(&render_drop_table(table)?)?;
        Ok(())
    }

    /// Appends `TEXT` columns; fields that already exist are skipped.
    pub fn add_fields<S: AsRef<str>>(&self, table: &str, fields: &[S]) -> Result<()> {
        rebuild::add_fields(self, table, fields)
    }

    /// Renames a column, keeping its position and data.
    pub fn rename_field(&self, table: &str, old: &str, new: &str) -> Result<()> {
        rebuild::rename_field(self, table, old, new)
    }

    /// Deletes columns, keeping the order and data of the remaining ones.
    pub fn delete_fields<S: AsRef<str>>(&self, table: &str, fields: &[S]) -> Result<()> {
        rebuild::delete_fields(self, table, fields)
    }

    /// Returns `true` if a table with this name exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Names of all user tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Column definitions of a table, in table order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownTable`] if the table does not exist.
    pub fn columns(&self, table: &str) -> Result<Vec<ColumnDef>> {
        if table.is_empty() {
            return Err(BuildError::InvalidIdentifier(table.to_string()).into());
        }
        let columns = convert::load_columns(self.conn, table)?;
        if columns.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(columns)
    }

    /// Schema version stored in the file header.
    pub fn user_version(&self) -> Result<u32> {
        let raw: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;
        // The header field is 32 bits wide; SQLite reports it signed.
        Ok(raw as i32 as u32)
    }

    pub(crate) fn set_user_version(&self, version: u32) -> Result<()> {
        self.conn
            .pragma_update(None, "user_version", version as i32)?;
        Ok(())
    }
}

/// Raw SAVEPOINT guard; rolls back on drop unless released.
struct Savepoint<'c> {
    conn: &'c Connection,
    name: String,
    released: bool,
}

impl<'c> Savepoint<'c> {
    fn begin(conn: &'c Connection, depth: u32) -> Result<Self> {
        let name = format!("tablestore_sp{depth}");
        conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        Ok(Self {
            conn,
            name,
            released: false,
        })
    }

    fn release(&mut self) -> Result<()> {
        self.conn.execute_batch(&format!("RELEASE {}", self.name))?;
        self.released = true;
        Ok(())
    }
}

impl Drop for Savepoint<'_> {
    fn drop(&mut self) {
        if !self.released {
            let sql = format!("ROLLBACK TO {name}; RELEASE {name}", name = self.name);
            if let Err(err) = self.conn.execute_batch(&sql) {
                debug!(error = %err, savepoint = %self.name, "Savepoint rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tablestore_core::Value;

    use super::*;

    fn with_session<T>(f: impl FnOnce(&Session<'_>) -> T) -> T {
        let conn = Connection::open_in_memory().unwrap();
        let session = Session::new(&conn, AlterCapabilities::NONE);
        f(&session)
    }

    #[test]
    fn test_insert_select_roundtrip() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("users", ["id", "name"]))
                .unwrap();
            let id = s.insert("users", &Row::new().with("name", "A")).unwrap();
            assert_eq!(id, 1);
            let rows = s
                .select("users", Fields::All, Constraint::new("WHERE id = (?)").arg(id))
                .unwrap();
            assert_eq!(rows, vec![Row::new().with("id", 1).with("name", "A")]);
        });
    }

    #[test]
    fn test_select_named_fields_follow_requested_order() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("t", ["a", "b"])).unwrap();
            s.insert("t", &Row::new().with("a", "1").with("b", "2"))
                .unwrap();
            let rows = s
                .select("t", Fields::named(["b", "a"]), Constraint::none())
                .unwrap();
            assert_eq!(rows[0].fields().collect::<Vec<_>>(), vec!["b", "a"]);
        });
    }

    #[test]
    fn test_malformed_constraint_is_rejected_before_execution() {
        with_session(|s| {
            // The table does not exist: an engine round-trip would fail differently.
            let err = s
                .count("missing", Constraint::new("WHERE a = ? AND b = ?").arg(1))
                .unwrap_err();
            assert!(err.is_malformed_constraint());
        });
    }

    #[test]
    fn test_count_and_delete() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("t", ["k"])).unwrap();
            for k in ["x", "y", "x"] {
                s.insert("t", &Row::new().with("k", k)).unwrap();
            }
            let by_x = || Constraint::new("WHERE k = ?").arg("x");
            assert_eq!(s.count("t", by_x()).unwrap(), 2);
            assert_eq!(s.delete("t", by_x()).unwrap(), 2);
            assert_eq!(s.count("t", by_x()).unwrap(), 0);
            assert!(s.select("t", Fields::All, by_x()).unwrap().is_empty());
            assert_eq!(s.count("t", Constraint::none()).unwrap(), 1);
        });
    }

    #[test]
    fn test_truncate_restarts_key() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("t", ["id", "v"])).unwrap();
            s.insert("t", &Row::new().with("v", "a")).unwrap();
            s.insert("t", &Row::new().with("v", "b")).unwrap();
            s.truncate("t").unwrap();
            assert_eq!(s.count("t", Constraint::none()).unwrap(), 0);
            assert_eq!(s.insert("t", &Row::new().with("v", "c")).unwrap(), 1);
        });
    }

    #[test]
    fn test_truncate_without_sequence_table() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("t", ["v"])).unwrap();
            s.insert("t", &Row::new().with("v", "a")).unwrap();
            s.truncate("t").unwrap();
            assert_eq!(s.count("t", Constraint::none()).unwrap(), 0);
        });
    }

    #[test]
    fn test_atomically_rolls_back_on_error() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("t", ["v"])).unwrap();
            let result: Result<()> = s.atomically(|inner| {
                inner.insert("t", &Row::new().with("v", "a"))?;
                inner.atomically(|nested| {
                    nested.insert("t", &Row::new().with("v", "b"))?;
                    Ok(())
                })?;
                Err(StoreError::Closed)
            });
            assert!(result.is_err());
            assert_eq!(s.count("t", Constraint::none()).unwrap(), 0);
        });
    }

    #[test]
    fn test_nested_rollback_keeps_outer_work() {
        with_session(|s| {
            s.create_table(&TableDescriptor::new("t", ["v"])).unwrap();
            s.atomically(|outer| {
                outer.insert("t", &Row::new().with("v", "kept"))?;
                let inner: Result<()> = outer.atomically(|inner| {
                    inner.insert("t", &Row::new().with("v", "dropped"))?;
                    Err(StoreError::Closed)
                });
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();
            let rows = s.select("t", Fields::All, Constraint::none()).unwrap();
            assert_eq!(rows, vec![Row::new().with("v", "kept")]);
        });
    }

    #[test]
    fn test_create_tables_is_atomic() {
        with_session(|s| {
            let err = s.create_tables(&[
                TableDescriptor::new("ok", ["a"]),
                TableDescriptor::new("bad", ["a", "a"]),
            ]);
            assert!(err.is_err());
            assert!(!s.table_exists("ok").unwrap());
        });
    }

    #[test]
    fn test_user_version_roundtrip() {
        with_session(|s| {
            assert_eq!(s.user_version().unwrap(), 0);
            s.set_user_version(7).unwrap();
            assert_eq!(s.user_version().unwrap(), 7);
            s.set_user_version(u32::MAX).unwrap();
            assert_eq!(s.user_version().unwrap(), u32::MAX);
        });
    }

    #[test]
    fn test_columns_of_missing_table() {
        with_session(|s| {
            assert!(matches!(s.columns("nope"), Err(StoreError::UnknownTable(_))));
        });
    }

    #[test]
    fn test_execute_reports_rows_and_changes() {
        with_session(|s| {
            s.execute(&Statement::new("CREATE TABLE t (a)")).unwrap();
            let outcome = s
                .execute(&Statement::with_args("INSERT INTO t VALUES (?)", vec![Value::from(5)]).unwrap())
                .unwrap();
            assert_eq!(outcome.changes, 1);
            let outcome = s.execute(&Statement::new("SELECT a FROM t")).unwrap();
            assert_eq!(outcome.rows, vec![Row::new().with("a", 5)]);
        });
    }
}
