//! Column-level schema changes.
//!
//! Adding a column is always a plain `ALTER TABLE ... ADD COLUMN`. Renaming
//! and deleting columns use native `ALTER TABLE` when the linked SQLite
//! supports it (rename since 3.25, drop since 3.35) and the configured
//! [`AlterStrategy`] allows it. Otherwise the table is rebuilt:
//!
//! 1. create `<table>__shadow` from the stored `CREATE TABLE` text, with
//!    only the affected column edited
//! 2. copy every row, mapping old columns to new ones (generated columns
//!    are recomputed, not copied)
//! 3. drop the original and rename the shadow into its place
//! 4. recreate indexes whose columns survived, and the table's triggers
//! 5. restore the `AUTOINCREMENT` counter
//!
//! The whole rebuild runs in one savepoint. Because the definition text is
//! reused, column types, collations, defaults, keys, `CHECK` and
//! `FOREIGN KEY` clauses and generated columns all survive. Deleting a
//! column drops the table constraints that mention it and is refused while
//! another column's `CHECK` or generated expression still uses it. Partial
//! and expression indexes are not recreated.
//!
//! # Foreign keys
//!
//! With enforcement enabled and no transaction open, enforcement is switched
//! off for the rebuild and `PRAGMA foreign_key_check` runs before the
//! savepoint is released. Inside a transaction enforcement cannot be
//! toggled, so a rebuild of a table that other tables reference is refused
//! rather than letting the implicit delete cascade.

use rusqlite::{Connection, OptionalExtension};
use tablestore_core::statement::{
    render_add_column, render_copy_rows, render_create_index, render_drop_column, render_drop_table,
    render_rename_column, render_rename_table,
};
use tablestore_core::{ColumnDef, Statement, TableDefinition, quote_ident};
use tracing::{debug, warn};

use crate::config::AlterStrategy;
use crate::error::{Result, StoreError};
use crate::session::Session;

/// Native `ALTER TABLE` support available to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlterCapabilities {
    /// `ALTER TABLE ... RENAME COLUMN` may be used.
    pub rename_column: bool,
    /// `ALTER TABLE ... DROP COLUMN` may be used.
    pub drop_column: bool,
}

impl AlterCapabilities {
    /// Every structural change goes through a rebuild.
    pub const NONE: Self = Self {
        rename_column: false,
        drop_column: false,
    };

    /// Every structural change uses native `ALTER TABLE`.
    pub const ALL: Self = Self {
        rename_column: true,
        drop_column: true,
    };

    /// Capabilities of a SQLite library with the given version string.
    ///
    /// ```
    /// use tablestore::AlterCapabilities;
    ///
    /// let caps = AlterCapabilities::from_version("3.31.1");
    /// assert!(caps.rename_column);
    /// assert!(!caps.drop_column);
    /// ```
    pub fn from_version(version: &str) -> Self {
        let mut parts = version
            .trim()
            .split('.')
            .map(|p| p.parse::<u32>().unwrap_or(0));
        let major = parts.next().unwrap_or(0);
        let minor = parts.next().unwrap_or(0);
        let at_least = |m: u32| major > 3 || (major == 3 && minor >= m);
        Self {
            rename_column: at_least(25),
            drop_column: at_least(35),
        }
    }

    /// Queries `sqlite_version()` on an open connection.
    pub fn detect(conn: &Connection) -> Result<Self> {
        let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
        Ok(Self::from_version(&version))
    }

    /// Applies a configured strategy to the detected capabilities.
    pub fn resolve(self, strategy: AlterStrategy) -> Self {
        match strategy {
            AlterStrategy::Auto => self,
            AlterStrategy::Native => Self::ALL,
            AlterStrategy::Rebuild => Self::NONE,
        }
    }
}

fn position(columns: &[ColumnDef], field: &str) -> Option<usize> {
    columns.iter().position(|c| c.name.eq_ignore_ascii_case(field))
}

pub(crate) fn add_fields<S: AsRef<str>>(session: &Session<'_>, table: &str, fields: &[S]) -> Result<()> {
    for field in fields {
        quote_ident(field.as_ref())?;
    }
    session.atomically(|s| {
        let mut existing: Vec<String> = s.columns(table)?.into_iter().map(|c| c.name).collect();
        for field in fields {
            let field = field.as_ref();
            if existing.iter().any(|name| name.eq_ignore_ascii_case(field)) {
                debug!(table, field, "Field already present, skipping");
                continue;
            }
            s.exec(&render_add_column(table, field)?)?;
            existing.push(field.to_string());
        }
        Ok(())
    })
}

pub(crate) fn rename_field(session: &Session<'_>, table: &str, old: &str, new: &str) -> Result<()> {
    quote_ident(new)?;
    let columns = session.columns(table)?;
    let index = position(&columns, old).ok_or_else(|| StoreError::UnknownField {
        table: table.to_string(),
        field: old.to_string(),
    })?;
    let current = columns[index].name.clone();
    if current == new {
        return Ok(());
    }
    if columns
        .iter()
        .enumerate()
        .any(|(i, c)| i != index && c.name.eq_ignore_ascii_case(new))
    {
        return Err(StoreError::DuplicateField {
            table: table.to_string(),
            field: new.to_string(),
        });
    }

    // Case-only renames go through a rebuild; native rename compares names
    // case-insensitively.
    if session.capabilities().rename_column && !current.eq_ignore_ascii_case(new) {
        debug!(table, old = %current, new, "Renaming field natively");
        session.exec(&render_rename_column(table, &current, new)?)?;
        return Ok(());
    }

    debug!(table, old = %current, new, "Renaming field by rebuild");
    let (name, sql) = load_definition(session.connection(), table)?;
    let mut definition = TableDefinition::parse(&sql)?;
    definition.rename_column(&current, new)?;
    let mapping = columns
        .iter()
        .map(|c| {
            let to = if c.name == current { new } else { c.name.as_str() };
            (c.name.clone(), to.to_string())
        })
        .collect();
    rebuild_table(session, &name, &definition, mapping)
}

pub(crate) fn delete_fields<S: AsRef<str>>(session: &Session<'_>, table: &str, fields: &[S]) -> Result<()> {
    let columns = session.columns(table)?;
    let mut doomed = Vec::with_capacity(fields.len());
    for field in fields {
        let field = field.as_ref();
        let index = position(&columns, field).ok_or_else(|| StoreError::UnknownField {
            table: table.to_string(),
            field: field.to_string(),
        })?;
        if !doomed.contains(&index) {
            doomed.push(index);
        }
    }
    if doomed.is_empty() {
        return Ok(());
    }
    let remaining: Vec<ColumnDef> = columns
        .iter()
        .enumerate()
        .filter(|(i, _)| !doomed.contains(i))
        .map(|(_, c)| c.clone())
        .collect();
    if remaining.is_empty() {
        return Err(StoreError::EmptyTable(table.to_string()));
    }
    let doomed: Vec<&str> = doomed.iter().map(|&i| columns[i].name.as_str()).collect();

    if session.capabilities().drop_column && can_drop_natively(session, table, &columns, &doomed)? {
        let native = session.atomically(|s| {
            for field in &doomed {
                s.exec(&render_drop_column(table, field)?)?;
            }
            Ok(())
        });
        match native {
            Ok(()) => {
                debug!(table, fields = ?doomed, "Deleted fields natively");
                return Ok(());
            }
            // Views, triggers, CHECK and foreign key clauses can all block a
            // native drop; the rebuild copes with them.
            Err(err) => debug!(table, error = %err, "Native drop failed, rebuilding"),
        }
    }

    debug!(table, fields = ?doomed, "Deleting fields by rebuild");
    let (name, sql) = load_definition(session.connection(), table)?;
    let mut definition = TableDefinition::parse(&sql)?;
    for constraint in definition.drop_columns(&doomed)? {
        debug!(table = %name, constraint = %constraint, "Constraint dropped with its field");
    }
    let mapping = remaining
        .iter()
        .map(|c| (c.name.clone(), c.name.clone()))
        .collect();
    rebuild_table(session, &name, &definition, mapping)
}

/// Canonical name and stored `CREATE TABLE` text of a table.
fn load_definition(conn: &Connection, table: &str) -> Result<(String, String)> {
    conn.query_row(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        [table],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()?
    .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

/// Native drop refuses key and indexed columns.
fn can_drop_natively(
    session: &Session<'_>,
    table: &str,
    columns: &[ColumnDef],
    doomed: &[&str],
) -> Result<bool> {
    let in_key = columns
        .iter()
        .any(|c| c.primary_key > 0 && doomed.contains(&c.name.as_str()));
    if in_key {
        return Ok(false);
    }
    let indexed = load_indexes(session.connection(), table)?
        .iter()
        .flat_map(|index| index.columns.iter().flatten())
        .any(|column| doomed.iter().any(|d| d.eq_ignore_ascii_case(column)));
    Ok(!indexed)
}

#[derive(Debug)]
struct IndexSpec {
    name: String,
    unique: bool,
    origin: String,
    partial: bool,
    /// `None` marks an expression column.
    columns: Vec<Option<String>>,
}

fn load_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexSpec>> {
    let mut list = conn.prepare("SELECT name, \"unique\", origin, partial FROM pragma_index_list(?1)")?;
    let mut indexes = list
        .query_map([table], |row| {
            Ok(IndexSpec {
                name: row.get(0)?,
                unique: row.get::<_, i64>(1)? != 0,
                origin: row.get(2)?,
                partial: row.get::<_, i64>(3)? != 0,
                columns: Vec::new(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut info = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    for index in &mut indexes {
        index.columns = info
            .query_map([index.name.as_str()], |row| row.get::<_, Option<String>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
    }
    Ok(indexes)
}

fn load_triggers(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 COLLATE NOCASE",
    )?;
    let triggers = stmt
        .query_map([table], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(triggers)
}

fn load_sequence(session: &Session<'_>, table: &str) -> Result<Option<i64>> {
    if !session.table_exists("sqlite_sequence")? {
        return Ok(None);
    }
    Ok(session
        .connection()
        .query_row("SELECT seq FROM sqlite_sequence WHERE name = ?1", [table], |row| row.get(0))
        .optional()?)
}

pub(crate) fn foreign_keys_enabled(conn: &Connection) -> Result<bool> {
    let enabled: i64 = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
    Ok(enabled != 0)
}

fn is_referenced(session: &Session<'_>, table: &str) -> Result<bool> {
    let mut stmt = session
        .connection()
        .prepare("SELECT COUNT(*) FROM pragma_foreign_key_list(?1) WHERE \"table\" = ?2 COLLATE NOCASE")?;
    for other in session.table_names()? {
        if other.eq_ignore_ascii_case(table) {
            continue;
        }
        let refs: i64 = stmt.query_row([other.as_str(), table], |row| row.get(0))?;
        if refs > 0 {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Replaces `table` with a copy built from `definition`.
///
/// `table` is the canonical name from `sqlite_master`; `mapping` pairs each
/// surviving source column with its target column. Generated columns are
/// recomputed by the shadow rather than copied.
fn rebuild_table(
    session: &Session<'_>,
    table: &str,
    definition: &TableDefinition,
    mapping: Vec<(String, String)>,
) -> Result<()> {
    let conn = session.connection();
    let shadow = format!("{table}__shadow");
    if session.table_exists(&shadow)? {
        return Err(StoreError::TableExists(shadow));
    }

    let enforcing = foreign_keys_enabled(conn)?;
    let toggled = enforcing && conn.is_autocommit();
    if enforcing && !toggled && is_referenced(session, table)? {
        return Err(StoreError::ForeignKeyViolation(table.to_string()));
    }
    if toggled {
        conn.pragma_update(None, "foreign_keys", false)?;
    }

    let result = session.atomically(|s| {
        let indexes = load_indexes(conn, table)?;
        let triggers = load_triggers(conn, table)?;
        let sequence = load_sequence(s, table)?;
        let generated: Vec<String> = s
            .columns(table)?
            .into_iter()
            .filter(|c| c.generated)
            .map(|c| c.name)
            .collect();
        let copied: Vec<(String, String)> = mapping
            .iter()
            .filter(|(from, _)| !generated.contains(from))
            .cloned()
            .collect();

        s.exec(&Statement::new(definition.to_sql(&shadow)?))?;
        s.exec(&render_copy_rows(table, &shadow, &copied)?)?;
        s.exec(&render_drop_table(table)?)?;
        swap_in(s, &shadow, table)?;

        for index in &indexes {
            restore_index(s, table, index, &mapping)?;
        }
        for (name, sql) in &triggers {
            debug!(table, trigger = %name, "Recreating trigger");
            conn.execute_batch(sql)?;
        }
        let autoincrement = s.columns(table)?.iter().any(|c| c.autoincrement);
        if let Some(seq) = sequence.filter(|_| autoincrement) {
            conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [table])?;
            conn.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
                rusqlite::params![table, seq],
            )?;
        }

        if enforcing {
            let violations: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pragma_foreign_key_check(?1)",
                [table],
                |row| row.get(0),
            )?;
            if violations > 0 {
                return Err(StoreError::ForeignKeyViolation(table.to_string()));
            }
        }
        Ok(())
    });

    if toggled {
        conn.pragma_update(None, "foreign_keys", true)?;
    }
    result
}

/// Renames the shadow into place without rewriting references elsewhere.
fn swap_in(session: &Session<'_>, shadow: &str, table: &str) -> Result<()> {
    let conn = session.connection();
    conn.pragma_update(None, "legacy_alter_table", true)?;
    let renamed = session.exec(&render_rename_table(shadow, table)?);
    conn.pragma_update(None, "legacy_alter_table", false)?;
    renamed.map(drop)
}

fn restore_index(
    session: &Session<'_>,
    table: &str,
    index: &IndexSpec,
    mapping: &[(String, String)],
) -> Result<()> {
    // Key and UNIQUE constraint indexes come back with the table definition.
    if index.origin != "c" {
        return Ok(());
    }
    if index.partial {
        warn!(table, index = %index.name, "Partial index not recreated after rebuild");
        return Ok(());
    }

    let mut columns = Vec::with_capacity(index.columns.len());
    for column in &index.columns {
        let Some(column) = column else {
            warn!(table, index = %index.name, "Expression index not recreated after rebuild");
            return Ok(());
        };
        match mapping.iter().find(|(from, _)| from.eq_ignore_ascii_case(column)) {
            Some((_, to)) => columns.push(to.clone()),
            None => {
                debug!(table, index = %index.name, column = %column, "Index dropped with its field");
                return Ok(());
            }
        }
    }

    session.exec(&render_create_index(&index.name, table, index.unique, &columns)?)?;
    Ok(())
}
