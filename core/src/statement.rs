//! SQL statement rendering.
//!
//! Pure functions that turn table names, rows, projections and constraint
//! fragments into a [`Statement`]: SQL text plus its ordered parameters.
//! Nothing here touches a database. Identifiers are always quoted with
//! [`quote_ident`]; values are always bound, never inlined.
//!
//! # Examples
//!
//! ```
//! use tablestore_core::{Constraint, Fields, Row, statement};
//!
//! let insert = statement::render_insert("users", &Row::new().with("name", "A")).unwrap();
//! assert_eq!(insert.sql, r#"INSERT INTO "users" ("name") VALUES (?)"#);
//!
//! let select = statement::render_select(
//!     "users",
//!     &Fields::All,
//!     &Constraint::new("WHERE id = (?)").arg(1),
//! )
//! .unwrap();
//! assert_eq!(select.sql, r#"SELECT * FROM "users" WHERE id = (?)"#);
//! assert_eq!(select.args.len(), 1);
//! ```

use std::collections::HashSet;

use crate::constraint::Constraint;
use crate::types::{Fields, Row, TableDescriptor, Value};
use crate::validate::{BuildError, Result, quote_ident, quote_list};

/// SQL text with its positional arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    /// SQL text using `?` placeholders.
    pub sql: String,
    /// Arguments bound to the placeholders, in order.
    pub args: Vec<Value>,
}

impl Statement {
    /// Creates a statement without arguments.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Creates a statement with arguments, validating the placeholder count.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MalformedConstraint`] if the SQL expects a
    /// different number of arguments.
    pub fn with_args(sql: impl Into<String>, args: Vec<Value>) -> Result<Self> {
        let sql = sql.into();
        let expected = crate::validate::count_placeholders(&sql)?;
        if expected != args.len() {
            return Err(BuildError::MalformedConstraint(format!(
                "statement expects {expected} argument(s) but {} were supplied",
                args.len()
            )));
        }
        Ok(Self { sql, args })
    }
}

/// Appends a validated constraint clause and its arguments.
fn with_constraint(mut sql: String, mut args: Vec<Value>, constraint: &Constraint) -> Result<Statement> {
    constraint.validate()?;
    if !constraint.is_empty() {
        sql.push(' ');
        sql.push_str(constraint.clause());
        args.extend(constraint.args().iter().cloned());
    }
    Ok(Statement { sql, args })
}

/// Renders `INSERT INTO <table> (<fields>) VALUES (<placeholders>)`.
///
/// An empty row renders `INSERT INTO <table> DEFAULT VALUES`.
pub fn render_insert(table: &str, row: &Row) -> Result<Statement> {
    let table = quote_ident(table)?;
    if row.is_empty() {
        return Ok(Statement::new(format!("INSERT INTO {table} DEFAULT VALUES")));
    }
    let fields: Vec<&str> = row.fields().collect();
    let placeholders = vec!["?"; fields.len()].join(", ");
    Ok(Statement {
        sql: format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            quote_list(&fields)?
        ),
        args: row.values().cloned().collect(),
    })
}

/// Renders `SELECT <fields> FROM <table> <constraint>`.
pub fn render_select(table: &str, fields: &Fields, constraint: &Constraint) -> Result<Statement> {
    let projection = match fields {
        Fields::All => "*".to_string(),
        Fields::Named(names) if names.is_empty() => return Err(BuildError::EmptyFieldList),
        Fields::Named(names) => quote_list(names)?,
    };
    let sql = format!("SELECT {projection} FROM {}", quote_ident(table)?);
    with_constraint(sql, Vec::new(), constraint)
}

/// Renders `UPDATE <table> SET <field> = ?, ... <constraint>`.
///
/// Assignment arguments come first, followed by the constraint's.
pub fn render_update(table: &str, row: &Row, constraint: &Constraint) -> Result<Statement> {
    if row.is_empty() {
        return Err(BuildError::EmptyFieldList);
    }
    let assignments = row
        .fields()
        .map(|f| quote_ident(f).map(|q| format!("{q} = ?")))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    let sql = format!("UPDATE {} SET {assignments}", quote_ident(table)?);
    with_constraint(sql, row.values().cloned().collect(), constraint)
}

/// Renders `DELETE FROM <table> <constraint>`.
pub fn render_delete(table: &str, constraint: &Constraint) -> Result<Statement> {
    let sql = format!("DELETE FROM {}", quote_ident(table)?);
    with_constraint(sql, Vec::new(), constraint)
}

/// Renders `SELECT COUNT(*) FROM <table> <constraint>`.
pub fn render_count(table: &str, constraint: &Constraint) -> Result<Statement> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table)?);
    with_constraint(sql, Vec::new(), constraint)
}

/// Renders `CREATE TABLE IF NOT EXISTS` for a field-list descriptor.
///
/// The key field, if any, becomes `INTEGER PRIMARY KEY AUTOINCREMENT`; every
/// other field is `TEXT`.
///
/// # Errors
///
/// Rejects empty field lists, duplicate fields (compared
/// case-insensitively, as SQLite does) and a key that is not a field.
pub fn render_create_table(descriptor: &TableDescriptor) -> Result<Statement> {
    let fields = descriptor.fields();
    if fields.is_empty() {
        return Err(BuildError::EmptyFieldList);
    }
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.to_ascii_lowercase()) {
            return Err(BuildError::DuplicateField(field.clone()));
        }
    }
    if let Some(key) = descriptor.key() {
        if !fields.iter().any(|f| f == key) {
            return Err(BuildError::UnknownKeyField(key.to_string()));
        }
    }

    let columns = fields
        .iter()
        .map(|field| {
            let quoted = quote_ident(field)?;
            Ok(if descriptor.key() == Some(field.as_str()) {
                format!("{quoted} INTEGER PRIMARY KEY AUTOINCREMENT")
            } else {
                format!("{quoted} TEXT")
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Statement::new(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(descriptor.name())?,
        columns.join(", ")
    )))
}

/// Renders `DROP TABLE IF EXISTS <table>`.
pub fn render_drop_table(table: &str) -> Result<Statement> {
    Ok(Statement::new(format!("DROP TABLE IF EXISTS {}", quote_ident(table)?)))
}

/// Renders the statement that removes every row of a table.
pub fn render_truncate(table: &str) -> Result<Statement> {
    render_delete(table, &Constraint::none())
}

/// Renders the statement that restarts a table's `AUTOINCREMENT` counter.
///
/// Only valid when `sqlite_sequence` exists.
pub fn render_reset_sequence(table: &str) -> Result<Statement> {
    quote_ident(table)?;
    Ok(Statement {
        sql: "DELETE FROM sqlite_sequence WHERE name = ?".to_string(),
        args: vec![Value::from(table)],
    })
}

/// Renders `ALTER TABLE <table> ADD COLUMN <field> TEXT`.
pub fn render_add_column(table: &str, field: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER TABLE {} ADD COLUMN {} TEXT",
        quote_ident(table)?,
        quote_ident(field)?
    )))
}

/// Renders `ALTER TABLE <table> RENAME COLUMN <old> TO <new>`.
pub fn render_rename_column(table: &str, old: &str, new: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table)?,
        quote_ident(old)?,
        quote_ident(new)?
    )))
}

/// Renders `ALTER TABLE <table> DROP COLUMN <field>`.
pub fn render_drop_column(table: &str, field: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table)?,
        quote_ident(field)?
    )))
}

/// Renders `ALTER TABLE <from> RENAME TO <to>`.
pub fn render_rename_table(from: &str, to: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(from)?,
        quote_ident(to)?
    )))
}

/// Renders `INSERT INTO <to> (<targets>) SELECT <sources> FROM <from>`.
///
/// `mapping` pairs each source column with the target column it fills.
pub fn render_copy_rows(from: &str, to: &str, mapping: &[(String, String)]) -> Result<Statement> {
    if mapping.is_empty() {
        return Err(BuildError::EmptyFieldList);
    }
    let sources: Vec<&str> = mapping.iter().map(|(s, _)| s.as_str()).collect();
    let targets: Vec<&str> = mapping.iter().map(|(_, t)| t.as_str()).collect();
    Ok(Statement::new(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(to)?,
        quote_list(&targets)?,
        quote_list(&sources)?,
        quote_ident(from)?
    )))
}

/// Renders `CREATE [UNIQUE] INDEX <name> ON <table> (<columns>)`.
pub fn render_create_index(name: &str, table: &str, unique: bool, columns: &[String]) -> Result<Statement> {
    if columns.is_empty() {
        return Err(BuildError::EmptyFieldList);
    }
    Ok(Statement::new(format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        quote_ident(name)?,
        quote_ident(table)?,
        quote_list(columns)?
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_insert() {
        let row = Row::new().with("newsID", "CCC").with("type", "CCCC44");
        let stmt = render_insert("news", &row).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "news" ("newsID", "type") VALUES (?, ?)"#
        );
        assert_eq!(stmt.args, vec![Value::from("CCC"), Value::from("CCCC44")]);
    }

    #[test]
    fn test_render_insert_empty_row_uses_default_values() {
        let stmt = render_insert("t", &Row::new()).unwrap();
        assert_eq!(stmt.sql, r#"INSERT INTO "t" DEFAULT VALUES"#);
        assert!(stmt.args.is_empty());
    }

    #[test]
    fn test_render_select_named_fields() {
        let stmt = render_select("t", &Fields::split("a,b"), &Constraint::none()).unwrap();
        assert_eq!(stmt.sql, r#"SELECT "a", "b" FROM "t""#);
    }

    #[test]
    fn test_render_select_star_field_is_quoted() {
        let stmt = render_select("t", &Fields::named(["*"]), &Constraint::none()).unwrap();
        assert_eq!(stmt.sql, r#"SELECT "*" FROM "t""#);
    }

    #[test]
    fn test_render_select_empty_projection_rejected() {
        let err = render_select("t", &Fields::Named(vec![]), &Constraint::none()).unwrap_err();
        assert_eq!(err, BuildError::EmptyFieldList);
    }

    #[test]
    fn test_render_update_orders_arguments() {
        let row = Row::new().with("name", "B");
        let constraint = Constraint::new("WHERE id = (?)").arg(1);
        let stmt = render_update("users", &row, &constraint).unwrap();
        assert_eq!(stmt.sql, r#"UPDATE "users" SET "name" = ? WHERE id = (?)"#);
        assert_eq!(stmt.args, vec![Value::from("B"), Value::from(1)]);
    }

    #[test]
    fn test_mismatched_constraint_never_renders() {
        let constraint = Constraint::new("WHERE id = ?");
        assert!(matches!(
            render_delete("t", &constraint),
            Err(BuildError::MalformedConstraint(_))
        ));
        assert!(matches!(
            render_count("t", &constraint.clone().arg(1).arg(2)),
            Err(BuildError::MalformedConstraint(_))
        ));
    }

    #[test]
    fn test_render_count_and_delete() {
        let c = Constraint::new("WHERE a = ?").arg("x");
        assert_eq!(
            render_count("t", &c).unwrap().sql,
            r#"SELECT COUNT(*) FROM "t" WHERE a = ?"#
        );
        assert_eq!(render_delete("t", &Constraint::none()).unwrap().sql, r#"DELETE FROM "t""#);
    }

    #[test]
    fn test_render_create_table_with_key() {
        let stmt = render_create_table(&TableDescriptor::new("users", ["id", "name"])).unwrap();
        assert_eq!(
            stmt.sql,
            r#"CREATE TABLE IF NOT EXISTS "users" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "name" TEXT)"#
        );
    }

    #[test]
    fn test_render_create_table_rejects_bad_descriptors() {
        assert_eq!(
            render_create_table(&TableDescriptor::new("t", Vec::<String>::new())).unwrap_err(),
            BuildError::EmptyFieldList
        );
        assert_eq!(
            render_create_table(&TableDescriptor::new("t", ["a", "A"])).unwrap_err(),
            BuildError::DuplicateField("A".into())
        );
        assert_eq!(
            render_create_table(&TableDescriptor::new("t", ["a"]).with_key("id")).unwrap_err(),
            BuildError::UnknownKeyField("id".into())
        );
    }

    #[test]
    fn test_render_copy_rows_maps_columns() {
        let mapping = vec![
            ("id".to_string(), "id".to_string()),
            ("name".to_string(), "label".to_string()),
        ];
        let stmt = render_copy_rows("users", "users_shadow", &mapping).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "users_shadow" ("id", "label") SELECT "id", "name" FROM "users""#
        );
    }

    #[test]
    fn test_render_reset_sequence_binds_table_name() {
        let stmt = render_reset_sequence("users").unwrap();
        assert_eq!(stmt.args, vec![Value::from("users")]);
    }

    #[test]
    fn test_statement_with_args_checks_count() {
        assert!(Statement::with_args("SELECT ?", vec![Value::from(1)]).is_ok());
        assert!(Statement::with_args("SELECT ?", vec![]).is_err());
    }
}
