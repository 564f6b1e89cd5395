use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tablestore::{
    Constraint, Database, DatabaseConfig, Fields, Hooks, NewerVersionPolicy, Row, Value,
};

#[derive(Debug, Parser)]
#[command(name = "tablestore")]
#[command(about = "Inspect and edit tablestore SQLite databases")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    target: Target,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct Target {
    /// Database file path.
    #[arg(long, conflicts_with = "config")]
    db: Option<PathBuf>,
    /// YAML store configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show path, schema version and row counts.
    Status,
    /// List tables.
    Tables,
    /// List the columns of a table.
    Columns(TableArgs),
    /// Print matching rows as JSON.
    Select(SelectArgs),
    /// Count matching rows.
    Count(FilterArgs),
    /// Insert a row and print its id.
    Insert(InsertArgs),
    /// Update matching rows.
    Update(UpdateArgs),
    /// Delete matching rows.
    Delete(FilterArgs),
    /// Create a table from a comma-separated field list.
    CreateTable(CreateTableArgs),
    /// Drop a table.
    DropTable(TableArgs),
    /// Add fields to a table; existing fields are skipped.
    AddFields(FieldsArgs),
    /// Rename a field.
    RenameField(RenameFieldArgs),
    /// Delete fields from a table.
    DeleteFields(FieldsArgs),
    /// Delete every row and restart the key counter.
    Truncate(TableArgs),
    /// Delete the database file and recreate it empty.
    Reset,
}

#[derive(Debug, Args)]
struct TableArgs {
    /// Table name.
    table: String,
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Table name.
    table: String,
    /// Clause appended to the statement (e.g. "WHERE id = ?").
    #[arg(long = "where")]
    clause: Option<String>,
    /// Value bound to the next placeholder; repeat for each one.
    #[arg(long = "arg")]
    args: Vec<String>,
}

#[derive(Debug, Args)]
struct SelectArgs {
    #[command(flatten)]
    filter: FilterArgs,
    /// Comma-separated fields to return (default: all).
    #[arg(long)]
    fields: Option<String>,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Args)]
struct InsertArgs {
    /// Table name.
    table: String,
    /// Field assignments as field=value.
    #[arg(required = true)]
    values: Vec<String>,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    #[command(flatten)]
    filter: FilterArgs,
    /// Field assignments as field=value.
    #[arg(long = "set", required = true)]
    values: Vec<String>,
}

#[derive(Debug, Args)]
struct CreateTableArgs {
    /// Table name.
    table: String,
    /// Comma-separated field names; a leading "id" becomes the row key.
    fields: String,
}

#[derive(Debug, Args)]
struct FieldsArgs {
    /// Table name.
    table: String,
    /// Field names.
    #[arg(required = true)]
    fields: Vec<String>,
}

#[derive(Debug, Args)]
struct RenameFieldArgs {
    /// Table name.
    table: String,
    /// Current field name.
    old: String,
    /// New field name.
    new: String,
}

fn main() {
    let cli = Cli::parse();

    let result = open_database(&cli.target).and_then(|db| match cli.command {
        Command::Status => run_status(&db),
        Command::Tables => run_tables(&db),
        Command::Columns(args) => run_columns(&db, args),
        Command::Select(args) => run_select(&db, args),
        Command::Count(args) => run_count(&db, args),
        Command::Insert(args) => run_insert(&db, args),
        Command::Update(args) => run_update(&db, args),
        Command::Delete(args) => run_delete(&db, args),
        Command::CreateTable(args) => run_create_table(&db, args),
        Command::DropTable(args) => run_drop_table(&db, args),
        Command::AddFields(args) => run_add_fields(&db, args),
        Command::RenameField(args) => run_rename_field(&db, args),
        Command::DeleteFields(args) => run_delete_fields(&db, args),
        Command::Truncate(args) => run_truncate(&db, args),
        Command::Reset => run_reset(&db),
    });

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Opens the target database without migrating it.
///
/// The CLI has no upgrade hook, so the file is opened at whatever version
/// it already has.
fn open_database(target: &Target) -> Result<Database, String> {
    let config = match (&target.config, &target.db) {
        (Some(path), _) => DatabaseConfig::load(path)
            .map_err(|e| format!("Failed to load config '{}': {e}", path.display()))?,
        (None, Some(path)) => DatabaseConfig::for_path(path).map_err(|e| e.to_string())?,
        (None, None) => return Err("Specify --db or --config".to_string()),
    };
    let config = config
        .with_version(0)
        .with_newer_version(NewerVersionPolicy::Accept);
    let path = config.path();
    Database::open_with(config, Hooks::none())
        .map_err(|e| format!("Failed to open database '{}': {e}", path.display()))
}

fn run_status(db: &Database) -> Result<(), String> {
    let version = db.version().map_err(|e| e.to_string())?;
    let tables = db.table_names().map_err(|e| e.to_string())?;
    println!("Database Status:");
    println!("  Path: {}", db.path().display());
    println!("  Schema version: {version}");
    println!("  Tables: {}", tables.len());
    for table in &tables {
        let rows = db
            .count(table, Constraint::none())
            .map_err(|e| format!("Failed to count rows in '{table}': {e}"))?;
        println!("    {table}: {rows} row(s)");
    }
    Ok(())
}

fn run_tables(db: &Database) -> Result<(), String> {
    for table in db.table_names().map_err(|e| e.to_string())? {
        println!("{table}");
    }
    Ok(())
}

fn run_columns(db: &Database, args: TableArgs) -> Result<(), String> {
    let columns = db
        .run(|session| session.columns(&args.table))
        .map_err(|e| e.to_string())?;
    for column in columns {
        let mut line = column.name.clone();
        if !column.decl_type.is_empty() {
            line.push(' ');
            line.push_str(&column.decl_type);
        }
        if column.primary_key > 0 {
            line.push_str(" PRIMARY KEY");
        }
        if column.autoincrement {
            line.push_str(" AUTOINCREMENT");
        }
        if column.not_null {
            line.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            line.push_str(&format!(" DEFAULT {default}"));
        }
        println!("{line}");
    }
    Ok(())
}

fn run_select(db: &Database, args: SelectArgs) -> Result<(), String> {
    let fields = args.fields.as_deref().map(Fields::split).unwrap_or_default();
    let rows = db
        .select(&args.filter.table, fields, constraint(&args.filter))
        .map_err(|e| e.to_string())?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&rows)
    } else {
        serde_json::to_string(&rows)
    }
    .map_err(|e| format!("Failed to serialize rows: {e}"))?;
    println!("{json}");
    Ok(())
}

fn run_count(db: &Database, args: FilterArgs) -> Result<(), String> {
    let count = db
        .count(&args.table, constraint(&args))
        .map_err(|e| e.to_string())?;
    println!("{count}");
    Ok(())
}

fn run_insert(db: &Database, args: InsertArgs) -> Result<(), String> {
    let row = parse_assignments(&args.values)?;
    let id = db.try_insert(&args.table, &row).map_err(|e| e.to_string())?;
    println!("{id}");
    Ok(())
}

fn run_update(db: &Database, args: UpdateArgs) -> Result<(), String> {
    let row = parse_assignments(&args.values)?;
    let changed = db
        .try_update(&args.filter.table, &row, constraint(&args.filter))
        .map_err(|e| e.to_string())?;
    println!("Updated {changed} row(s).");
    Ok(())
}

fn run_delete(db: &Database, args: FilterArgs) -> Result<(), String> {
    let removed = db
        .try_delete(&args.table, constraint(&args))
        .map_err(|e| e.to_string())?;
    println!("Deleted {removed} row(s).");
    Ok(())
}

fn run_create_table(db: &Database, args: CreateTableArgs) -> Result<(), String> {
    db.create_table_from_string(&args.table, &args.fields)
        .map_err(|e| e.to_string())?;
    println!("Created table '{}'.", args.table);
    Ok(())
}

fn run_drop_table(db: &Database, args: TableArgs) -> Result<(), String> {
    db.drop_table(&args.table).map_err(|e| e.to_string())?;
    println!("Dropped table '{}'.", args.table);
    Ok(())
}

fn run_add_fields(db: &Database, args: FieldsArgs) -> Result<(), String> {
    db.add_fields(&args.table, &args.fields)
        .map_err(|e| e.to_string())?;
    println!("Table '{}' now has: {}", args.table, field_list(db, &args.table)?);
    Ok(())
}

fn run_rename_field(db: &Database, args: RenameFieldArgs) -> Result<(), String> {
    db.rename_field(&args.table, &args.old, &args.new)
        .map_err(|e| e.to_string())?;
    println!("Table '{}' now has: {}", args.table, field_list(db, &args.table)?);
    Ok(())
}

fn run_delete_fields(db: &Database, args: FieldsArgs) -> Result<(), String> {
    db.delete_fields(&args.table, &args.fields)
        .map_err(|e| e.to_string())?;
    println!("Table '{}' now has: {}", args.table, field_list(db, &args.table)?);
    Ok(())
}

fn run_truncate(db: &Database, args: TableArgs) -> Result<(), String> {
    db.try_truncate(&args.table).map_err(|e| e.to_string())?;
    println!("Truncated table '{}'.", args.table);
    Ok(())
}

fn run_reset(db: &Database) -> Result<(), String> {
    db.reset().map_err(|e| e.to_string())?;
    println!("Reset database '{}'.", db.path().display());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Builds a constraint from `--where` and `--arg`; arguments bind as text.
fn constraint(args: &FilterArgs) -> Constraint {
    match &args.clause {
        Some(clause) => Constraint::with_args(clause.as_str(), args.args.iter().map(String::as_str)),
        None if args.args.is_empty() => Constraint::none(),
        // Arguments without a clause are reported as malformed.
        None => Constraint::with_args("", args.args.iter().map(String::as_str)),
    }
}

/// Parses `field=value` pairs into a row. Values bind as text.
fn parse_assignments(values: &[String]) -> Result<Row, String> {
    values
        .iter()
        .map(|pair| {
            let (field, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Expected field=value, got '{pair}'"))?;
            let field = field.trim();
            if field.is_empty() {
                return Err(format!("Missing field name in '{pair}'"));
            }
            Ok((field.to_string(), Value::from(value)))
        })
        .collect()
}

fn field_list(db: &Database, table: &str) -> Result<String, String> {
    let columns = db
        .run(|session| session.columns(table))
        .map_err(|e| e.to_string())?;
    Ok(columns
        .into_iter()
        .map(|c| c.name)
        .collect::<Vec<_>>()
        .join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assignments() {
        let row = parse_assignments(&["name=A".to_string(), "note=x=y".to_string()]).unwrap();
        assert_eq!(row.get("name"), Some(&Value::from("A")));
        assert_eq!(row.get("note"), Some(&Value::from("x=y")));
        assert!(parse_assignments(&["novalue".to_string()]).is_err());
        assert!(parse_assignments(&["=v".to_string()]).is_err());
    }

    #[test]
    fn test_constraint_without_clause_is_malformed() {
        let args = FilterArgs {
            table: "t".to_string(),
            clause: None,
            args: vec!["1".to_string()],
        };
        assert!(constraint(&args).validate().is_err());
        let args = FilterArgs {
            table: "t".to_string(),
            clause: Some("WHERE id = ?".to_string()),
            args: vec!["1".to_string()],
        };
        assert!(constraint(&args).validate().is_ok());
    }
}
