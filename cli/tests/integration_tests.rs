use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tablestore::{Database, DatabaseConfig, Hooks, TableDescriptor};

fn tablestore(db: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tablestore"))
        .arg("--db")
        .arg(db)
        .args(args)
        .output()
        .expect("failed to run tablestore")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Creates a database at version 2 with a `users(id, name)` table.
fn seeded_db(dir: &tempfile::TempDir) -> PathBuf {
    let config = DatabaseConfig::new("app.sqlite", dir.path()).with_version(2);
    let path = config.path();
    let hooks = Hooks::new(|session, _, _| {
        session.create_table(&TableDescriptor::new("users", ["id", "name"]))
    });
    let db = Database::open_with(config, hooks).unwrap();
    db.close().unwrap();
    path
}

#[test]
fn status_reports_version_and_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let output = tablestore(&db, &["insert", "users", "name=A"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = tablestore(&db, &["status"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.contains("Schema version: 2"), "{text}");
    assert!(text.contains("users: 1 row(s)"), "{text}");
}

#[test]
fn crud_roundtrip_through_cli() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let output = tablestore(&db, &["insert", "users", "name=A"]);
    assert_eq!(stdout(&output).trim(), "1");

    let output = tablestore(
        &db,
        &["update", "users", "--set", "name=B", "--where", "WHERE id = ?", "--arg", "1"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = tablestore(&db, &["select", "users", "--where", "WHERE id = ?", "--arg", "1"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let rows: serde_json::Value = serde_json::from_str(stdout(&output).trim()).unwrap();
    assert_eq!(rows, serde_json::json!([{"id": 1, "name": "B"}]));

    let output = tablestore(&db, &["delete", "users", "--where", "WHERE id = ?", "--arg", "1"]);
    assert!(stdout(&output).contains("Deleted 1 row(s)."));

    let output = tablestore(&db, &["count", "users"]);
    assert_eq!(stdout(&output).trim(), "0");
}

#[test]
fn structural_commands_change_columns() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("fresh.sqlite");

    let output = tablestore(&db, &["create-table", "news", "id,title,body"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = tablestore(&db, &["add-fields", "news", "author", "title"]);
    assert!(stdout(&output).contains("id, title, body, author"));

    let output = tablestore(&db, &["rename-field", "news", "body", "text"]);
    assert!(stdout(&output).contains("id, title, text, author"));

    let output = tablestore(&db, &["delete-fields", "news", "author"]);
    assert!(stdout(&output).contains("id, title, text"));

    let output = tablestore(&db, &["columns", "news"]);
    let text = stdout(&output);
    assert!(text.lines().next().unwrap().starts_with("id INTEGER PRIMARY KEY AUTOINCREMENT"));
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn malformed_constraint_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let output = tablestore(&db, &["count", "users", "--where", "WHERE id = ? AND name = ?", "--arg", "1"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("malformed constraint"));
}

#[test]
fn cli_does_not_migrate_or_downgrade() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let output = tablestore(&db, &["tables"]);
    assert_eq!(stdout(&output).trim(), "users");

    let config = DatabaseConfig::for_path(&db).unwrap().with_version(2);
    let reopened = Database::open_with(config, Hooks::none()).unwrap();
    assert_eq!(reopened.version().unwrap(), 2);
}

#[test]
fn reset_removes_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db = seeded_db(&dir);

    let output = tablestore(&db, &["reset"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let output = tablestore(&db, &["tables"]);
    assert_eq!(stdout(&output).trim(), "");
    let output = tablestore(&db, &["count", "users"]);
    assert!(!output.status.success());
}

#[test]
fn config_file_selects_database() {
    let dir = tempfile::tempdir().unwrap();
    seeded_db(&dir);
    let yaml = dir.path().join("store.yml");
    DatabaseConfig::new("app.sqlite", dir.path()).save(&yaml).unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_tablestore"))
        .arg("--config")
        .arg(&yaml)
        .arg("tables")
        .output()
        .expect("failed to run tablestore");
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "users");
}

#[test]
fn missing_target_is_an_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_tablestore"))
        .arg("tables")
        .output()
        .expect("failed to run tablestore");
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Specify --db or --config"));
}
