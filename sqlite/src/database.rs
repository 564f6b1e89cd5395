//! Lifecycle manager and CRUD façade for one database file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tablestore_core::{BuildError, Constraint, Fields, Row, TableDescriptor, split_field_list};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{Result, StoreError};
use crate::migration::{self, Hooks, MigrationReport, State};
use crate::queue::{ExecutionQueue, Operation, Outcome};
use crate::rebuild::AlterCapabilities;
use crate::session::Session;

/// Journal files SQLite may leave next to the database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// A versioned SQLite database with a generic CRUD surface.
///
/// `Database` is `Send + Sync`; share it between threads with an `Arc`.
/// Every call is serialized through one connection. Calls made while the
/// database is not [`State::Ready`] fail with [`StoreError::Closed`].
///
/// # Examples
///
/// ```no_run
/// use tablestore::{Database, DatabaseConfig, Hooks};
/// use tablestore_core::{Constraint, Fields, Row, TableDescriptor};
///
/// let hooks = Hooks::new(|session, _from, _to| {
///     session.create_table(&TableDescriptor::new("users", ["id", "name"]))
/// });
/// let db = Database::open_with(DatabaseConfig::new("app.sqlite", "data"), hooks).unwrap();
///
/// let id = db.insert("users", &Row::new().with("name", "A"));
/// db.update("users", &Row::new().with("name", "B"), Constraint::new("WHERE id = (?)").arg(id));
/// let rows = db.select("users", Fields::All, Constraint::none()).unwrap();
/// assert_eq!(rows[0].get("name").and_then(|v| v.as_str()), Some("B"));
/// ```
pub struct Database {
    config: DatabaseConfig,
    hooks: Hooks,
    queue: ExecutionQueue,
    state: Mutex<State>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("state", &self.state())
            .finish()
    }
}

impl Database {
    /// Creates a closed database; nothing touches the disk until [`open`](Self::open).
    pub fn new(config: DatabaseConfig, hooks: Hooks) -> Self {
        Self {
            config,
            hooks,
            queue: ExecutionQueue::new(),
            state: Mutex::new(State::Closed),
        }
    }

    /// Creates and opens a database.
    pub fn open_with(config: DatabaseConfig, hooks: Hooks) -> Result<Self> {
        let db = Self::new(config, hooks);
        db.open()?;
        Ok(db)
    }

    fn set_state(&self, state: State) {
        debug!(path = %self.path().display(), %state, "State changed");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when the database accepts calls.
    pub fn is_ready(&self) -> bool {
        self.state() == State::Ready
    }

    /// Full path of the database file.
    pub fn path(&self) -> PathBuf {
        self.config.path()
    }

    /// Configuration this database was created with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Opens the file, creating it and its directory if needed, and brings
    /// the schema to the configured version.
    ///
    /// Fires the open hook on success and the failure hook on error.
    /// Opening a database that is already ready does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OpenFailure`], [`StoreError::MigrationFailure`]
    /// or [`StoreError::IncompatibleVersion`]; the database is left in
    /// [`State::OpenFailed`].
    pub fn open(&self) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.set_state(State::Opening);
        match self.establish() {
            Ok(report) => {
                self.set_state(State::Ready);
                info!(
                    path = %self.path().display(),
                    version = report.to,
                    migrated = report.migrated,
                    "Database ready"
                );
                self.hooks.opened(self);
                Ok(())
            }
            Err(err) => {
                if let Err(close_err) = self.queue.close() {
                    debug!(error = %close_err, "Failed to close after open failure");
                }
                self.set_state(State::OpenFailed);
                warn!(path = %self.path().display(), error = %err, "Database failed to open");
                self.hooks.failed(self, &err);
                Err(err)
            }
        }
    }

    fn establish(&self) -> Result<MigrationReport> {
        self.config.validate()?;
        let path = self.path();
        if !self.config.directory.as_os_str().is_empty() {
            fs::create_dir_all(&self.config.directory).map_err(|e| StoreError::OpenFailure {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        }
        self.queue.open(&path, &self.config.connection_options())?;
        migration::migrate(
            &self.queue,
            self.config.version,
            self.config.newer_version,
            self.hooks.upgrade(),
            |state| self.set_state(state),
        )
    }

    /// Waits for the in-flight call and releases the connection.
    pub fn close(&self) -> Result<()> {
        self.queue.close()?;
        self.set_state(State::Closed);
        info!(path = %self.path().display(), "Database closed");
        Ok(())
    }

    /// Deletes the database file and opens a fresh one.
    ///
    /// The main file is removed first; if that fails the journal files are
    /// left alone, the error is returned and the database stays closed. The
    /// upgrade hook then runs from version 0.
    pub fn reset(&self) -> Result<()> {
        info!(path = %self.path().display(), "Resetting database");
        self.close()?;
        let path = self.path();
        remove_if_present(&path)?;
        for suffix in SIDECAR_SUFFIXES {
            remove_if_present(&sidecar(&path, suffix))?;
        }
        self.open()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    /// Schema version stored in the file.
    pub fn version(&self) -> Result<u32> {
        self.run(|s| s.user_version())
    }

    /// ALTER capabilities in effect for structural changes.
    pub fn capabilities(&self) -> Result<AlterCapabilities> {
        self.ensure_ready()?;
        self.queue.capabilities()
    }

    /// Runs `f` in a transaction; commits on `Ok`, rolls back on `Err`.
    pub fn transaction<T>(&self, f: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        self.ensure_ready()?;
        self.queue.transaction(f)
    }

    /// Runs `f` with exclusive access to the connection, outside a transaction.
    pub fn run<T>(&self, f: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        self.ensure_ready()?;
        self.queue.run(f)
    }

    /// Executes a raw [`Operation`].
    pub fn execute(&self, operation: &Operation) -> Result<Outcome> {
        self.ensure_ready()?;
        self.queue.execute(operation)
    }

    /// Inserts a row and returns its row id.
    pub fn try_insert(&self, table: &str, row: &Row) -> Result<i64> {
        self.run(|s| s.insert(table, row))
    }

    /// Inserts a row and returns its row id, or `0` on failure.
    pub fn insert(&self, table: &str, row: &Row) -> i64 {
        self.try_insert(table, row).unwrap_or_else(|err| {
            warn!(table, error = %err, "Insert failed");
            0
        })
    }

    /// Updates matching rows, returning how many changed.
    pub fn try_update(&self, table: &str, row: &Row, constraint: Constraint) -> Result<usize> {
        self.run(|s| s.update(table, row, constraint))
    }

    /// Updates matching rows; `false` if the statement failed.
    pub fn update(&self, table: &str, row: &Row, constraint: Constraint) -> bool {
        report("Update", table, self.try_update(table, row, constraint))
    }

    /// Deletes matching rows, returning how many were removed.
    pub fn try_delete(&self, table: &str, constraint: Constraint) -> Result<usize> {
        self.run(|s| s.delete(table, constraint))
    }

    /// Deletes matching rows; `false` if the statement failed.
    pub fn delete(&self, table: &str, constraint: Constraint) -> bool {
        report("Delete", table, self.try_delete(table, constraint))
    }

    /// Removes every row and restarts the key counter.
    pub fn try_truncate(&self, table: &str) -> Result<()> {
        self.run(|s| s.truncate(table))
    }

    /// Removes every row; `false` on failure.
    pub fn truncate(&self, table: &str) -> bool {
        report("Truncate", table, self.try_truncate(table))
    }

    /// Selects matching rows. No match is `Ok` with an empty list.
    pub fn select(&self, table: &str, fields: Fields, constraint: Constraint) -> Result<Vec<Row>> {
        self.run(|s| s.select(table, fields, constraint))
    }

    /// Counts matching rows.
    pub fn count(&self, table: &str, constraint: Constraint) -> Result<u64> {
        self.run(|s| s.count(table, constraint))
    }

    /// Names of all user tables, sorted.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.run(|s| s.table_names())
    }

    /// Returns `true` if the table exists.
    pub fn table_exists(&self, table: &str) -> Result<bool> {
        self.run(|s| s.table_exists(table))
    }

    /// Creates tables atomically; existing tables are left alone.
    pub fn create_tables(&self, descriptors: &[TableDescriptor]) -> Result<()> {
        self.run(|s| s.create_tables(descriptors))
    }

    /// Creates tables from parallel lists of names and field lists.
    pub fn create_tables_from_lists<N, F>(&self, names: &[N], field_lists: &[Vec<F>]) -> Result<()>
    where
        N: AsRef<str>,
        F: AsRef<str>,
    {
        check_lengths(names.len(), field_lists.len())?;
        let descriptors: Vec<TableDescriptor> = names
            .iter()
            .zip(field_lists)
            .map(|(name, fields)| TableDescriptor::new(name.as_ref(), fields.iter().map(|f| f.as_ref())))
            .collect();
        self.create_tables(&descriptors)
    }

    /// Creates tables from names and comma-separated field strings.
    ///
    /// ```no_run
    /// # let db: tablestore::Database = unimplemented!();
    /// db.create_tables_from_strings(&["users", "news"], &["id, name", "id, title, body"])
    ///     .unwrap();
    /// ```
    pub fn create_tables_from_strings<N, F>(&self, names: &[N], field_strings: &[F]) -> Result<()>
    where
        N: AsRef<str>,
        F: AsRef<str>,
    {
        check_lengths(names.len(), field_strings.len())?;
        let descriptors: Vec<TableDescriptor> = names
            .iter()
            .zip(field_strings)
            .map(|(name, fields)| TableDescriptor::from_field_string(name.as_ref(), fields.as_ref()))
            .collect();
        self.create_tables(&descriptors)
    }

    /// Creates one table from its field names.
    pub fn create_table<S: AsRef<str>>(&self, name: &str, fields: &[S]) -> Result<()> {
        self.create_tables(&[TableDescriptor::new(name, fields.iter().map(|f| f.as_ref()))])
    }

    /// Creates one table from a comma-separated field string.
    pub fn create_table_from_string(&self, name: &str, fields: &str) -> Result<()> {
        self.create_table(name, &split_field_list(fields))
    }

    /// Drops a table if it exists.
    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.run(|s| s.drop_table(table))
    }

    /// Adds `TEXT` columns, skipping ones that already exist.
    pub fn add_fields<S: AsRef<str>>(&self, table: &str, fields: &[S]) -> Result<()> {
        self.run(|s| s.add_fields(table, fields))
    }

    /// Renames a column.
    pub fn rename_field(&self, table: &str, old: &str, new: &str) -> Result<()> {
        self.run(|s| s.rename_field(table, old, new))
    }

    /// Deletes columns.
    pub fn delete_fields<S: AsRef<str>>(&self, table: &str, fields: &[S]) -> Result<()> {
        self.run(|s| s.delete_fields(table, fields))
    }
}

fn report<T>(action: &str, table: &str, result: Result<T>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => {
            warn!(table, error = %err, "{action} failed");
            false
        }
    }
}

fn check_lengths(tables: usize, field_lists: usize) -> Result<()> {
    if tables != field_lists {
        return Err(BuildError::TableFieldMismatch { tables, field_lists }.into());
    }
    Ok(())
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed file");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, OnceLock};

    use super::*;

    fn config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig::new("db.sqlite", dir.path().join("nested"))
    }

    #[test]
    fn test_calls_before_open_are_closed() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(config(&dir), Hooks::none());
        assert_eq!(db.state(), State::Closed);
        assert!(matches!(db.count("t", Constraint::none()), Err(StoreError::Closed)));
        assert_eq!(db.insert("t", &Row::new().with("a", 1)), 0);
        assert!(!db.truncate("t"));
        assert!(!db.path().exists());
    }

    #[test]
    fn test_open_creates_directory_and_sets_version() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(config(&dir).with_version(4), Hooks::none()).unwrap();
        assert!(db.is_ready());
        assert!(db.path().exists());
        assert_eq!(db.version().unwrap(), 4);
        db.close().unwrap();
        assert_eq!(db.state(), State::Closed);
        assert!(matches!(db.version(), Err(StoreError::Closed)));
    }

    #[test]
    fn test_open_hook_can_use_database() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let hooks = Hooks::new(|s, _, _| s.create_table(&TableDescriptor::new("t", ["id", "v"])))
            .on_open(move |db| {
                db.insert("t", &Row::new().with("v", "from hook"));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let db = Database::open_with(config(&dir), hooks).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(db.count("t", Constraint::none()).unwrap(), 1);

        // Already ready: no second open, no second hook call.
        db.open().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_upgrade_hook_cannot_reenter_database() {
        let dir = tempfile::tempdir().unwrap();
        let slot: Arc<OnceLock<Arc<Database>>> = Arc::new(OnceLock::new());
        let registered = Arc::clone(&slot);
        let hooks = Hooks::new(move |_, _, _| {
            // Refused instead of waiting on the lock the migration holds.
            let db = registered.get().unwrap();
            assert_eq!(db.state(), State::Migrating);
            assert!(matches!(db.count("t", Constraint::none()), Err(StoreError::Closed)));
            Ok(())
        });
        let db = Arc::new(Database::new(config(&dir), hooks));
        slot.set(Arc::clone(&db)).unwrap();
        db.open().unwrap();
        assert!(db.is_ready());
    }

    #[test]
    fn test_failed_open_fires_failure_hook_once() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hooks = Hooks::new(|_, _, _| Err(StoreError::Config("broken upgrade".to_string())))
            .on_open_failure(move |db, err| {
                assert_eq!(db.state(), State::OpenFailed);
                assert!(matches!(err, StoreError::MigrationFailure { .. }));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let db = Database::new(config(&dir), hooks);
        assert!(db.open().is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(db.state(), State::OpenFailed);
        assert!(matches!(db.table_names(), Err(StoreError::Closed)));
    }

    #[test]
    fn test_reset_removes_file_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(config(&dir).with_version(2), Hooks::none()).unwrap();
        db.create_table("scratch", &["a"]).unwrap();

        let stale = sidecar(&db.path(), "-journal");
        fs::write(&stale, b"stale").unwrap();

        db.reset().unwrap();
        assert!(!stale.exists());
        assert!(db.is_ready());
        assert!(!db.table_exists("scratch").unwrap());
        assert_eq!(db.version().unwrap(), 2);
    }

    #[test]
    fn test_create_tables_from_strings_checks_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(config(&dir), Hooks::none()).unwrap();
        let err = db
            .create_tables_from_strings(&["a", "b"], &["x"])
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Build(BuildError::TableFieldMismatch {
                tables: 2,
                field_lists: 1
            })
        ));

        db.create_tables_from_strings(&["a", "b"], &["id, x", "y,z"])
            .unwrap();
        db.create_tables_from_lists(&["c"], &[vec!["p", "q"]]).unwrap();
        assert_eq!(db.table_names().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(db.try_insert("a", &Row::new().with("x", "1")).unwrap(), 1);
    }

    #[test]
    fn test_convenience_forms_collapse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_with(config(&dir), Hooks::none()).unwrap();
        db.create_table("t", &["id", "v"]).unwrap();

        assert!(db.update("t", &Row::new().with("v", "x"), Constraint::none()));
        assert!(!db.update("missing", &Row::new().with("v", "x"), Constraint::none()));
        assert!(!db.delete("t", Constraint::new("WHERE id = ?")));
        assert!(db.delete("t", Constraint::new("WHERE id = ?").arg(1)));
        assert_eq!(db.insert("missing", &Row::new().with("v", "x")), 0);
    }

    #[test]
    fn test_database_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Database>();
    }
}
