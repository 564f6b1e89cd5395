//! Serialized execution against a single connection.
//!
//! [`ExecutionQueue`] owns the only [`Connection`] to a database file and
//! hands it out one operation at a time. Callers on any thread may submit
//! work concurrently; the mutex guarantees that statements from two
//! operations never interleave. Submission order is not preserved, mutual
//! exclusion is.
//!
//! Work is submitted either as closures receiving a [`Session`]
//! ([`run`](ExecutionQueue::run), [`transaction`](ExecutionQueue::transaction))
//! or as plain data ([`Operation`]) through
//! [`execute`](ExecutionQueue::execute).

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, TransactionBehavior};
use tablestore_core::{Row, Statement};
use tracing::debug;

use crate::config::ConnectionOptions;
use crate::error::{Result, StoreError};
use crate::rebuild::AlterCapabilities;
use crate::session::Session;

/// One unit of work for the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// A single statement run on its own.
    Statement(Statement),
    /// Statements that commit together or not at all.
    Transaction(Vec<Statement>),
}

/// Result of executing an [`Operation`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Outcome {
    /// Rows changed by data-modifying statements.
    pub changes: usize,
    /// Row id of the most recent successful insert on the connection.
    pub last_insert_rowid: i64,
    /// Rows returned by row-producing statements.
    pub rows: Vec<Row>,
}

impl Outcome {
    fn merge(&mut self, other: Outcome) {
        self.changes += other.changes;
        self.last_insert_rowid = other.last_insert_rowid;
        self.rows.extend(other.rows);
    }
}

struct Slot {
    conn: Connection,
    capabilities: AlterCapabilities,
}

/// Mutual-exclusion wrapper around the store's connection.
///
/// The queue starts closed. [`open`](Self::open) establishes the connection
/// and [`close`](Self::close) waits for the in-flight operation before
/// releasing it; any submission while closed fails with
/// [`StoreError::Closed`]. A queue can be reopened after closing.
///
/// A panic inside an operation does not wedge the queue: the panicking
/// transaction rolls back while unwinding and the lock is recovered.
///
/// # Examples
///
/// ```no_run
/// use tablestore::{ConnectionOptions, ExecutionQueue, Operation};
/// use tablestore_core::Statement;
///
/// let queue = ExecutionQueue::new();
/// queue.open("data.sqlite".as_ref(), &ConnectionOptions::default()).unwrap();
/// queue
///     .execute(&Operation::Transaction(vec![
///         Statement::new("CREATE TABLE t (a)"),
///         Statement::new("INSERT INTO t VALUES (1)"),
///     ]))
///     .unwrap();
/// queue.close().unwrap();
/// ```
pub struct ExecutionQueue {
    slot: Mutex<Option<Slot>>,
}

impl Default for ExecutionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionQueue")
            .field("open", &self.is_open())
            .finish()
    }
}

impl ExecutionQueue {
    /// Creates a closed queue.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens (or creates) the database file and configures the connection.
    ///
    /// Any previously open connection is closed first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OpenFailure`] if the file cannot be opened, is
    /// not a database, or rejects the connection settings.
    pub fn open(&self, path: &Path, options: &ConnectionOptions) -> Result<()> {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            close_connection(previous.conn)?;
        }

        let open_failure = |e: rusqlite::Error| StoreError::OpenFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let conn = Connection::open(path).map_err(open_failure)?;
        configure(&conn, options).map_err(open_failure)?;
        let capabilities = AlterCapabilities::detect(&conn)?.resolve(options.alter_strategy);
        debug!(path = %path.display(), ?capabilities, "Connection opened");

        *slot = Some(Slot { conn, capabilities });
        Ok(())
    }

    /// Returns `true` while a connection is held.
    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Waits for the in-flight operation, then releases the connection.
    ///
    /// Closing an already closed queue is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            close_connection(previous.conn)?;
            debug!("Connection closed");
        }
        Ok(())
    }

    /// ALTER capabilities resolved when the connection was opened.
    pub fn capabilities(&self) -> Result<AlterCapabilities> {
        self.lock()
            .as_ref()
            .map(|slot| slot.capabilities)
            .ok_or(StoreError::Closed)
    }

    /// Runs `f` with exclusive access to the connection, outside a transaction.
    pub fn run<T>(&self, f: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        let guard = self.lock();
        let slot = guard.as_ref().ok_or(StoreError::Closed)?;
        f(&Session::new(&slot.conn, slot.capabilities))
    }

    /// Runs `f` inside a deferred transaction.
    ///
    /// Commits if `f` returns `Ok`, rolls back otherwise.
    pub fn transaction<T>(&self, f: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        self.transaction_with(TransactionBehavior::Deferred, f)
    }

    /// Runs `f` inside a transaction with the given locking behavior.
    pub fn transaction_with<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Session<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock();
        let slot = guard.as_mut().ok_or(StoreError::Closed)?;
        let capabilities = slot.capabilities;
        let tx = slot.conn.transaction_with_behavior(behavior)?;
        let value = match f(&Session::new(&tx, capabilities)) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "Rolling back transaction");
                return Err(err);
            }
        };
        tx.commit()?;
        Ok(value)
    }

    /// Executes an [`Operation`].
    ///
    /// A [`Operation::Transaction`] either applies every statement or, on
    /// the first failure, rolls back all of them before returning the error.
    pub fn execute(&self, operation: &Operation) -> Result<Outcome> {
        match operation {
            Operation::Statement(statement) => self.run(|session| session.execute(statement)),
            Operation::Transaction(statements) => self.transaction(|session| {
                let mut total = Outcome::default();
                for statement in statements {
                    total.merge(session.execute(statement)?);
                }
                Ok(total)
            }),
        }
    }
}

fn configure(conn: &Connection, options: &ConnectionOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    if let Some(mode) = options.journal_mode {
        let _: String =
            conn.pragma_update_and_check(None, "journal_mode", mode.as_str(), |row| row.get(0))?;
    }
    conn.pragma_update(None, "foreign_keys", options.foreign_keys)?;
    // Fails for files that are not SQLite databases.
    conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))?;
    Ok(())
}

fn close_connection(conn: Connection) -> Result<()> {
    conn.close().map_err(|(_, err)| StoreError::ExecutionFailure(err))
}
