//! Error types for store operations.
//!
//! Provides a unified error type covering opening, migration, statement
//! rendering, structural changes and execution failures.

use std::path::PathBuf;

use tablestore_core::BuildError;
use thiserror::Error;

/// Errors that can occur while opening or using a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened or created.
    #[error("failed to open database '{}': {reason}", path.display())]
    OpenFailure {
        /// Resolved database file path.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },

    /// The upgrade hook failed or panicked; nothing was committed.
    #[error("migration from version {from} to {to} failed: {reason}")]
    MigrationFailure {
        /// Version stored in the file.
        from: u32,
        /// Version that was requested.
        to: u32,
        /// Underlying cause.
        reason: String,
    },

    /// The file was written by a newer schema version than requested.
    #[error("database version {found} is newer than supported version {supported}")]
    IncompatibleVersion {
        /// Version stored in the file.
        found: u32,
        /// Version that was requested.
        supported: u32,
    },

    /// Statement could not be rendered (malformed constraint, bad identifier, ...).
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Structural operation on a table that does not exist.
    #[error("no such table: {0}")]
    UnknownTable(String),

    /// Structural operation on a column the table does not have.
    #[error("table '{table}' has no field '{field}'")]
    UnknownField {
        /// Table name.
        table: String,
        /// Missing field.
        field: String,
    },

    /// Rename target collides with an existing column.
    #[error("table '{table}' already has a field '{field}'")]
    DuplicateField {
        /// Table name.
        table: String,
        /// Colliding field.
        field: String,
    },

    /// Deleting the requested fields would leave the table without columns.
    #[error("cannot delete every field of table '{0}'")]
    EmptyTable(String),

    /// A table that must be created already exists.
    #[error("table already exists: {0}")]
    TableExists(String),

    /// A table rebuild would leave dangling foreign key references.
    #[error("foreign key check failed after rebuilding '{0}'")]
    ForeignKeyViolation(String),

    /// SQLite reported an error while executing a statement.
    #[error("execution error: {0}")]
    ExecutionFailure(#[from] rusqlite::Error),

    /// The database is not open (never opened, closed, or failed to open).
    #[error("database is closed")]
    Closed,

    /// Filesystem failure outside of SQLite (directory creation, reset).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl StoreError {
    /// Returns `true` if this is a malformed constraint rejected before execution.
    pub fn is_malformed_constraint(&self) -> bool {
        matches!(self, StoreError::Build(BuildError::MalformedConstraint(_)))
    }
}

/// Convenience alias for results with [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;
