//! Versioned SQLite storage with a generic CRUD surface.
//!
//! This crate manages one SQLite file per [`Database`]: it opens or creates
//! the file, brings its schema to the requested version through an upgrade
//! hook, and exposes insert/select/update/delete/count plus structural
//! operations (create and drop tables, add, rename and delete columns) so
//! callers never write SQL for routine work.
//!
//! # Architecture
//!
//! - **`queue`**: [`ExecutionQueue`], the single connection behind a mutex
//! - **`session`**: [`Session`], CRUD and DDL on the locked connection
//! - **`rebuild`**: native or shadow-table column rename/delete
//! - **`migration`**: `user_version` tracking, [`Hooks`], [`State`]
//! - **`database`**: [`Database`], lifecycle and convenience forms
//! - **`config`**: [`DatabaseConfig`], loadable from YAML
//! - **`convert`**: [`Value`] ↔ SQLite conversion
//!
//! SQL text comes from [`tablestore_core::statement`]; every value is bound,
//! never interpolated.
//!
//! # Quick start
//!
//! ```no_run
//! use tablestore::{Constraint, Database, DatabaseConfig, Fields, Hooks, Row, TableDescriptor};
//!
//! let hooks = Hooks::new(|session, from, _to| {
//!     if from < 1 {
//!         session.create_table(&TableDescriptor::new("users", ["id", "name"]))?;
//!     }
//!     if from < 2 {
//!         session.add_fields("users", &["email"])?;
//!     }
//!     Ok(())
//! });
//! let db = Database::open_with(DatabaseConfig::new("app.sqlite", "data").with_version(2), hooks)
//!     .unwrap();
//!
//! let id = db.insert("users", &Row::new().with("name", "A"));
//! let rows = db
//!     .select("users", Fields::All, Constraint::new("WHERE id = (?)").arg(id))
//!     .unwrap();
//! println!("{rows:?}");
//! ```
//!
//! # Concurrency
//!
//! `Database` is `Send + Sync`. Calls from any thread are serialized; a
//! [`Database::transaction`] holds the connection until it commits or
//! rolls back.

mod config;
mod convert;
mod database;
mod error;
mod migration;
mod queue;
mod rebuild;
mod session;

pub use config::{
    AlterStrategy, ConnectionOptions, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_VERSION, DatabaseConfig,
    JournalMode, NewerVersionPolicy,
};
pub use database::Database;
pub use error::{Result, StoreError};
pub use migration::{FailureFn, Hooks, MigrationReport, OpenFn, State, UpgradeFn};
pub use queue::{ExecutionQueue, Operation, Outcome};
pub use rebuild::AlterCapabilities;
pub use session::Session;
pub use tablestore_core::{ColumnDef, Constraint, Fields, Row, Statement, TableDescriptor, Value};
