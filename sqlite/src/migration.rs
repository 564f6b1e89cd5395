//! Versioned schema migration run while a database opens.
//!
//! The schema version lives in `PRAGMA user_version`. When the stored
//! version is behind the requested one, the upgrade hook runs once inside a
//! single `IMMEDIATE` transaction that also writes the new version, so a
//! crash or failure leaves either the old version with the old schema or
//! the new version with every change applied.
//!
//! Foreign key enforcement is switched off for the duration of the upgrade
//! (as SQLite recommends for schema changes) and the whole database is
//! checked with `PRAGMA foreign_key_check` before committing.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rusqlite::TransactionBehavior;
use tracing::{info, warn};

use crate::config::NewerVersionPolicy;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::queue::ExecutionQueue;
use crate::rebuild::foreign_keys_enabled;
use crate::session::Session;

/// Lifecycle state of a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No connection is held.
    Closed,
    /// The file is being opened and the connection configured.
    Opening,
    /// The stored version is being compared with the requested one.
    MigrationCheck,
    /// The upgrade hook is running.
    Migrating,
    /// Open and usable.
    Ready,
    /// The last open attempt failed.
    OpenFailed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "closed",
            State::Opening => "opening",
            State::MigrationCheck => "migration-check",
            State::Migrating => "migrating",
            State::Ready => "ready",
            State::OpenFailed => "open-failed",
        };
        f.write_str(name)
    }
}

/// Upgrade hook: receives a session inside the migration transaction and
/// the stored and requested versions.
pub type UpgradeFn = dyn Fn(&Session<'_>, u32, u32) -> Result<()> + Send + Sync;

/// Called after a successful open.
pub type OpenFn = dyn Fn(&Database) + Send + Sync;

/// Called once per failed open with the error that caused it.
pub type FailureFn = dyn Fn(&Database, &StoreError) + Send + Sync;

/// Lifecycle callbacks, fixed when the [`Database`] is created.
///
/// # Examples
///
/// ```
/// use tablestore::Hooks;
/// use tablestore_core::TableDescriptor;
///
/// let hooks = Hooks::new(|session, from, _to| {
///     if from < 1 {
///         session.create_table(&TableDescriptor::new("users", ["id", "name"]))?;
///     }
///     Ok(())
/// })
/// .on_open_failure(|db, err| eprintln!("{}: {err}", db.path().display()));
/// # let _ = hooks;
/// ```
pub struct Hooks {
    upgrade: Box<UpgradeFn>,
    on_open: Option<Box<OpenFn>>,
    on_open_failure: Option<Box<FailureFn>>,
}

impl Hooks {
    /// Creates hooks with the given upgrade function.
    pub fn new(upgrade: impl Fn(&Session<'_>, u32, u32) -> Result<()> + Send + Sync + 'static) -> Self {
        Self {
            upgrade: Box::new(upgrade),
            on_open: None,
            on_open_failure: None,
        }
    }

    /// Hooks whose upgrade does nothing but record the new version.
    pub fn none() -> Self {
        Self::new(|_, _, _| Ok(()))
    }

    /// Sets the open-success handler.
    pub fn on_open(mut self, f: impl Fn(&Database) + Send + Sync + 'static) -> Self {
        self.on_open = Some(Box::new(f));
        self
    }

    /// Sets the open-failure handler.
    pub fn on_open_failure(mut self, f: impl Fn(&Database, &StoreError) + Send + Sync + 'static) -> Self {
        self.on_open_failure = Some(Box::new(f));
        self
    }

    pub(crate) fn upgrade(&self) -> &UpgradeFn {
        self.upgrade.as_ref()
    }

    pub(crate) fn opened(&self, db: &Database) {
        if let Some(f) = &self.on_open {
            f(db);
        }
    }

    pub(crate) fn failed(&self, db: &Database, err: &StoreError) {
        if let Some(f) = &self.on_open_failure {
            f(db, err);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_open_failure", &self.on_open_failure.is_some())
            .finish_non_exhaustive()
    }
}

/// What the migrator did during an open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version found in the file.
    pub from: u32,
    /// Version stored after the open.
    pub to: u32,
    /// Whether the upgrade hook ran and committed.
    pub migrated: bool,
}

/// Brings the open database on `queue` to `target`.
///
/// `transition` is told about each state the migrator enters.
pub(crate) fn migrate(
    queue: &ExecutionQueue,
    target: u32,
    policy: NewerVersionPolicy,
    upgrade: &dyn Fn(&Session<'_>, u32, u32) -> Result<()>,
    mut transition: impl FnMut(State),
) -> Result<MigrationReport> {
    transition(State::MigrationCheck);
    let stored = queue.run(|s| s.user_version())?;
    let unchanged = MigrationReport {
        from: stored,
        to: stored,
        migrated: false,
    };

    if stored == target {
        return Ok(unchanged);
    }
    if stored > target {
        return match policy {
            NewerVersionPolicy::Reject => Err(StoreError::IncompatibleVersion {
                found: stored,
                supported: target,
            }),
            NewerVersionPolicy::Accept => {
                warn!(found = stored, supported = target, "Opening database written by a newer version");
                Ok(unchanged)
            }
        };
    }

    transition(State::Migrating);
    info!(from = stored, to = target, "Migrating schema");

    let enforcing = queue.run(|s| foreign_keys_enabled(s.connection()))?;
    if enforcing {
        queue.run(|s| Ok(s.connection().pragma_update(None, "foreign_keys", false)?))?;
    }

    let result = queue.transaction_with(TransactionBehavior::Immediate, |s| {
        // Another process may have migrated while we waited for the lock.
        let from = s.user_version()?;
        if from >= target {
            return Ok(MigrationReport {
                from,
                to: from,
                migrated: false,
            });
        }

        let failure = |reason: String| StoreError::MigrationFailure {
            from,
            to: target,
            reason,
        };
        match catch_unwind(AssertUnwindSafe(|| upgrade(s, from, target))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(failure(err.to_string())),
            Err(panic) => return Err(failure(panic_message(panic.as_ref()))),
        }

        if enforcing {
            let violations: i64 =
                s.connection()
                    .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |row| row.get(0))?;
            if violations > 0 {
                return Err(failure(format!("{violations} foreign key violations")));
            }
        }

        s.set_user_version(target)?;
        Ok(MigrationReport {
            from,
            to: target,
            migrated: true,
        })
    });

    if enforcing {
        queue.run(|s| Ok(s.connection().pragma_update(None, "foreign_keys", true)?))?;
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("upgrade hook panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("upgrade hook panicked: {msg}")
    } else {
        "upgrade hook panicked".to_string()
    }
}
