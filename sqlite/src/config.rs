//! Store configuration.
//!
//! Defines the YAML-serializable settings used to open a [`Database`]:
//! where the file lives, which schema version the caller expects, and how
//! the connection is tuned.
//!
//! # Example YAML
//!
//! ```yaml
//! file_name: app.sqlite
//! directory: /var/lib/app
//! version: 3
//! journal_mode: wal
//! foreign_keys: false
//! busy_timeout_ms: 5000
//! alter_strategy: auto
//! newer_version: reject
//! ```
//!
//! Only `file_name` and `directory` are required.
//!
//! [`Database`]: crate::Database

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Default schema version requested when none is configured.
pub const DEFAULT_VERSION: u32 = 1;

/// Default time SQLite waits on a locked file before failing.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// SQLite journal mode applied when the connection opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Rollback journal deleted after each transaction (SQLite default).
    Delete,
    /// Rollback journal truncated instead of deleted.
    Truncate,
    /// Rollback journal kept with a zeroed header.
    Persist,
    /// In-memory rollback journal.
    Memory,
    /// Write-ahead log.
    Wal,
    /// No journal; transactions cannot roll back safely.
    Off,
}

impl JournalMode {
    /// The pragma value for this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }
}

/// How column rename/delete is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlterStrategy {
    /// Use native `ALTER TABLE` when the linked SQLite supports it.
    #[default]
    Auto,
    /// Always use native `ALTER TABLE`.
    Native,
    /// Always rebuild the table through a shadow copy.
    Rebuild,
}

/// What to do when the file's stored version is newer than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NewerVersionPolicy {
    /// Fail to open with [`StoreError::IncompatibleVersion`].
    #[default]
    Reject,
    /// Open anyway, leaving the stored version untouched.
    Accept,
}

/// Connection-level settings handed to the execution queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Journal mode, or `None` to keep SQLite's default.
    pub journal_mode: Option<JournalMode>,
    /// Whether foreign key enforcement is enabled.
    pub foreign_keys: bool,
    /// Busy timeout.
    pub busy_timeout: Duration,
    /// Column rename/delete strategy.
    pub alter_strategy: AlterStrategy,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            journal_mode: None,
            foreign_keys: false,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            alter_strategy: AlterStrategy::Auto,
        }
    }
}

/// Settings for one database file.
///
/// # Examples
///
/// ```
/// use tablestore::{AlterStrategy, DatabaseConfig};
///
/// let config = DatabaseConfig::new("app.sqlite", "/tmp/app")
///     .with_version(3)
///     .with_alter_strategy(AlterStrategy::Rebuild);
/// assert_eq!(config.path(), std::path::Path::new("/tmp/app/app.sqlite"));
/// assert_eq!(config.version, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// File name inside `directory`.
    pub file_name: String,
    /// Directory holding the file; created on open if missing.
    pub directory: PathBuf,
    /// Schema version the caller expects.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Journal mode applied on open.
    #[serde(default)]
    pub journal_mode: Option<JournalMode>,
    /// Enables foreign key enforcement.
    #[serde(default)]
    pub foreign_keys: bool,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    /// Column rename/delete strategy.
    #[serde(default)]
    pub alter_strategy: AlterStrategy,
    /// Policy for files written by a newer schema version.
    #[serde(default)]
    pub newer_version: NewerVersionPolicy,
}

fn default_version() -> u32 {
    DEFAULT_VERSION
}

fn default_busy_timeout() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl DatabaseConfig {
    /// Creates a configuration with default settings.
    pub fn new(file_name: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            file_name: file_name.into(),
            directory: directory.into(),
            version: DEFAULT_VERSION,
            journal_mode: None,
            foreign_keys: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            alter_strategy: AlterStrategy::default(),
            newer_version: NewerVersionPolicy::default(),
        }
    }

    /// Builds a configuration from a full file path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the path has no file name.
    pub fn for_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StoreError::Config(format!("'{}' has no file name", path.display())))?;
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(Self::new(file_name, directory))
    }

    /// Sets the expected schema version.
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the journal mode.
    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    /// Enables or disables foreign key enforcement.
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Sets the column rename/delete strategy.
    pub fn with_alter_strategy(mut self, strategy: AlterStrategy) -> Self {
        self.alter_strategy = strategy;
        self
    }

    /// Sets the policy for files written by a newer schema version.
    pub fn with_newer_version(mut self, policy: NewerVersionPolicy) -> Self {
        self.newer_version = policy;
        self
    }

    /// Full path of the database file.
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Connection settings derived from this configuration.
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            journal_mode: self.journal_mode,
            foreign_keys: self.foreign_keys,
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            alter_strategy: self.alter_strategy,
        }
    }

    /// Checks that the configuration can be used to open a file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] for an empty file name or one that
    /// contains a path separator.
    pub fn validate(&self) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(StoreError::Config("file name cannot be empty".to_string()));
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(StoreError::Config(format!(
                "file name '{}' must not contain path separators",
                self.file_name
            )));
        }
        Ok(())
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](StoreError::Io) if the file cannot be read, or
    /// [`Config`](StoreError::Config) if parsing or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Io`](StoreError::Io) if the file cannot be written, or
    /// [`Config`](StoreError::Config) if serialization fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
file_name: app.sqlite
directory: /var/lib/app
version: 3
journal_mode: wal
foreign_keys: true
busy_timeout_ms: 250
alter_strategy: rebuild
newer_version: accept
"#
    }

    #[test]
    fn test_deserialize_complete() {
        let config: DatabaseConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.file_name, "app.sqlite");
        assert_eq!(config.directory, PathBuf::from("/var/lib/app"));
        assert_eq!(config.version, 3);
        assert_eq!(config.journal_mode, Some(JournalMode::Wal));
        assert!(config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.alter_strategy, AlterStrategy::Rebuild);
        assert_eq!(config.newer_version, NewerVersionPolicy::Accept);
    }

    #[test]
    fn test_deserialize_minimal_uses_defaults() {
        let config: DatabaseConfig =
            serde_yaml::from_str("file_name: a.db\ndirectory: data\n").unwrap();
        assert_eq!(config, DatabaseConfig::new("a.db", "data"));
        assert_eq!(config.version, DEFAULT_VERSION);
        assert_eq!(config.newer_version, NewerVersionPolicy::Reject);
    }

    #[test]
    fn test_for_path_splits_directory() {
        let config = DatabaseConfig::for_path("/tmp/x/store.db").unwrap();
        assert_eq!(config.file_name, "store.db");
        assert_eq!(config.directory, PathBuf::from("/tmp/x"));
        assert!(DatabaseConfig::for_path("/").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_file_names() {
        assert!(DatabaseConfig::new("", "d").validate().is_err());
        assert!(DatabaseConfig::new("a/b.db", "d").validate().is_err());
        assert!(DatabaseConfig::new("b.db", "d").validate().is_ok());
    }

    #[test]
    fn test_load_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yml");

        let original: DatabaseConfig = serde_yaml::from_str(sample_yaml()).unwrap();
        original.save(&path).unwrap();
        let loaded = DatabaseConfig::load(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_connection_options_mirror_config() {
        let options = DatabaseConfig::new("a.db", "d")
            .with_journal_mode(JournalMode::Memory)
            .with_foreign_keys(true)
            .connection_options();
        assert_eq!(options.journal_mode, Some(JournalMode::Memory));
        assert!(options.foreign_keys);
        assert_eq!(options.busy_timeout, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
    }
}
