//! Core types and statement rendering for tablestore.
//!
//! This crate is the I/O-free half of tablestore:
//!
//! - [`Value`] and [`Row`]: cells and ordered field/value sets, used both
//!   as insert/update input and as select output.
//! - [`Fields`]: a select projection (`All` or an explicit list).
//! - [`Constraint`]: a clause fragment such as `WHERE id = (?)` with its
//!   positional arguments.
//! - [`TableDescriptor`] and [`ColumnDef`]: table shapes.
//! - [`TableDefinition`]: stored `CREATE TABLE` text, edited column by column.
//! - [`statement`]: pure functions rendering SQL text plus bound arguments.
//!
//! Constraint fragments are checked for a placeholder/argument count match
//! before rendering, so a malformed clause never reaches the engine.
//!
//! # Example
//!
//! ```
//! use tablestore_core::*;
//!
//! let update = statement::render_update(
//!     "users",
//!     &Row::new().with("name", "B"),
//!     &Constraint::new("WHERE id = (?)").arg(1),
//! )
//! .unwrap();
//! assert_eq!(update.sql, r#"UPDATE "users" SET "name" = ? WHERE id = (?)"#);
//!
//! let broken = statement::render_delete("users", &Constraint::new("WHERE id = ?"));
//! assert!(matches!(broken, Err(BuildError::MalformedConstraint(_))));
//! ```

mod constraint;
mod definition;
pub mod statement;
mod types;
mod validate;

pub use constraint::Constraint;
pub use definition::TableDefinition;
pub use statement::Statement;
pub use types::*;
pub use validate::{BuildError, MAX_PARAMETER_INDEX, Result, count_placeholders, quote_ident, quote_list};
