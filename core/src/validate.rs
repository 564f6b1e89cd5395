//! Identifier quoting and constraint fragment validation.
//!
//! Everything that reaches SQL text without being a bound parameter passes
//! through here first: identifiers are quoted, and constraint clauses are
//! scanned so their placeholder count can be checked against the supplied
//! arguments before anything is sent to the engine.
//!
//! # Examples
//!
//! ```
//! use tablestore_core::{count_placeholders, quote_ident};
//!
//! assert_eq!(quote_ident("users").unwrap(), "\"users\"");
//! assert_eq!(count_placeholders("WHERE a = ? AND b = '?'").unwrap(), 1);
//! ```

use thiserror::Error;

/// Errors raised while rendering a statement.
///
/// None of these ever reach the database: they are detected while the SQL
/// text is being assembled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A table or field name is empty or contains a NUL byte.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    /// The constraint clause cannot be bound to its arguments.
    #[error("malformed constraint: {0}")]
    MalformedConstraint(String),
    /// An update or projection names no fields.
    #[error("empty field list")]
    EmptyFieldList,
    /// A table definition lists the same field twice.
    #[error("duplicate field in table definition: {0}")]
    DuplicateField(String),
    /// The row key is not one of the table's fields.
    #[error("key field {0:?} is not part of the table definition")]
    UnknownKeyField(String),
    /// A stored table definition could not be edited.
    #[error("unsupported table definition: {0}")]
    UnsupportedDefinition(String),
    /// A field cannot be removed because another column's definition uses it.
    #[error("field {field:?} is used by column {by:?}")]
    FieldInUse {
        /// The field being removed.
        field: String,
        /// The surviving column whose definition mentions it.
        by: String,
    },
    /// Table names and field lists passed together differ in length.
    #[error("{tables} table names but {field_lists} field lists")]
    TableFieldMismatch {
        /// Number of table names supplied.
        tables: usize,
        /// Number of field lists supplied.
        field_lists: usize,
    },
}

/// Convenience alias for results with [`BuildError`].
pub type Result<T> = std::result::Result<T, BuildError>;

/// Highest parameter index SQLite accepts by default.
pub const MAX_PARAMETER_INDEX: usize = 32766;

/// Quotes an identifier for use in SQL text.
///
/// Embedded double quotes are doubled. Empty names and names containing a
/// NUL byte are rejected.
pub fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('\0') {
        return Err(BuildError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quotes every identifier and joins them with `", "`.
pub fn quote_list<S: AsRef<str>>(names: &[S]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|n| quote_ident(n.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Counts the parameters a SQL fragment expects.
///
/// Follows SQLite's numbering: a bare `?` takes the index after the largest
/// seen so far, and `?NNN` sets an explicit index. The result is the largest
/// index used. Placeholders inside string literals, quoted identifiers and
/// comments are ignored.
///
/// # Errors
///
/// Returns [`BuildError::MalformedConstraint`] for named parameters
/// (`:name`, `@name`, `$name`), out-of-range indexes, unterminated literals
/// or comments, and statement separators.
pub fn count_placeholders(sql: &str) -> Result<usize> {
    let chars: Vec<char> = sql.chars().collect();
    let mut max_index = 0usize;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            quote @ ('\'' | '"' | '`') => {
                i = skip_quoted(&chars, i, quote)?;
            }
            '[' => {
                i = match chars[i + 1..].iter().position(|&c| c == ']') {
                    Some(offset) => i + offset + 2,
                    None => return Err(malformed("unterminated bracketed identifier")),
                };
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                i = chars[i..]
                    .iter()
                    .position(|&c| c == '\n')
                    .map_or(chars.len(), |offset| i + offset + 1);
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i = match find_block_end(&chars, i + 2) {
                    Some(end) => end,
                    None => return Err(malformed("unterminated block comment")),
                };
            }
            '?' => {
                let digits: String = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                if digits.is_empty() {
                    max_index += 1;
                } else {
                    let index: usize = digits
                        .parse()
                        .map_err(|_| malformed(&format!("invalid parameter index ?{digits}")))?;
                    if index == 0 || index > MAX_PARAMETER_INDEX {
                        return Err(malformed(&format!("parameter index ?{digits} out of range")));
                    }
                    max_index = max_index.max(index);
                }
                i += 1 + digits.len();
            }
            ':' | '@' | '$'
                if chars
                    .get(i + 1)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_') =>
            {
                return Err(malformed("named parameters are not supported"));
            }
            ';' => return Err(malformed("statement separators are not allowed")),
            _ => i += 1,
        }
    }

    Ok(max_index)
}

fn malformed(reason: &str) -> BuildError {
    BuildError::MalformedConstraint(reason.to_string())
}

/// Returns the index just past the closing quote; doubled quotes escape.
pub(crate) fn skip_quoted(chars: &[char], start: usize, quote: char) -> Result<usize> {
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }
    Err(malformed("unterminated quoted literal"))
}

pub(crate) fn find_block_end(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len().saturating_sub(1))
        .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
        .map(|j| j + 2)
}
