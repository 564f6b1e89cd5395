//! Constraint fragments: a SQL clause plus its positional arguments.

use crate::types::Value;
use crate::validate::{BuildError, Result, count_placeholders};

/// A clause such as `WHERE id = (?)` together with its bound arguments.
///
/// Two constructor forms are available: the builder form
/// ([`new`](Self::new) followed by [`arg`](Self::arg)) for a small fixed
/// number of arguments, and [`with_args`](Self::with_args) for an explicit
/// sequence. Either way the number of placeholders in the clause must match
/// the number of arguments; [`validate`](Self::validate) checks this before
/// any statement is rendered.
///
/// # Examples
///
/// ```
/// use tablestore_core::Constraint;
///
/// let by_id = Constraint::new("WHERE id = (?)").arg(1);
/// assert!(by_id.validate().is_ok());
///
/// let listed = Constraint::with_args("WHERE a = ? AND b = ?", ["x", "y"]);
/// assert_eq!(listed.args().len(), 2);
///
/// let broken = Constraint::new("WHERE a = ? AND b = ?").arg("x");
/// assert!(broken.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraint {
    clause: String,
    args: Vec<Value>,
}

impl Constraint {
    /// A constraint that matches every row.
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a constraint with no arguments yet.
    pub fn new(clause: impl Into<String>) -> Self {
        Self {
            clause: clause.into(),
            args: Vec::new(),
        }
    }

    /// Creates a constraint from a clause and an ordered argument sequence.
    pub fn with_args<I, V>(clause: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            clause: clause.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Appends one positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// The clause text, trimmed.
    pub fn clause(&self) -> &str {
        self.clause.trim()
    }

    /// The positional arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Returns `true` if the constraint has no clause.
    pub fn is_empty(&self) -> bool {
        self.clause().is_empty()
    }

    /// Checks that the clause expects exactly as many arguments as supplied.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MalformedConstraint`] on a count mismatch or if
    /// the clause cannot be scanned (see
    /// [`count_placeholders`](crate::count_placeholders)).
    pub fn validate(&self) -> Result<()> {
        let expected = count_placeholders(self.clause())?;
        if expected != self.args.len() {
            return Err(BuildError::MalformedConstraint(format!(
                "clause {:?} expects {expected} argument(s) but {} were supplied",
                self.clause(),
                self.args.len()
            )));
        }
        Ok(())
    }
}

impl From<&str> for Constraint {
    fn from(clause: &str) -> Self {
        Self::new(clause)
    }
}

impl From<String> for Constraint {
    fn from(clause: String) -> Self {
        Self::new(clause)
    }
}
