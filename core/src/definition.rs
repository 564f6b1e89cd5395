//! Editing of stored `CREATE TABLE` text.
//!
//! SQLite keeps every table's definition as the statement that created it.
//! Recreating a table from that text, with only the affected column edited,
//! keeps what `PRAGMA table_info` does not report: `CHECK` and
//! `FOREIGN KEY` clauses, collations, generated columns and table options
//! such as `WITHOUT ROWID` or `STRICT`.
//!
//! Column references are recognized inside parentheses (`CHECK (...)`,
//! `AS (...)`, `PRIMARY KEY (...)`, `UNIQUE (...)`, `FOREIGN KEY (...)`).
//! The column list after `REFERENCES <table>` names the other table and is
//! left alone.
//!
//! # Examples
//!
//! ```
//! use tablestore_core::TableDefinition;
//!
//! let mut def = TableDefinition::parse(
//!     "CREATE TABLE t (a INTEGER CHECK (a > 0), b TEXT COLLATE NOCASE)",
//! )
//! .unwrap();
//! def.rename_column("a", "qty").unwrap();
//! assert_eq!(
//!     def.to_sql("t2").unwrap(),
//!     r#"CREATE TABLE "t2" ("qty" INTEGER CHECK ("qty" > 0), b TEXT COLLATE NOCASE)"#
//! );
//! ```

use crate::validate::{BuildError, Result, find_block_end, quote_ident, skip_quoted};

/// Leading keywords of a table constraint, as opposed to a column definition.
const CONSTRAINT_KEYWORDS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    /// Whitespace or a comment.
    Space,
    Word,
    /// A `"..."`, `` `...` `` or `[...]` identifier.
    Quoted,
    /// A `'...'` string literal.
    Literal,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: Kind,
    text: String,
}

impl Token {
    fn is_space(&self) -> bool {
        self.kind == Kind::Space
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == Kind::Punct && self.text.starts_with(c)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == Kind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    /// The identifier this token names, for bare words and quoted names.
    fn ident(&self) -> Option<String> {
        match self.kind {
            Kind::Word => Some(self.text.clone()),
            Kind::Quoted => Some(unquote(&self.text)),
            _ => None,
        }
    }
}

fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    match text.as_bytes()[0] {
        b'"' => inner.replace("\"\"", "\""),
        b'`' => inner.replace("``", "`"),
        _ => inner.to_string(),
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn unsupported(reason: impl Into<String>) -> BuildError {
    BuildError::UnsupportedDefinition(reason.into())
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let start = i;
        let c = chars[i];
        let kind = if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            Kind::Space
        } else if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            Kind::Space
        } else if c == '/' && chars.get(i + 1) == Some(&'*') {
            i = find_block_end(&chars, i + 2).ok_or_else(|| unsupported("unterminated comment"))?;
            Kind::Space
        } else if c == '\'' {
            i = skip_quoted(&chars, i, c).map_err(|_| unsupported("unterminated string literal"))?;
            Kind::Literal
        } else if c == '"' || c == '`' {
            i = skip_quoted(&chars, i, c).map_err(|_| unsupported("unterminated identifier"))?;
            Kind::Quoted
        } else if c == '[' {
            i = match chars[i + 1..].iter().position(|&ch| ch == ']') {
                Some(offset) => i + offset + 2,
                None => return Err(unsupported("unterminated bracketed identifier")),
            };
            Kind::Quoted
        } else if is_word_char(c) {
            while i < chars.len() && is_word_char(chars[i]) {
                i += 1;
            }
            Kind::Word
        } else {
            i += 1;
            Kind::Punct
        };
        tokens.push(Token {
            kind,
            text: chars[start..i].iter().collect(),
        });
    }
    Ok(tokens)
}

/// One entry of the column list: a column definition or a table constraint.
#[derive(Debug, Clone)]
struct Item {
    tokens: Vec<Token>,
    /// Column name, `None` for table constraints.
    column: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    None,
    /// After `REFERENCES`, before the other table's name.
    Table,
    /// After the other table's name, before its optional column list.
    Columns,
}

impl Item {
    fn new(mut tokens: Vec<Token>) -> Result<Self> {
        while tokens.last().is_some_and(Token::is_space) {
            tokens.pop();
        }
        let leading = tokens.iter().take_while(|t| t.is_space()).count();
        tokens.drain(..leading);

        let first = tokens.first().ok_or_else(|| unsupported("empty column list entry"))?;
        let column = if CONSTRAINT_KEYWORDS.iter().any(|k| first.is_keyword(k)) {
            None
        } else {
            Some(
                first
                    .ident()
                    .ok_or_else(|| unsupported(format!("unexpected {:?}", first.text)))?,
            )
        };
        Ok(Self { tokens, column })
    }

    fn is_column(&self, name: &str) -> bool {
        self.column
            .as_deref()
            .is_some_and(|column| column.eq_ignore_ascii_case(name))
    }

    fn text(&self) -> String {
        self.tokens.iter().map(|t| t.text.as_str()).collect()
    }

    fn next_solid(&self, index: usize) -> Option<&Token> {
        self.tokens[index + 1..].iter().find(|t| !t.is_space())
    }

    /// Positions of tokens that refer to `field` from inside parentheses.
    fn references_to(&self, field: &str) -> Vec<usize> {
        let mut found = Vec::new();
        let mut depth = 0usize;
        let mut target = Target::None;
        let mut skip_to: Option<usize> = None;

        for (i, token) in self.tokens.iter().enumerate() {
            if token.is_space() {
                continue;
            }
            if let Some(level) = skip_to {
                if token.is_punct('(') {
                    depth += 1;
                } else if token.is_punct(')') {
                    depth = depth.saturating_sub(1);
                    if depth == level {
                        skip_to = None;
                    }
                }
                continue;
            }
            match target {
                Target::Table => {
                    target = Target::Columns;
                    continue;
                }
                Target::Columns => {
                    target = Target::None;
                    if token.is_punct('(') {
                        skip_to = Some(depth);
                        depth += 1;
                        continue;
                    }
                }
                Target::None => {}
            }

            if token.is_keyword("REFERENCES") {
                target = Target::Table;
            } else if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                depth = depth.saturating_sub(1);
            } else if depth > 0
                && token.ident().is_some_and(|name| name.eq_ignore_ascii_case(field))
                && !self.next_solid(i).is_some_and(|next| next.is_punct('('))
            {
                found.push(i);
            }
        }
        found
    }
}

/// A parsed `CREATE TABLE` statement that can be edited column by column.
#[derive(Debug, Clone)]
pub struct TableDefinition {
    items: Vec<Item>,
    /// Text after the closing parenthesis, such as `WITHOUT ROWID`.
    options: String,
}

impl TableDefinition {
    /// Parses the `sql` column of a `sqlite_master` table entry.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::UnsupportedDefinition`] for `CREATE TABLE ... AS
    /// SELECT` and for text that is not a well-formed column list.
    pub fn parse(sql: &str) -> Result<Self> {
        let tokens = tokenize(sql)?;
        let open = tokens
            .iter()
            .position(|t| t.is_punct('('))
            .ok_or_else(|| unsupported("no column list"))?;
        if tokens[..open].iter().any(|t| t.is_keyword("AS")) {
            return Err(unsupported("table created from a query"));
        }

        let mut items = Vec::new();
        let mut current = Vec::new();
        let mut depth = 0usize;
        let mut close = None;
        for (i, token) in tokens.iter().enumerate().skip(open + 1) {
            if token.is_punct('(') {
                depth += 1;
            } else if token.is_punct(')') {
                if depth == 0 {
                    close = Some(i);
                    break;
                }
                depth -= 1;
            } else if depth == 0 && token.is_punct(',') {
                items.push(Item::new(std::mem::take(&mut current))?);
                continue;
            }
            current.push(token.clone());
        }
        let close = close.ok_or_else(|| unsupported("unbalanced parentheses"))?;
        items.push(Item::new(current)?);

        let options: String = tokens[close + 1..].iter().map(|t| t.text.as_str()).collect();
        Ok(Self {
            items,
            options: options.trim().to_string(),
        })
    }

    /// Column names in declaration order, generated columns included.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| item.column.as_deref())
    }

    /// Renames a column and every reference to it within the definition.
    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<()> {
        let replacement = Token {
            kind: Kind::Quoted,
            text: quote_ident(new)?,
        };
        let target = self
            .items
            .iter()
            .position(|item| item.is_column(old))
            .ok_or_else(|| unsupported(format!("no column {old:?}")))?;

        for item in &mut self.items {
            for i in item.references_to(old) {
                item.tokens[i] = replacement.clone();
            }
        }
        let item = &mut self.items[target];
        item.tokens[0] = replacement;
        item.column = Some(new.to_string());
        Ok(())
    }

    /// Removes columns, along with the table constraints that mention them.
    ///
    /// Returns the text of every table constraint that was removed.
    ///
    /// # Errors
    ///
    /// [`BuildError::FieldInUse`] when a surviving column's `CHECK` or
    /// generated expression mentions a removed column, and
    /// [`BuildError::EmptyFieldList`] when no column would remain.
    pub fn drop_columns<S: AsRef<str>>(&mut self, fields: &[S]) -> Result<Vec<String>> {
        self.items
            .retain(|item| !fields.iter().any(|f| item.is_column(f.as_ref())));
        if self.columns().next().is_none() {
            return Err(BuildError::EmptyFieldList);
        }

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.items.len());
        for item in std::mem::take(&mut self.items) {
            let used = fields
                .iter()
                .map(|f| f.as_ref())
                .find(|f| !item.references_to(f).is_empty());
            let Some(field) = used else {
                kept.push(item);
                continue;
            };
            match &item.column {
                Some(column) => {
                    return Err(BuildError::FieldInUse {
                        field: field.to_string(),
                        by: column.clone(),
                    });
                }
                None => removed.push(item.text()),
            }
        }
        self.items = kept;
        Ok(removed)
    }

    /// Renders the definition as `CREATE TABLE <table> (...)`.
    pub fn to_sql(&self, table: &str) -> Result<String> {
        let body: Vec<String> = self.items.iter().map(Item::text).collect();
        let mut sql = format!("CREATE TABLE {} ({})", quote_ident(table)?, body.join(", "));
        if !self.options.is_empty() {
            sql.push(' ');
            sql.push_str(&self.options);
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_splits_columns_and_constraints() {
        let def = TableDefinition::parse(
            "CREATE TABLE IF NOT EXISTS \"order\" (\n  id INTEGER PRIMARY KEY,\n  [total] REAL DEFAULT (0.0),\n  `note` TEXT, -- free text\n  CHECK (total >= 0)\n) WITHOUT ROWID",
        )
        .unwrap();
        assert_eq!(def.columns().collect::<Vec<_>>(), vec!["id", "total", "note"]);
        assert_eq!(def.items.len(), 4);
        assert_eq!(def.options, "WITHOUT ROWID");
    }

    #[test]
    fn test_rename_rewrites_constraints_but_not_foreign_targets() {
        let mut def = TableDefinition::parse(
            "CREATE TABLE child (pid INTEGER, note TEXT, \
             FOREIGN KEY (pid) REFERENCES parent (pid) ON DELETE CASCADE, UNIQUE (pid, note))",
        )
        .unwrap();
        def.rename_column("PID", "parent_id").unwrap();
        assert_eq!(
            def.to_sql("child").unwrap(),
            "CREATE TABLE \"child\" (\"parent_id\" INTEGER, note TEXT, \
             FOREIGN KEY (\"parent_id\") REFERENCES parent (pid) ON DELETE CASCADE, \
             UNIQUE (\"parent_id\", note))"
        );
    }

    #[test]
    fn test_rename_leaves_literals_and_function_names() {
        let mut def = TableDefinition::parse(
            "CREATE TABLE t (length TEXT CHECK (length(length) < 5 AND length <> 'length'))",
        )
        .unwrap();
        def.rename_column("length", "size").unwrap();
        assert_eq!(
            def.to_sql("t").unwrap(),
            "CREATE TABLE \"t\" (\"size\" TEXT CHECK (length(\"size\") < 5 AND \"size\" <> 'length'))"
        );
    }

    #[test]
    fn test_drop_removes_dependent_table_constraints() {
        let mut def = TableDefinition::parse(
            "CREATE TABLE t (a INT, b INT, c INT, CHECK (b > 0), CONSTRAINT pair UNIQUE (a, c))",
        )
        .unwrap();
        let removed = def.drop_columns(&["c"]).unwrap();
        assert_eq!(removed, vec!["CONSTRAINT pair UNIQUE (a, c)"]);
        assert_eq!(
            def.to_sql("t").unwrap(),
            "CREATE TABLE \"t\" (a INT, b INT, CHECK (b > 0))"
        );
    }

    #[test]
    fn test_drop_refuses_column_used_by_generated_column() {
        let mut def = TableDefinition::parse(
            "CREATE TABLE g (a INTEGER, b INTEGER, c INTEGER GENERATED ALWAYS AS (a + b))",
        )
        .unwrap();
        assert_eq!(
            def.drop_columns(&["b"]).unwrap_err(),
            BuildError::FieldInUse {
                field: "b".into(),
                by: "c".into()
            }
        );
    }

    #[test]
    fn test_drop_last_column_is_rejected() {
        let mut def = TableDefinition::parse("CREATE TABLE t (a)").unwrap();
        assert_eq!(def.drop_columns(&["A"]).unwrap_err(), BuildError::EmptyFieldList);
    }

    #[test]
    fn test_parse_rejects_unsupported_text() {
        assert!(matches!(
            TableDefinition::parse("CREATE TABLE t AS SELECT (1) AS a"),
            Err(BuildError::UnsupportedDefinition(_))
        ));
        assert!(matches!(
            TableDefinition::parse("CREATE TABLE t (a, b"),
            Err(BuildError::UnsupportedDefinition(_))
        ));
    }
}
