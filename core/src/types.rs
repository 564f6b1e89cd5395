//! Value and row types shared by the statement builder and the SQLite layer.
//!
//! This module defines the data model callers use to talk to a table without
//! writing SQL: [`Value`] for a single cell, [`Row`] for an ordered set of
//! field/value pairs, [`Fields`] for the projection of a select, and
//! [`TableDescriptor`] / [`ColumnDef`] for table shapes.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A single SQL value.
///
/// Mirrors SQLite's storage classes. Booleans are stored as integers
/// (`0`/`1`), matching how SQLite itself stores them.
///
/// # Examples
///
/// ```
/// use tablestore_core::Value;
///
/// assert_eq!(Value::from(42), Value::Integer(42));
/// assert_eq!(Value::from("abc"), Value::Text("abc".into()));
/// assert_eq!(Value::from(None::<i64>), Value::Null);
/// assert_eq!(Value::from(true).as_i64(), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL`.
    #[default]
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns `true` if the value is `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the text payload, if this is text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the blob payload, if this is a blob.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// An ordered set of field/value pairs.
///
/// Used both as the input of inserts and updates and as the output of
/// selects. Field order is preserved: for selects it follows the requested
/// field list, or the table's column order when all fields were requested.
/// Setting a field that is already present replaces its value in place.
///
/// # Examples
///
/// ```
/// use tablestore_core::{Row, Value};
///
/// let row = Row::new().with("name", "A").with("age", 30);
/// assert_eq!(row.get("name"), Some(&Value::from("A")));
/// assert_eq!(row.fields().collect::<Vec<_>>(), vec!["name", "age"]);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets `field` to `value`, replacing an existing entry with the same name.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field, value)),
        }
    }

    /// Appends an entry without looking for an existing one of that name.
    ///
    /// Query results are built this way so that every result column is
    /// kept, including repeated names from joins or `SELECT 1 AS a, 2 AS a`.
    /// [`get`](Self::get) returns the first entry with a given name.
    pub fn push(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((field.into(), value.into()));
    }

    /// Returns the value stored under `field`.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Returns `true` if the row has an entry for `field`.
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Iterates over field names in order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Iterates over values in field order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Iterates over `(field, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields in the row.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consumes the row, returning its pairs.
    pub fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (field, value) in iter {
            row.set(field, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (field, value) in &self.entries {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

/// Projection of a select.
///
/// `All` replaces the `"*"` string sentinel so a real field literally named
/// `*` can never be confused with it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Fields {
    /// Every column of the table, in table order.
    #[default]
    All,
    /// The listed fields, in this order.
    Named(Vec<String>),
}

impl Fields {
    /// Builds a named projection from any list of field names.
    pub fn named<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Fields::Named(fields.into_iter().map(Into::into).collect())
    }

    /// Parses a comma-separated field list such as `"newsID,type"`.
    ///
    /// Surrounding whitespace is trimmed and empty entries are dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use tablestore_core::Fields;
    ///
    /// assert_eq!(
    ///     Fields::split("a, b,,c"),
    ///     Fields::named(["a", "b", "c"]),
    /// );
    /// ```
    pub fn split(list: &str) -> Self {
        Fields::Named(split_field_list(list))
    }
}

/// Splits a comma-separated field list, trimming and dropping empty entries.
pub fn split_field_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Name of the conventional row key column.
pub const DEFAULT_KEY_FIELD: &str = "id";

/// Shape of a table created from a plain field list.
///
/// Every field is declared `TEXT` except the key field, which is declared
/// `INTEGER PRIMARY KEY AUTOINCREMENT` so it aliases the SQLite rowid. By
/// default the key is the first field when it is named `id`.
///
/// # Examples
///
/// ```
/// use tablestore_core::TableDescriptor;
///
/// let users = TableDescriptor::new("users", ["id", "name"]);
/// assert_eq!(users.key(), Some("id"));
///
/// let news = TableDescriptor::from_field_string("news", "newsID,type");
/// assert_eq!(news.key(), None);
/// assert_eq!(news.fields(), ["newsID", "type"]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    name: String,
    fields: Vec<String>,
    key: Option<String>,
}

impl TableDescriptor {
    /// Creates a descriptor from a table name and ordered field names.
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let key = fields
            .first()
            .filter(|f| f.eq_ignore_ascii_case(DEFAULT_KEY_FIELD))
            .cloned();
        Self {
            name: name.into(),
            fields,
            key,
        }
    }

    /// Creates a descriptor from a comma-separated field list.
    pub fn from_field_string(name: impl Into<String>, fields: &str) -> Self {
        Self::new(name, split_field_list(fields))
    }

    /// Uses `field` as the integer row key.
    pub fn with_key(mut self, field: impl Into<String>) -> Self {
        self.key = Some(field.into());
        self
    }

    /// Declares every field as plain `TEXT`, relying on the implicit rowid.
    pub fn without_key(mut self) -> Self {
        self.key = None;
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered field names.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Row key field, if any.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// An existing column, as reported by `PRAGMA table_xinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Declared type, possibly empty.
    pub decl_type: String,
    /// Whether the column is declared `NOT NULL`.
    pub not_null: bool,
    /// Default value expression as written in the schema.
    pub default: Option<String>,
    /// 1-based position within the primary key, `0` if not part of it.
    pub primary_key: u32,
    /// Whether the table's primary key uses `AUTOINCREMENT`.
    pub autoincrement: bool,
    /// Whether the column is `GENERATED ALWAYS AS (...)`; such columns
    /// cannot be written.
    pub generated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_set_replaces_in_place() {
        let mut row = Row::new().with("a", 1).with("b", 2);
        row.set("a", "x");
        assert_eq!(row.fields().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(row.get("a"), Some(&Value::from("x")));
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_push_keeps_repeated_fields() {
        let mut row = Row::new();
        row.push("a", 1);
        row.push("a", 2);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get("a"), Some(&Value::Integer(1)));
        assert_eq!(row.values().cloned().collect::<Vec<_>>(), vec![Value::Integer(1), Value::Integer(2)]);
    }

    #[test]
    fn test_row_from_iter_keeps_order() {
        let row: Row = vec![("z", 1), ("a", 2)].into_iter().collect();
        assert_eq!(row.fields().collect::<Vec<_>>(), vec!["z", "a"]);
    }

    #[test]
    fn test_row_serializes_as_ordered_map() {
        let row = Row::new()
            .with("id", 1)
            .with("name", "B")
            .with("score", 1.5)
            .with("note", Value::Null);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":1,"name":"B","score":1.5,"note":null}"#);
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("a".into()).as_i64(), None);
        assert_eq!(Value::Blob(vec![1, 2]).as_blob(), Some(&[1u8, 2][..]));
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_split_field_list_trims_and_drops_empty() {
        assert_eq!(split_field_list(" a ,b,, c"), vec!["a", "b", "c"]);
        assert!(split_field_list("").is_empty());
    }

    #[test]
    fn test_descriptor_key_detection() {
        assert_eq!(TableDescriptor::new("t", ["ID", "x"]).key(), Some("ID"));
        assert_eq!(TableDescriptor::new("t", ["x", "id"]).key(), None);
        assert_eq!(
            TableDescriptor::new("t", ["x", "id"]).with_key("id").key(),
            Some("id")
        );
        assert_eq!(TableDescriptor::new("t", ["id"]).without_key().key(), None);
    }
}
