//! Value types exchanged with storage backends.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A single column value.
///
/// Timestamps travel as epoch milliseconds in [`Value::Int`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Text(_) => "text",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
        }
    }
}

/// A result row: ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column, replacing any existing column with the same name.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((column, value)),
        }
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Reads an integer column.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Decode` if the column is missing or not an integer.
    pub fn get_i64(&self, column: &str) -> Result<i64, StorageError> {
        let value = self.require(column)?;
        value.as_i64().ok_or_else(|| {
            StorageError::decode(column, format!("expected int, found {}", value.kind()))
        })
    }

    /// Reads a text column.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Decode` if the column is missing or not text.
    pub fn get_str(&self, column: &str) -> Result<&str, StorageError> {
        let value = self.require(column)?;
        value.as_str().ok_or_else(|| {
            StorageError::decode(column, format!("expected text, found {}", value.kind()))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn require(&self, column: &str) -> Result<&Value, StorageError> {
        self.get(column)
            .ok_or_else(|| StorageError::decode(column, "column not present in row"))
    }
}

/// A named, parameterized statement.
///
/// SQL backends execute `sql` verbatim with positional `$n` parameters.
/// The name identifies the statement in logs and lets non-SQL backends
/// dispatch to an equivalent implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Statement {
    pub name: &'static str,
    pub sql: &'static str,
}

impl Statement {
    #[must_use]
    pub const fn new(name: &'static str, sql: &'static str) -> Self {
        Self { name, sql }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Positional parameters for one execution of a [`Statement`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: Vec<Value>,
}

impl Bindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// Returns the parameter at zero-based `index` (`$1` is index 0).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Bindings {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = Row::new().with("id", "exp-1").with("max_date", 42_i64);

        assert_eq!(row.get_str("id").unwrap(), "exp-1");
        assert_eq!(row.get_i64("max_date").unwrap(), 42);
        assert_eq!(row.len(), 2);
    }

    #[test]
    fn test_row_decode_errors() {
        let row = Row::new().with("id", 7_i64);

        let err = row.get_str("id").unwrap_err();
        assert!(matches!(err, StorageError::Decode { ref column, .. } if column == "id"));

        let err = row.get_i64("missing").unwrap_err();
        assert!(err.to_string().contains("not present"));
    }

    #[test]
    fn test_row_set_replaces_existing_column() {
        let mut row = Row::new().with("version_number", 1_i64);
        row.set("version_number", 2_i64);

        assert_eq!(row.len(), 1);
        assert_eq!(row.get_i64("version_number").unwrap(), 2);
    }

    #[test]
    fn test_bindings_are_positional() {
        let bindings = Bindings::new().bind("exp-1").bind(10_i64);

        assert_eq!(bindings.get(0), Some(&Value::Text("exp-1".into())));
        assert_eq!(bindings.get(1).and_then(Value::as_i64), Some(10));
        assert!(bindings.get(2).is_none());
    }

    #[test]
    fn test_value_serialization_is_untagged() {
        let json = serde_json::to_value(Value::from(Some(5_i64))).unwrap();
        assert_eq!(json, serde_json::json!(5));

        let json = serde_json::to_value(Value::from(None::<String>)).unwrap();
        assert!(json.is_null());
    }
}
