//! Local relational engine abstraction.
//!
//! s3lite never interprets SQL itself. It opens the pulled file through an
//! [`EngineConnector`] and forwards statements to the resulting
//! [`EngineConnection`]. Prepared statements are addressed by
//! [`StatementId`] so that connections can own their statement state.

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteConnector};

use crate::error::CoreResult;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::path::Path;

/// A single SQL value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
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

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row: column names paired with values, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Creates a row from `(column, value)` pairs.
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Returns the value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Returns the column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Returns the values in column order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One caller-supplied argument.
///
/// A single `List` or `Map` argument is the whole parameter set; otherwise
/// every argument is one positional value.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A single positional value.
    Value(Value),
    /// A complete positional parameter list.
    List(Vec<Value>),
    /// A complete named parameter set.
    Map(Vec<(String, Value)>),
}

impl<T: Into<Value>> From<T> for Arg {
    fn from(v: T) -> Self {
        Arg::Value(v.into())
    }
}

impl From<Vec<Value>> for Arg {
    fn from(v: Vec<Value>) -> Self {
        Arg::List(v)
    }
}

impl From<Vec<(String, Value)>> for Arg {
    fn from(v: Vec<(String, Value)>) -> Self {
        Arg::Map(v)
    }
}

/// Parameters bound to a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No parameters.
    #[default]
    None,
    /// Values bound to `?`/`?NNN` placeholders in order.
    Positional(Vec<Value>),
    /// Values bound to `:name`, `@name` or `$name` placeholders.
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Returns true if no parameter is supplied.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Positional(values) => values.is_empty(),
            Params::Named(values) => values.is_empty(),
        }
    }
}

/// Effect of a data-modifying statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunInfo {
    /// Rowid of the last inserted row.
    pub last_id: i64,
    /// Number of rows changed by the statement.
    pub changes: u64,
}

/// Identifier of a statement prepared on an [`EngineConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// Opens connections to local database files.
pub trait EngineConnector: Send + Sync {
    /// Opens the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Engine` if the file cannot be opened.
    fn open(&self, path: &Path) -> CoreResult<Box<dyn EngineConnection>>;
}

/// An open local database.
///
/// All calls are synchronous; s3lite serializes them through its
/// operation queue.
pub trait EngineConnection: Send {
    /// Executes a statement and reports its effect.
    fn run(&mut self, sql: &str, params: &Params) -> CoreResult<RunInfo>;

    /// Executes a query and returns its first row.
    fn get(&mut self, sql: &str, params: &Params) -> CoreResult<Option<Row>>;

    /// Executes a query and returns all rows.
    fn all(&mut self, sql: &str, params: &Params) -> CoreResult<Vec<Row>>;

    /// Executes a script of one or more statements without parameters.
    fn exec(&mut self, sql: &str) -> CoreResult<()>;

    /// Prepares a statement, binding `params` if any are given.
    fn prepare(&mut self, sql: &str, params: &Params) -> CoreResult<StatementId>;

    /// Runs a prepared statement. Non-empty `params` replace the bound ones.
    fn statement_run(&mut self, id: StatementId, params: &Params) -> CoreResult<RunInfo>;

    /// Returns the next row of a prepared query, advancing its cursor.
    fn statement_get(&mut self, id: StatementId, params: &Params) -> CoreResult<Option<Row>>;

    /// Returns all rows of a prepared query and resets its cursor.
    fn statement_all(&mut self, id: StatementId, params: &Params) -> CoreResult<Vec<Row>>;

    /// Replaces the parameters bound to a prepared statement.
    fn statement_bind(&mut self, id: StatementId, params: &Params) -> CoreResult<()>;

    /// Rewinds a prepared query's cursor.
    fn statement_reset(&mut self, id: StatementId) -> CoreResult<()>;

    /// Releases a prepared statement. Later use of `id` fails.
    fn statement_finalize(&mut self, id: StatementId) -> CoreResult<()>;

    /// Closes the connection.
    fn close(self: Box<Self>) -> CoreResult<()>;
}
