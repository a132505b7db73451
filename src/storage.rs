//! Storage collaborator.
//!
//! The rewriting engine only needs to run SQL text with positional
//! parameters and read back rows with their column names. [`Storage`] is
//! that seam; [`SqliteStorage`] implements it over a run database file.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags, ToSql};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::{RunalyzerError, RunalyzerResult};
use crate::functions::register_functions;

/// Dynamic value type for parameters and result cells.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(String),
    Blob(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::String(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

/// Rows returned by a statement, with their column names.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the named column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Something that can execute SQL text.
pub trait Storage {
    /// Execute one statement with positional parameters.
    fn execute(&mut self, sql: &str, params: &[Value]) -> RunalyzerResult<QueryResult>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn execute(&mut self, sql: &str, params: &[Value]) -> RunalyzerResult<QueryResult> {
        (**self).execute(sql, params)
    }
}

/// A run database stored in SQLite.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open an existing run database.
    pub fn open(path: impl AsRef<Path>) -> RunalyzerResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )
        .map_err(|e| RunalyzerError::Connection(format!("{}: {}", path.display(), e)))?;
        Self::from_connection(conn)
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> RunalyzerResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| RunalyzerError::Connection(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Wrap an open connection, registering the custom SQL functions.
    pub fn from_connection(conn: Connection) -> RunalyzerResult<Self> {
        register_functions(&conn).map_err(|e| RunalyzerError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Storage for SqliteStorage {
    fn execute(&mut self, sql: &str, params: &[Value]) -> RunalyzerResult<QueryResult> {
        tracing::debug!(%sql, params = params.len(), "executing statement");

        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| RunalyzerError::Execution(e.to_string()))?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        if columns.is_empty() {
            stmt.execute(params_from_iter(params.iter()))
                .map_err(|e| RunalyzerError::Execution(e.to_string()))?;
            return Ok(QueryResult::default());
        }

        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| RunalyzerError::Execution(e.to_string()))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| RunalyzerError::Execution(e.to_string()))?
        {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value = row
                    .get_ref(i)
                    .map_err(|e| RunalyzerError::Execution(e.to_string()))?;
                values.push(Value::from(value));
            }
            result.push(values);
        }

        Ok(QueryResult {
            columns,
            rows: result,
        })
    }
}
