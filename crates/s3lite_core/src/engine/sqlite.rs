//! SQLite engine built on rusqlite.

use super::{EngineConnection, EngineConnector, Params, Row, RunInfo, StatementId, Value};
use crate::error::{CoreError, CoreResult};
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, Statement};
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::path::Path;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

/// Opens [`SqliteConnection`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl EngineConnector for SqliteConnector {
    fn open(&self, path: &Path) -> CoreResult<Box<dyn EngineConnection>> {
        Ok(Box::new(SqliteConnection::open(path)?))
    }
}

#[derive(Debug)]
struct PreparedState {
    sql: String,
    params: Params,
    // Rows left for `get`, filled by the first `get` after a reset.
    remaining: Option<VecDeque<Row>>,
}

/// A SQLite database file opened through rusqlite.
///
/// Prepared statements keep their SQL and bound parameters here and are
/// re-executed through rusqlite's statement cache. Stepping with `get`
/// materializes the result once and hands out its rows until the
/// statement is reset, rebound or run again.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
    statements: HashMap<StatementId, PreparedState>,
    next_statement: u64,
}

impl SqliteConnection {
    /// Opens (or creates) the database file at `path`.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Ok(Self::with_connection(Connection::open(path)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> CoreResult<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            statements: HashMap::new(),
            next_statement: 1,
        }
    }

    fn prepared(
        statements: &mut HashMap<StatementId, PreparedState>,
        id: StatementId,
    ) -> CoreResult<&mut PreparedState> {
        statements
            .get_mut(&id)
            .ok_or_else(|| CoreError::engine(format!("statement {} has been finalized", id.0)))
    }
}

fn placeholder(name: &str) -> Cow<'_, str> {
    if name.starts_with([':', '@', '$']) {
        Cow::Borrowed(name)
    } else {
        Cow::Owned(format!(":{name}"))
    }
}

fn bind(stmt: &mut Statement<'_>, params: &Params) -> CoreResult<()> {
    match params {
        Params::None => {}
        Params::Positional(values) => {
            for (index, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(index + 1, value)?;
            }
        }
        Params::Named(values) => {
            for (name, value) in values {
                let name = placeholder(name);
                let index = stmt.parameter_index(&name)?.ok_or_else(|| {
                    CoreError::invalid_parameters(format!("no parameter named {name}"))
                })?;
                stmt.raw_bind_parameter(index, value)?;
            }
        }
    }
    Ok(())
}

fn run_sql(conn: &Connection, sql: &str, params: &Params) -> CoreResult<RunInfo> {
    let mut stmt = conn.prepare_cached(sql)?;
    bind(&mut stmt, params)?;

    let changes = if stmt.column_count() > 0 {
        let mut rows = stmt.raw_query();
        while rows.next()?.is_some() {}
        0
    } else {
        stmt.raw_execute()? as u64
    };

    Ok(RunInfo {
        last_id: conn.last_insert_rowid(),
        changes,
    })
}

fn query_sql(
    conn: &Connection,
    sql: &str,
    params: &Params,
    limit: Option<usize>,
) -> CoreResult<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    bind(&mut stmt, params)?;
    let names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut rows = stmt.raw_query();
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            columns.push((name.clone(), Value::from(row.get_ref(i)?)));
        }
        out.push(Row::new(columns));
        if limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
    }
    Ok(out)
}

impl EngineConnection for SqliteConnection {
    fn run(&mut self, sql: &str, params: &Params) -> CoreResult<RunInfo> {
        run_sql(&self.conn, sql, params)
    }

    fn get(&mut self, sql: &str, params: &Params) -> CoreResult<Option<Row>> {
        Ok(query_sql(&self.conn, sql, params, Some(1))?.into_iter().next())
    }

    fn all(&mut self, sql: &str, params: &Params) -> CoreResult<Vec<Row>> {
        query_sql(&self.conn, sql, params, None)
    }

    fn exec(&mut self, sql: &str) -> CoreResult<()> {
        Ok(self.conn.execute_batch(sql)?)
    }

    fn prepare(&mut self, sql: &str, params: &Params) -> CoreResult<StatementId> {
        // Surfaces syntax errors now and warms the statement cache.
        let mut stmt = self.conn.prepare_cached(sql)?;
        bind(&mut stmt, params)?;
        drop(stmt);

        let id = StatementId(self.next_statement);
        self.next_statement += 1;
        self.statements.insert(
            id,
            PreparedState {
                sql: sql.to_string(),
                params: params.clone(),
                remaining: None,
            },
        );
        Ok(id)
    }

    fn statement_run(&mut self, id: StatementId, params: &Params) -> CoreResult<RunInfo> {
        let state = Self::prepared(&mut self.statements, id)?;
        if !params.is_empty() {
            state.params = params.clone();
        }
        state.remaining = None;
        run_sql(&self.conn, &state.sql, &state.params)
    }

    fn statement_get(&mut self, id: StatementId, params: &Params) -> CoreResult<Option<Row>> {
        let state = Self::prepared(&mut self.statements, id)?;
        if !params.is_empty() {
            state.params = params.clone();
            state.remaining = None;
        }
        if state.remaining.is_none() {
            let rows = query_sql(&self.conn, &state.sql, &state.params, None)?;
            state.remaining = Some(rows.into());
        }
        Ok(state.remaining.as_mut().and_then(VecDeque::pop_front))
    }

    fn statement_all(&mut self, id: StatementId, params: &Params) -> CoreResult<Vec<Row>> {
        let state = Self::prepared(&mut self.statements, id)?;
        if !params.is_empty() {
            state.params = params.clone();
        }
        state.remaining = None;
        query_sql(&self.conn, &state.sql, &state.params, None)
    }

    fn statement_bind(&mut self, id: StatementId, params: &Params) -> CoreResult<()> {
        let state = Self::prepared(&mut self.statements, id)?;
        let mut stmt = self.conn.prepare_cached(&state.sql)?;
        bind(&mut stmt, params)?;
        state.params = params.clone();
        state.remaining = None;
        Ok(())
    }

    fn statement_reset(&mut self, id: StatementId) -> CoreResult<()> {
        Self::prepared(&mut self.statements, id)?.remaining = None;
        Ok(())
    }

    fn statement_finalize(&mut self, id: StatementId) -> CoreResult<()> {
        self.statements
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CoreError::engine(format!("statement {} has been finalized", id.0)))
    }

    fn close(self: Box<Self>) -> CoreResult<()> {
        self.conn.close().map_err(|(_, e)| e.into())
    }
}
