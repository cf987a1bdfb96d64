//! Prepared statement facade.

use crate::engine::{Arg, Row, RunInfo};
use crate::error::{CoreError, CoreResult};
use crate::executor::{ExecRequest, ExecResult, Executor, Method, StatementHandle};
use parking_lot::Mutex;

/// A statement prepared with [`crate::Database::prepare`].
///
/// `all`, `get`, `run` and `bind` go through the database's operation queue
/// with the same locking rules as ad-hoc SQL. `reset` and `finalize` act on
/// the local engine directly.
#[derive(Debug)]
pub struct Statement {
    executor: Executor,
    handle: StatementHandle,
    last_run: Mutex<Option<RunInfo>>,
}

impl Statement {
    pub(crate) fn new(executor: Executor, handle: StatementHandle) -> Self {
        Self {
            executor,
            handle,
            last_run: Mutex::new(None),
        }
    }

    async fn exec(&self, method: Method, args: Vec<Arg>) -> CoreResult<ExecResult> {
        let request = ExecRequest::statement(method, self.handle.clone(), args);
        Ok(self.executor.exec(request).await?.result)
    }

    /// Runs the statement and returns every row.
    ///
    /// Non-empty `args` replace the bound parameters.
    pub async fn all(&self, args: Vec<Arg>) -> CoreResult<Vec<Row>> {
        match self.exec(Method::All, args).await? {
            ExecResult::Rows(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    /// Returns the next row, or `None` once the rows are exhausted.
    pub async fn get(&self, args: Vec<Arg>) -> CoreResult<Option<Row>> {
        match self.exec(Method::Get, args).await? {
            ExecResult::Row(row) => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    /// Executes the statement. Its effect is then available through
    /// [`Statement::last_id`] and [`Statement::changes`].
    pub async fn run(&self, args: Vec<Arg>) -> CoreResult<&Self> {
        match self.exec(Method::Run, args).await? {
            ExecResult::Run(info) => {
                *self.last_run.lock() = Some(info);
                Ok(self)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Replaces the bound parameters.
    pub async fn bind(&self, args: Vec<Arg>) -> CoreResult<&Self> {
        self.exec(Method::Bind, args).await?;
        Ok(self)
    }

    /// Rewinds the row cursor used by [`Statement::get`].
    ///
    /// # Errors
    ///
    /// Fails if the database is closed or the statement was finalized.
    pub fn reset(&self) -> CoreResult<&Self> {
        self.executor.reset_statement(&self.handle)?;
        Ok(self)
    }

    /// Releases the statement. Later calls fail.
    ///
    /// # Errors
    ///
    /// Fails if the database is closed or the statement was already
    /// finalized.
    pub fn finalize(&self) -> CoreResult<&Self> {
        self.executor.finalize_statement(&self.handle)?;
        Ok(self)
    }

    /// The SQL the statement was prepared from.
    pub fn sql(&self) -> &str {
        self.handle.sql()
    }

    /// Rowid reported by the last [`Statement::run`], if any.
    pub fn last_id(&self) -> Option<i64> {
        self.last_run.lock().map(|info| info.last_id)
    }

    /// Row count reported by the last [`Statement::run`], if any.
    pub fn changes(&self) -> Option<u64> {
        self.last_run.lock().map(|info| info.changes)
    }
}

pub(crate) fn unexpected(result: &ExecResult) -> CoreError {
    CoreError::engine(format!("unexpected engine result: {result:?}"))
}
