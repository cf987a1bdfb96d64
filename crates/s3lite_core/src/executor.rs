//! Turns SQL requests into queued lock/pull/execute/push/release steps.
//!
//! Reads pull (possibly from the local cache) and execute without locking.
//! Writes take the lock, pull a fresh copy, execute, push and release, all
//! as one queue group. `BEGIN` keeps the lock across requests until the
//! matching `COMMIT` or `ROLLBACK`.

use crate::engine::{Arg, EngineConnection, EngineConnector, Params, Row, RunInfo, StatementId};
use crate::error::{CoreError, CoreResult};
use crate::queue::{OperationQueue, Pending};
use crate::remote::RemoteDatabase;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Return every row.
    All,
    /// Return the first (or next, for prepared statements) row.
    Get,
    /// Execute and report the effect.
    Run,
    /// Execute a parameterless script.
    Exec,
    /// Replace a prepared statement's parameters.
    Bind,
}

/// A statement prepared through [`Executor::prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementHandle {
    id: StatementId,
    sql: String,
}

impl StatementHandle {
    /// The engine-side identifier.
    pub fn id(&self) -> StatementId {
        self.id
    }

    /// The SQL the statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// What a request executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecTarget {
    /// Ad-hoc SQL text.
    Sql(String),
    /// A prepared statement.
    Statement(StatementHandle),
}

/// One call into the executor.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// The requested method.
    pub method: Method,
    /// SQL text or prepared statement.
    pub target: ExecTarget,
    /// Caller arguments, normalized by [`normalize_params`].
    pub args: Vec<Arg>,
}

impl ExecRequest {
    /// Creates a request for ad-hoc SQL.
    pub fn sql(method: Method, sql: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            method,
            target: ExecTarget::Sql(sql.into()),
            args,
        }
    }

    /// Creates a request for a prepared statement.
    pub fn statement(method: Method, statement: StatementHandle, args: Vec<Arg>) -> Self {
        Self {
            method,
            target: ExecTarget::Statement(statement),
            args,
        }
    }

    /// The effective SQL text.
    pub fn sql_text(&self) -> &str {
        match &self.target {
            ExecTarget::Sql(sql) => sql,
            ExecTarget::Statement(statement) => &statement.sql,
        }
    }
}

/// Result of the local execution step.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecResult {
    /// Rows of an `All` request.
    Rows(Vec<Row>),
    /// Row of a `Get` request.
    Row(Option<Row>),
    /// Effect of a `Run` request.
    Run(RunInfo),
    /// `Exec` and `Bind` produce nothing.
    Done,
}

/// A completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutcome {
    /// The SQL that was executed.
    pub sql: String,
    /// What the engine returned.
    pub result: ExecResult,
}

/// Lock-relevant classification of a SQL text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementKind {
    /// Starts with `SELECT`.
    pub is_select: bool,
    /// Starts with `BEGIN`.
    pub is_begin: bool,
    /// Starts with `COMMIT`.
    pub is_commit: bool,
    /// Starts with `ROLLBACK`.
    pub is_rollback: bool,
}

fn starts_with_keyword(sql: &str, keyword: &str) -> bool {
    sql.get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
}

impl StatementKind {
    /// Classifies `sql` by its leading keyword, ignoring case and
    /// surrounding whitespace. Scripts run with [`Method::Exec`] are never
    /// reads.
    pub fn classify(method: Method, sql: &str) -> Self {
        let sql = sql.trim();
        Self {
            is_select: method != Method::Exec && starts_with_keyword(sql, "select"),
            is_begin: starts_with_keyword(sql, "begin"),
            is_commit: starts_with_keyword(sql, "commit"),
            is_rollback: starts_with_keyword(sql, "rollback"),
        }
    }
}

/// Interprets caller arguments as a parameter set.
///
/// A single list or map argument is the whole parameter set. Otherwise
/// every argument is one positional value.
///
/// # Errors
///
/// Returns `CoreError::InvalidParameters` if a list or map is mixed with
/// other arguments.
pub fn normalize_params(args: Vec<Arg>) -> CoreResult<Params> {
    let single = args.len() == 1;
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Arg::Value(value) => values.push(value),
            Arg::List(list) if single => return Ok(Params::Positional(list)),
            Arg::Map(map) if single => return Ok(Params::Named(map)),
            Arg::List(_) | Arg::Map(_) => {
                return Err(CoreError::invalid_parameters(
                    "a parameter list or map must be the only argument",
                ))
            }
        }
    }
    Ok(if values.is_empty() {
        Params::None
    } else {
        Params::Positional(values)
    })
}

type SharedConnection = Mutex<Option<Box<dyn EngineConnection>>>;

struct ExecutorInner {
    queue: OperationQueue,
    remote: Arc<dyn RemoteDatabase>,
    connector: Arc<dyn EngineConnector>,
    connection: SharedConnection,
    in_transaction: Mutex<bool>,
    max_retries: u32,
}

/// Runs requests against one shared database.
///
/// Cloning is cheap; clones share the queue, connection and transaction
/// state.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("queue", &self.inner.queue)
            .field("open", &self.inner.connection.lock().is_some())
            .field("in_transaction", &*self.inner.in_transaction.lock())
            .field("max_retries", &self.inner.max_retries)
            .finish()
    }
}

async fn open_database(inner: Arc<ExecutorInner>, use_cache: bool) -> CoreResult<()> {
    let path = inner.remote.pull_database(use_cache).await?;
    let mut connection = inner.connection.lock();
    if connection.is_none() {
        debug!(path = %path.display(), "opening local database");
        *connection = Some(inner.connector.open(&path)?);
    }
    Ok(())
}

fn not_open() -> CoreError {
    CoreError::engine("database is not open")
}

fn execute_local(
    connection: &mut dyn EngineConnection,
    method: Method,
    target: &ExecTarget,
    params: &Params,
) -> CoreResult<ExecResult> {
    match target {
        ExecTarget::Sql(sql) => match method {
            Method::All => connection.all(sql, params).map(ExecResult::Rows),
            Method::Get => connection.get(sql, params).map(ExecResult::Row),
            Method::Run => connection.run(sql, params).map(ExecResult::Run),
            Method::Exec => connection.exec(sql).map(|()| ExecResult::Done),
            Method::Bind => Err(CoreError::engine("bind requires a prepared statement")),
        },
        ExecTarget::Statement(statement) => match method {
            Method::All => connection
                .statement_all(statement.id, params)
                .map(ExecResult::Rows),
            Method::Get => connection
                .statement_get(statement.id, params)
                .map(ExecResult::Row),
            Method::Run => connection
                .statement_run(statement.id, params)
                .map(ExecResult::Run),
            Method::Bind => connection
                .statement_bind(statement.id, params)
                .map(|()| ExecResult::Done),
            Method::Exec => Err(CoreError::engine(
                "exec is not available on a prepared statement",
            )),
        },
    }
}

impl Executor {
    /// Creates an executor over a remote database and a local engine.
    pub fn new(
        remote: Arc<dyn RemoteDatabase>,
        connector: Arc<dyn EngineConnector>,
        max_retries: u32,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                queue: OperationQueue::new(),
                remote,
                connector,
                connection: Mutex::new(None),
                in_transaction: Mutex::new(false),
                max_retries,
            }),
        }
    }

    /// The remote side of this executor.
    pub fn remote(&self) -> &Arc<dyn RemoteDatabase> {
        &self.inner.remote
    }

    /// Returns true while a `BEGIN` holds the lock.
    pub fn in_transaction(&self) -> bool {
        *self.inner.in_transaction.lock()
    }

    /// Executes a request, re-running it when the remote database was
    /// updated underneath it.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. `RemoteDatabaseUpdated` is
    /// only returned once the retry budget is spent.
    pub async fn exec(&self, request: ExecRequest) -> CoreResult<ExecOutcome> {
        let sql = request.sql_text().to_string();
        if request.method == Method::Exec && !request.args.is_empty() {
            return Err(CoreError::invalid_parameters(
                "exec does not take parameters",
            ));
        }
        let params = normalize_params(request.args)?;
        let kind = StatementKind::classify(request.method, &sql);

        let mut attempt = 0;
        loop {
            match self
                .exec_once(request.method, &request.target, &params, kind)
                .await
            {
                Ok(result) => return Ok(ExecOutcome { sql, result }),
                Err(e) if e.is_remote_updated() && attempt < self.inner.max_retries => {
                    attempt += 1;
                    warn!(attempt, error = %e, "remote database was updated, retrying request");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn exec_once(
        &self,
        method: Method,
        target: &ExecTarget,
        params: &Params,
        kind: StatementKind,
    ) -> CoreResult<ExecResult> {
        let queue = &self.inner.queue;
        let mut before: Vec<Pending<()>> = Vec::new();
        let mut after: Vec<Pending<()>> = Vec::new();

        let result = {
            let mut in_transaction = self.inner.in_transaction.lock();
            let mut batch = queue.batch(queue.next_group());

            if !*in_transaction {
                if !kind.is_select {
                    let inner = Arc::clone(&self.inner);
                    before.push(batch.push(move || async move {
                        inner.remote.acquire_lock().await
                    }));
                    if kind.is_begin {
                        *in_transaction = true;
                    }
                }
                let inner = Arc::clone(&self.inner);
                let use_cache = kind.is_select;
                before.push(batch.push(move || open_database(inner, use_cache)));
            }

            let inner = Arc::clone(&self.inner);
            let target = target.clone();
            let params = params.clone();
            let result = batch.push(move || async move {
                let mut connection = inner.connection.lock();
                let connection = connection.as_mut().ok_or_else(not_open)?;
                execute_local(&mut **connection, method, &target, &params)
            });

            if !kind.is_select {
                if !*in_transaction || kind.is_commit {
                    let inner = Arc::clone(&self.inner);
                    after.push(batch.push(move || async move {
                        inner.remote.push_database().await
                    }));
                    let inner = Arc::clone(&self.inner);
                    after.push(batch.push(move || async move {
                        inner.remote.release_lock().await;
                        Ok(())
                    }));
                    *in_transaction = false;
                } else if kind.is_rollback {
                    let inner = Arc::clone(&self.inner);
                    after.push(batch.push(move || async move {
                        inner.remote.release_lock().await;
                        Ok(())
                    }));
                    *in_transaction = false;
                }
            }

            batch.submit();
            result
        };

        for step in before {
            step.wait().await?;
        }
        let result = result.wait().await?;
        for step in after {
            step.wait().await?;
        }
        Ok(result)
    }

    /// Prepares a statement, opening the local database first if needed.
    ///
    /// # Errors
    ///
    /// Returns pull, open or prepare errors.
    pub async fn prepare(&self, sql: &str, args: Vec<Arg>) -> CoreResult<StatementHandle> {
        let params = normalize_params(args)?;
        let queue = &self.inner.queue;
        let mut batch = queue.batch(queue.next_group());

        let open = if self.inner.connection.lock().is_none() {
            let inner = Arc::clone(&self.inner);
            Some(batch.push(move || open_database(inner, true)))
        } else {
            None
        };

        let inner = Arc::clone(&self.inner);
        let text = sql.to_string();
        let prepared = batch.push(move || async move {
            let mut connection = inner.connection.lock();
            let connection = connection.as_mut().ok_or_else(not_open)?;
            connection.prepare(&text, &params)
        });
        batch.submit();

        if let Some(open) = open {
            open.wait().await?;
        }
        Ok(StatementHandle {
            id: prepared.wait().await?,
            sql: sql.to_string(),
        })
    }

    /// Rewinds a prepared statement without going through the queue.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the database is closed or the statement
    /// was finalized.
    pub fn reset_statement(&self, statement: &StatementHandle) -> CoreResult<()> {
        self.with_connection(|connection| connection.statement_reset(statement.id))
    }

    /// Finalizes a prepared statement without going through the queue.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the database is closed or the statement
    /// was already finalized.
    pub fn finalize_statement(&self, statement: &StatementHandle) -> CoreResult<()> {
        self.with_connection(|connection| connection.statement_finalize(statement.id))
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut dyn EngineConnection) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let mut connection = self.inner.connection.lock();
        let connection = connection.as_mut().ok_or_else(not_open)?;
        f(&mut **connection)
    }

    /// Closes the local database once every earlier request has finished.
    ///
    /// # Errors
    ///
    /// Returns the engine's close error.
    pub async fn close(&self) -> CoreResult<()> {
        let queue = &self.inner.queue;
        let inner = Arc::clone(&self.inner);
        queue
            .enqueue(queue.next_group(), move || async move {
                let connection = inner.connection.lock().take();
                match connection {
                    Some(connection) => {
                        debug!("closing local database");
                        connection.close()
                    }
                    None => Ok(()),
                }
            })
            .wait()
            .await
    }
}
