//! Database facade.

use crate::address::DatabaseAddress;
use crate::config::Config;
use crate::engine::{Arg, EngineConnector, Row};
use crate::error::CoreResult;
use crate::executor::{ExecRequest, ExecResult, Executor, Method};
use crate::remote::{LockStatus, RemoteSync};
use crate::statement::{unexpected, Statement};
use s3lite_store::ObjectStoreClient;
use std::sync::Arc;
use tracing::debug;

/// Effect of [`Database::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Rowid of the last inserted row.
    pub last_id: i64,
    /// Number of rows changed.
    pub changes: u64,
    /// The executed SQL.
    pub sql: String,
}

/// A SQLite database shared through an object store.
///
/// Every call is queued; calls on one `Database` run one at a time in the
/// order they were made. Reads use the local copy when it was checked within
/// [`Config::remote_database_cache_time`]. Writes lock the remote database,
/// work on a fresh copy and upload it before unlocking.
///
/// # Example
///
/// ```rust
/// use s3lite_core::{params, Config, Database, SqliteConnector, Value};
/// use s3lite_store::MemoryObjectStore;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> s3lite_core::CoreResult<()> {
/// # let dir = tempfile::tempdir()?;
/// let db = Database::open_with_backends(
///     "s3://my-bucket/app.sqlite",
///     Config::new().local_file_path(dir.path()).allow_missing(true),
///     Arc::new(MemoryObjectStore::new()),
///     Arc::new(SqliteConnector),
/// )?;
///
/// db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
///     .await?;
/// db.run("INSERT INTO users (name) VALUES (?)", params!["ada"]).await?;
///
/// let user = db.get("SELECT name FROM users", params![]).await?.unwrap();
/// assert_eq!(user.get("name"), Some(&Value::Text("ada".into())));
/// db.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Database {
    executor: Executor,
    address: DatabaseAddress,
}

impl Database {
    /// Opens a database stored in Amazon S3, using the bundled SQLite
    /// engine.
    ///
    /// Credentials come from the standard AWS environment variables. The
    /// region named by the address wins over [`Config::region`].
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` for an invalid configuration or when no
    /// region is known, and `CoreError::InvalidAddress` for an unparseable
    /// address.
    #[cfg(all(feature = "aws", feature = "sqlite"))]
    pub fn open(address: &str, config: Config) -> CoreResult<Self> {
        config.validate()?;
        let parsed = DatabaseAddress::parse(address)?;
        let region = parsed.resolve_region(config.region.as_deref())?;
        let store = s3lite_store::ObjectStoreAdapter::s3(&parsed.bucket, &region)?;
        Self::open_with_backends(
            address,
            config,
            Arc::new(store),
            Arc::new(crate::engine::SqliteConnector),
        )
    }

    /// Opens a database over an arbitrary store and engine.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` for an invalid configuration and
    /// `CoreError::InvalidAddress` for an unparseable address.
    pub fn open_with_backends(
        address: &str,
        config: Config,
        store: Arc<dyn ObjectStoreClient>,
        connector: Arc<dyn EngineConnector>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let address = DatabaseAddress::parse(address)?;
        debug!(bucket = %address.bucket, key = %address.key, "opening shared database");

        let remote = Arc::new(RemoteSync::new(store, &address, &config));
        Ok(Self {
            executor: Executor::new(
                remote,
                connector,
                config.max_retry_on_remote_database_updated,
            ),
            address,
        })
    }

    /// The parsed address of this database.
    pub fn address(&self) -> &DatabaseAddress {
        &self.address
    }

    async fn exec_sql(
        &self,
        method: Method,
        sql: &str,
        args: Vec<Arg>,
    ) -> CoreResult<ExecResult> {
        let outcome = self
            .executor
            .exec(ExecRequest::sql(method, sql, args))
            .await?;
        Ok(outcome.result)
    }

    /// Runs a query and returns every row.
    pub async fn all(&self, sql: &str, args: Vec<Arg>) -> CoreResult<Vec<Row>> {
        match self.exec_sql(Method::All, sql, args).await? {
            ExecResult::Rows(rows) => Ok(rows),
            other => Err(unexpected(&other)),
        }
    }

    /// Runs a query and returns its first row.
    pub async fn get(&self, sql: &str, args: Vec<Arg>) -> CoreResult<Option<Row>> {
        match self.exec_sql(Method::Get, sql, args).await? {
            ExecResult::Row(row) => Ok(row),
            other => Err(unexpected(&other)),
        }
    }

    /// Executes one statement and reports its effect.
    pub async fn run(&self, sql: &str, args: Vec<Arg>) -> CoreResult<RunResult> {
        let outcome = self
            .executor
            .exec(ExecRequest::sql(Method::Run, sql, args))
            .await?;
        match outcome.result {
            ExecResult::Run(info) => Ok(RunResult {
                last_id: info.last_id,
                changes: info.changes,
                sql: outcome.sql,
            }),
            other => Err(unexpected(&other)),
        }
    }

    /// Executes a script of one or more statements. Always treated as a
    /// write.
    pub async fn exec(&self, sql: &str) -> CoreResult<&Self> {
        self.exec_sql(Method::Exec, sql, Vec::new()).await?;
        Ok(self)
    }

    /// Prepares a statement for repeated use.
    pub async fn prepare(&self, sql: &str, args: Vec<Arg>) -> CoreResult<Statement> {
        let handle = self.executor.prepare(sql, args).await?;
        Ok(Statement::new(self.executor.clone(), handle))
    }

    /// Closes the local database after all earlier calls have finished.
    pub async fn close(&self) -> CoreResult<&Self> {
        self.executor.close().await?;
        Ok(self)
    }

    /// Reads the remote lock object.
    pub async fn lock_status(&self) -> CoreResult<LockStatus> {
        self.executor.remote().lock_status().await
    }
}
