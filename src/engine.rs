use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineOptions;
use crate::connection::ConnectionRef;
use crate::driver::Driver;
use crate::error::SqlDispatchError;
use crate::job::JobKind;
use crate::owner::Owner;
use crate::query::QueryAndParams;
use crate::registry::ConnectionRegistry;
use crate::results::ResultSet;
use crate::scheduler::MainScheduler;
use crate::worker::WorkQueue;

/// Asynchronous SQL engine for one backend.
///
/// Jobs run one at a time, in submission order, on a dedicated worker thread.
/// Completions are handed to the injected [`MainScheduler`], so callbacks only
/// ever run on the host thread.
///
/// Failed jobs resolve with `None` rows or a `0` count; the cause is logged
/// through `tracing`, attributed to the connection's owner.
pub struct QueryEngine<D: Driver> {
    driver: Arc<D>,
    registry: ConnectionRegistry<D::Handle>,
    queue: WorkQueue<D::Handle>,
}

impl<D: Driver> QueryEngine<D> {
    /// Start the worker thread.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::ConnectionError`] if the thread cannot be spawned.
    pub fn start(
        driver: D,
        scheduler: Arc<dyn MainScheduler>,
        options: EngineOptions,
    ) -> Result<Self, SqlDispatchError> {
        let driver = Arc::new(driver);
        let queue = WorkQueue::spawn(Arc::clone(&driver), scheduler, &options)?;
        Ok(Self {
            driver,
            registry: ConnectionRegistry::new(),
            queue,
        })
    }

    /// Register a connection for `owner`. Host thread only.
    ///
    /// The native link is opened lazily by the first job. Opening the same
    /// target twice for one owner returns the existing connection.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::ConfigError`] when the backend rejects `target`.
    pub fn open(
        &self,
        target: &str,
        owner: &Arc<dyn Owner>,
        persistent: bool,
    ) -> Result<ConnectionRef<D::Handle>, SqlDispatchError> {
        let connection_string = self.driver.resolve_target(target)?;
        Ok(self.registry.open(&connection_string, owner, persistent))
    }

    /// Unregister and close a connection. Host thread only; idempotent.
    pub fn close(&self, connection: &ConnectionRef<D::Handle>) {
        self.registry.close(connection);
    }

    /// Queue a row-returning statement.
    ///
    /// # Errors
    /// [`SqlDispatchError::NullTarget`] if `connection` is no longer registered,
    /// [`SqlDispatchError::ConnectionError`] after shutdown.
    pub fn query<F>(
        &self,
        sql: impl Into<QueryAndParams>,
        connection: &ConnectionRef<D::Handle>,
        on_rows: F,
    ) -> Result<u64, SqlDispatchError>
    where
        F: FnOnce(Option<ResultSet>) + Send + 'static,
    {
        self.submit(sql.into(), connection, JobKind::Rows(Box::new(on_rows)))
    }

    /// Queue an insert/update/delete/DDL statement.
    ///
    /// # Errors
    /// [`SqlDispatchError::NullTarget`] if `connection` is no longer registered,
    /// [`SqlDispatchError::ConnectionError`] after shutdown.
    pub fn execute_non_query<F>(
        &self,
        sql: impl Into<QueryAndParams>,
        connection: &ConnectionRef<D::Handle>,
        on_affected: F,
    ) -> Result<u64, SqlDispatchError>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.submit(sql.into(), connection, JobKind::NonQuery(Box::new(on_affected)))
    }

    /// Queue an INSERT. Read [`ConnectionRef::last_insert_row_id`] inside the callback.
    ///
    /// # Errors
    /// See [`QueryEngine::execute_non_query`].
    pub fn insert<F>(
        &self,
        sql: impl Into<QueryAndParams>,
        connection: &ConnectionRef<D::Handle>,
        on_affected: F,
    ) -> Result<u64, SqlDispatchError>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.execute_non_query(sql, connection, on_affected)
    }

    /// Queue an UPDATE.
    ///
    /// # Errors
    /// See [`QueryEngine::execute_non_query`].
    pub fn update<F>(
        &self,
        sql: impl Into<QueryAndParams>,
        connection: &ConnectionRef<D::Handle>,
        on_affected: F,
    ) -> Result<u64, SqlDispatchError>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.execute_non_query(sql, connection, on_affected)
    }

    /// Queue a DELETE.
    ///
    /// # Errors
    /// See [`QueryEngine::execute_non_query`].
    pub fn delete<F>(
        &self,
        sql: impl Into<QueryAndParams>,
        connection: &ConnectionRef<D::Handle>,
        on_affected: F,
    ) -> Result<u64, SqlDispatchError>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        self.execute_non_query(sql, connection, on_affected)
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry<D::Handle> {
        &self.registry
    }

    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Jobs submitted but not yet picked up by the worker.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.queue.pending()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.queue.is_accepting()
    }

    /// Drain queued jobs, join the worker, and close every registered connection.
    ///
    /// Completions of drained jobs are already scheduled when this returns.
    /// Later submissions fail. Calling it again does nothing.
    pub fn shutdown(&self) {
        if !self.queue.is_accepting() {
            return;
        }
        debug!(backend = %self.driver.kind(), pending = self.pending_jobs(), "engine shutting down");
        self.queue.shutdown();
        self.registry.close_all();
    }

    fn submit(
        &self,
        sql: QueryAndParams,
        connection: &ConnectionRef<D::Handle>,
        kind: JobKind,
    ) -> Result<u64, SqlDispatchError> {
        if connection.is_released() {
            return Err(SqlDispatchError::NullTarget(format!(
                "connection {} ({}) is closed",
                connection.id(),
                connection.connection_string()
            )));
        }
        self.queue.enqueue(sql, connection.clone(), kind)
    }
}

impl<D: Driver> Drop for QueryEngine<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: Driver> fmt::Debug for QueryEngine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEngine")
            .field("backend", &self.driver.kind())
            .field("connections", &self.registry.len())
            .field("pending_jobs", &self.pending_jobs())
            .field("running", &self.is_running())
            .finish()
    }
}
