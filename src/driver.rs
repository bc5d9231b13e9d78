use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::SqlDispatchError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

/// Read-only view of a connection's release flag, polled while rows are read.
#[derive(Clone, Copy)]
pub struct Interrupt<'a> {
    flag: &'a AtomicBool,
}

impl<'a> Interrupt<'a> {
    pub(crate) fn new(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once the connection has been released.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::Interrupted`] when the flag is set.
    pub fn check(&self) -> Result<(), SqlDispatchError> {
        if self.is_set() {
            Err(SqlDispatchError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Native database capability for one backend.
///
/// Everything except [`Driver::resolve_target`] runs on the worker thread.
pub trait Driver: Send + Sync + 'static {
    /// Open native connection.
    type Handle: Send + 'static;

    fn kind(&self) -> DatabaseType;

    /// Turn a caller-supplied target (file name, URL, ...) into the connection
    /// string used as the registry key.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::ConfigError`] for targets the backend refuses.
    fn resolve_target(&self, target: &str) -> Result<String, SqlDispatchError>;

    /// Reject statement types the backend never runs for callers.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::DeniedStatement`] for denied statements.
    fn check_statement(&self, _query: &str) -> Result<(), SqlDispatchError> {
        Ok(())
    }

    /// # Errors
    /// Returns the native driver error when the connection cannot be opened.
    fn open(&self, connection_string: &str) -> Result<Self::Handle, SqlDispatchError>;

    /// Whether an open handle is still usable. Dead handles are reopened by the next job.
    fn is_alive(&self, _handle: &mut Self::Handle) -> bool {
        true
    }

    /// Run a row-returning statement and materialize every row.
    ///
    /// Implementations poll `interrupt` per row and give up with
    /// [`SqlDispatchError::Interrupted`], discarding what was read.
    ///
    /// # Errors
    /// Returns the native driver error for prepare/bind/step failures.
    fn query(
        &self,
        handle: &mut Self::Handle,
        query: &str,
        params: &[RowValues],
        interrupt: Interrupt<'_>,
    ) -> Result<ResultSet, SqlDispatchError>;

    /// Run a non-query statement and return the affected row count.
    ///
    /// # Errors
    /// Returns the native driver error for prepare/bind/execute failures.
    fn execute(
        &self,
        handle: &mut Self::Handle,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlDispatchError>;

    /// Last inserted row id for this session, if the backend can tell.
    fn last_insert_id(&self, handle: &mut Self::Handle) -> Option<i64>;
}
