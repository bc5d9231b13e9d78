use std::fmt;

use tokio::runtime::{Builder, Runtime};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, warn};

use crate::driver::{Driver, Interrupt};
use crate::error::SqlDispatchError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

use super::params::Params;
use super::query::build_result_set;

/// One native session: a client plus the runtime that drives its connection task.
pub struct PgHandle {
    client: Client,
    runtime: Option<Runtime>,
    last_insert_id: Option<i64>,
}

impl PgHandle {
    fn block_on<F: Future>(&self, fut: F) -> Result<F::Output, SqlDispatchError> {
        match &self.runtime {
            Some(rt) => Ok(rt.block_on(fut)),
            None => Err(SqlDispatchError::ConnectionError("runtime already shut down".into())),
        }
    }
}

impl Drop for PgHandle {
    fn drop(&mut self) {
        // Handles may be dropped from inside a host runtime; a blocking shutdown would panic there.
        if let Some(rt) = self.runtime.take() {
            rt.shutdown_background();
        }
    }
}

impl fmt::Debug for PgHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgHandle")
            .field("closed", &self.client.is_closed())
            .field("last_insert_id", &self.last_insert_id)
            .finish_non_exhaustive()
    }
}

/// PostgreSQL backend on tokio-postgres.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Driver for PostgresDriver {
    type Handle = PgHandle;

    fn kind(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn resolve_target(&self, target: &str) -> Result<String, SqlDispatchError> {
        let target = target.trim();
        let config: Config = target
            .parse()
            .map_err(|err| SqlDispatchError::ConfigError(format!("invalid connection string: {err}")))?;
        if config.get_hosts().is_empty() {
            return Err(SqlDispatchError::ConfigError("host is required".to_string()));
        }
        Ok(target.to_string())
    }

    fn open(&self, connection_string: &str) -> Result<PgHandle, SqlDispatchError> {
        let config: Config = connection_string
            .parse()
            .map_err(|err| SqlDispatchError::ConfigError(format!("invalid connection string: {err}")))?;
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (client, connection) = runtime.block_on(config.connect(NoTls))?;
        // Driven whenever the worker blocks on this runtime.
        runtime.spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection task ended");
            }
        });
        debug!(
            dbname = config.get_dbname().unwrap_or_default(),
            "postgres connection opened"
        );
        Ok(PgHandle {
            client,
            runtime: Some(runtime),
            last_insert_id: None,
        })
    }

    fn is_alive(&self, handle: &mut PgHandle) -> bool {
        handle.runtime.is_some() && !handle.client.is_closed()
    }

    fn query(
        &self,
        handle: &mut PgHandle,
        query: &str,
        params: &[RowValues],
        interrupt: Interrupt<'_>,
    ) -> Result<ResultSet, SqlDispatchError> {
        handle.block_on(build_result_set(&handle.client, query, params, interrupt))?
    }

    fn execute(
        &self,
        handle: &mut PgHandle,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlDispatchError> {
        let converted = Params::convert(params);
        let rows = handle.block_on(handle.client.execute(query, converted.as_refs()))??;
        handle.last_insert_id = if is_insert(query) {
            // lastval() errors when no sequence was used in this session.
            handle
                .block_on(handle.client.query_one("SELECT lastval()", &[]))?
                .ok()
                .and_then(|row| row.try_get::<_, i64>(0).ok())
        } else {
            None
        };
        usize::try_from(rows).map_err(|e| {
            SqlDispatchError::ExecutionError(format!("postgres affected rows conversion error: {e}"))
        })
    }

    fn last_insert_id(&self, handle: &mut PgHandle) -> Option<i64> {
        handle.last_insert_id
    }
}

fn is_insert(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_validated_by_parsing() {
        let driver = PostgresDriver::new();
        assert_eq!(
            driver
                .resolve_target(" postgresql://svc@localhost:5432/stats ")
                .unwrap(),
            "postgresql://svc@localhost:5432/stats"
        );
        assert!(driver.resolve_target("host=localhost dbname=x").is_ok());
        assert!(matches!(
            driver.resolve_target("port=notaport"),
            Err(SqlDispatchError::ConfigError(_))
        ));
        assert!(matches!(
            driver.resolve_target("dbname=x"),
            Err(SqlDispatchError::ConfigError(_))
        ));
    }

    #[test]
    fn insert_detection_ignores_case_and_whitespace() {
        assert!(is_insert("  InSeRt INTO t VALUES (1)"));
        assert!(!is_insert("UPDATE t SET a = 1"));
        assert!(!is_insert("ins"));
    }
}
