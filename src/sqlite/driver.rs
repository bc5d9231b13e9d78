use std::fs;
use std::path::Path;

use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, warn};

use crate::driver::{Driver, Interrupt};
use crate::error::SqlDispatchError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

use super::config::SqliteOptions;
use super::params::Params;
use super::query::build_result_set;

// Statement start (input start or after `;`), optional comments, then the keyword.
const ATTACH_DETACH: &str =
    r"(?is)(?:^|;)\s*(?:(?:--[^\n]*(?:\n|$)|/\*.*?\*/)\s*)*(?:ATTACH|DETACH)\b";

/// File-backed `SQLite` backend on rusqlite.
#[derive(Debug)]
pub struct SqliteDriver {
    options: SqliteOptions,
    denylist: Regex,
}

impl SqliteDriver {
    /// Create the driver, creating the data directory if it does not exist.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::Io`] if the data directory cannot be created.
    pub fn new(options: SqliteOptions) -> Result<Self, SqlDispatchError> {
        fs::create_dir_all(&options.data_dir)?;
        let denylist = Regex::new(ATTACH_DETACH)
            .map_err(|err| SqlDispatchError::ConfigError(format!("denylist pattern: {err}")))?;
        Ok(Self { options, denylist })
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

impl Driver for SqliteDriver {
    type Handle = Connection;

    fn kind(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn resolve_target(&self, target: &str) -> Result<String, SqlDispatchError> {
        let path = self.options.resolve_path(target)?;
        path.to_str().map(str::to_string).ok_or_else(|| {
            SqlDispatchError::ConfigError(format!("path is not valid UTF-8: {}", path.display()))
        })
    }

    fn check_statement(&self, query: &str) -> Result<(), SqlDispatchError> {
        if self.denylist.is_match(query) {
            return Err(SqlDispatchError::DeniedStatement(
                "ATTACH and DETACH are not allowed".to_string(),
            ));
        }
        Ok(())
    }

    fn open(&self, connection_string: &str) -> Result<Connection, SqlDispatchError> {
        if let Some(parent) = Path::new(connection_string).parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(connection_string)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        if self.options.journal_wal {
            let mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                warn!(path = connection_string, mode = %mode, "WAL journaling unavailable");
            }
        }
        debug!(path = connection_string, "sqlite connection opened");
        Ok(conn)
    }

    fn query(
        &self,
        handle: &mut Connection,
        query: &str,
        params: &[RowValues],
        interrupt: Interrupt<'_>,
    ) -> Result<ResultSet, SqlDispatchError> {
        let params = Params::convert(params);
        let mut stmt = handle.prepare_cached(query)?;
        build_result_set(&mut stmt, &params, interrupt)
    }

    fn execute(
        &self,
        handle: &mut Connection,
        query: &str,
        params: &[RowValues],
    ) -> Result<usize, SqlDispatchError> {
        let params = Params::convert(params);
        let mut stmt = handle.prepare_cached(query)?;
        Ok(stmt.execute(&params.as_refs()[..])?)
    }

    fn last_insert_id(&self, handle: &mut Connection) -> Option<i64> {
        Some(handle.last_insert_rowid())
    }
}
