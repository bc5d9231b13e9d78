use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::SqlDispatchError;

/// Options for the file-backed `SQLite` backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SqliteOptions {
    /// Every database file must resolve inside this directory.
    pub data_dir: PathBuf,
    /// Switch new connections to WAL journaling.
    pub journal_wal: bool,
    /// How long a statement waits on a locked database before failing.
    #[serde(with = "millis")]
    pub busy_timeout: Duration,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_wal(mut self, journal_wal: bool) -> Self {
        self.journal_wal = journal_wal;
        self
    }

    /// Resolve `file` against the data directory, refusing anything outside it.
    ///
    /// Resolution is lexical: `.` and `..` are folded without touching the
    /// filesystem, so the file does not need to exist yet.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::ConfigError`] for empty names or paths that escape `data_dir`.
    pub fn resolve_path(&self, file: &str) -> Result<PathBuf, SqlDispatchError> {
        let file = file.trim();
        if file.is_empty() {
            return Err(SqlDispatchError::ConfigError(
                "SQLite file name is empty".to_string(),
            ));
        }
        let root = normalize(&self.data_dir);
        let candidate = normalize(&root.join(file));
        if candidate == root || !candidate.starts_with(&root) {
            return Err(SqlDispatchError::ConfigError(format!(
                "only access to the data directory is allowed: {file}"
            )));
        }
        Ok(candidate)
    }
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            journal_wal: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            opts: SqliteOptions::new(data_dir),
        }
    }

    #[must_use]
    pub fn wal(mut self, journal_wal: bool) -> Self {
        self.opts.journal_wal = journal_wal;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build the driver, creating the data directory if needed.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::Io`] if the data directory cannot be created.
    pub fn build(self) -> Result<super::SqliteDriver, SqlDispatchError> {
        super::SqliteDriver::new(self.finish())
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> SqliteOptions {
        SqliteOptions::new("/srv/host/data")
    }

    #[test]
    fn relative_names_resolve_inside_data_dir() {
        let path = opts().resolve_path("stats.db").unwrap();
        assert_eq!(path, PathBuf::from("/srv/host/data/stats.db"));

        let nested = opts().resolve_path("./plugins/../kits/kits.db").unwrap();
        assert_eq!(nested, PathBuf::from("/srv/host/data/kits/kits.db"));
    }

    #[test]
    fn escaping_paths_are_rejected() {
        for bad in ["../secrets.db", "kits/../../x.db", "/etc/passwd", "", "  ", "."] {
            assert!(
                matches!(opts().resolve_path(bad), Err(SqlDispatchError::ConfigError(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn absolute_paths_inside_data_dir_are_allowed() {
        let path = opts().resolve_path("/srv/host/data/a.db").unwrap();
        assert_eq!(path, PathBuf::from("/srv/host/data/a.db"));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let parsed: SqliteOptions =
            serde_json::from_str(r#"{"data_dir":"/tmp/x","busy_timeout":250}"#).unwrap();
        assert_eq!(parsed.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(parsed.busy_timeout, Duration::from_millis(250));
        assert!(parsed.journal_wal);

        let built = SqliteOptionsBuilder::new("/tmp/y").wal(false).finish();
        assert!(!built.journal_wal);
    }
}
