use serde::Deserialize;

use crate::error::SqlDispatchError;

/// Discrete connection settings, rendered into a libpq key/value string.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PostgresConnectParams {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub dbname: String,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    5432
}

impl PostgresConnectParams {
    #[must_use]
    pub fn new(host: impl Into<String>, dbname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            dbname: dbname.into(),
            user: user.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Render as `host='..' port=.. dbname='..' user='..' [password='..']`.
    ///
    /// # Errors
    /// Returns [`SqlDispatchError::ConfigError`] if host, dbname or user is empty.
    pub fn to_connection_string(&self) -> Result<String, SqlDispatchError> {
        for (field, value) in [("host", &self.host), ("dbname", &self.dbname), ("user", &self.user)] {
            if value.trim().is_empty() {
                return Err(SqlDispatchError::ConfigError(format!("{field} is required")));
            }
        }
        let mut out = format!(
            "host={} port={} dbname={} user={}",
            quote(&self.host),
            self.port,
            quote(&self.dbname),
            quote(&self.user)
        );
        if let Some(password) = &self.password {
            out.push_str(" password=");
            out.push_str(&quote(password));
        }
        Ok(out)
    }
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}
