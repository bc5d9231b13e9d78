use crate::types::RowValues;

/// A SQL string and its positional parameters, fully resolved by the caller.
///
/// The engine treats the text as opaque and binds `params` in order:
/// ```rust
/// use sql_dispatch::prelude::*;
///
/// let qp = QueryAndParams::new(
///     "INSERT INTO scores (player, points) VALUES (?1, ?2)",
///     vec![RowValues::Text("alice".into()), RowValues::Int(10)],
/// );
/// assert_eq!(qp.params.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAndParams {
    /// The SQL query string
    pub query: String,
    /// The parameters to be bound to the query
    pub params: Vec<RowValues>,
}

impl QueryAndParams {
    /// Create a new `QueryAndParams` with the given query string and parameters
    pub fn new(query: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }

    /// Create a new `QueryAndParams` with no parameters
    pub fn new_without_params(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Vec::new(),
        }
    }

    /// First line of the statement, trimmed for log fields.
    #[must_use]
    pub(crate) fn summary(&self) -> &str {
        let text = self.query.trim_start();
        let line = text.lines().next().unwrap_or_default();
        match line.char_indices().nth(120) {
            Some((idx, _)) => &line[..idx],
            None => line,
        }
    }
}

impl From<&str> for QueryAndParams {
    fn from(query: &str) -> Self {
        Self::new_without_params(query)
    }
}

impl From<String> for QueryAndParams {
    fn from(query: String) -> Self {
        Self::new_without_params(query)
    }
}
