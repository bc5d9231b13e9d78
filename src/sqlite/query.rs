use std::sync::Arc;

use rusqlite::Statement;
use rusqlite::types::Value;

use crate::driver::Interrupt;
use crate::error::SqlDispatchError;
use crate::results::ResultSet;
use crate::types::RowValues;

use super::params::Params;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
/// Returns `SqlDispatchError::SqliteError` if the value cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row, idx: usize) -> Result<RowValues, SqlDispatchError> {
    let value: Value = row.get(idx)?;
    Ok(match value {
        Value::Null => RowValues::Null,
        Value::Integer(i) => RowValues::Int(i),
        Value::Real(f) => RowValues::Float(f),
        Value::Text(s) => RowValues::Text(s),
        Value::Blob(b) => RowValues::Blob(b),
    })
}

/// Step through a prepared statement and materialize every row.
///
/// The release flag is checked before each row; a set flag abandons the read.
///
/// # Errors
/// Returns the rusqlite error for bind/step failures, or
/// `SqlDispatchError::Interrupted` if the connection was released mid-read.
pub fn build_result_set(
    stmt: &mut Statement<'_>,
    params: &Params,
    interrupt: Interrupt<'_>,
) -> Result<ResultSet, SqlDispatchError> {
    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    );
    let col_count = column_names.len();

    let mut rows = stmt.query(&params.as_refs()[..])?;
    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(column_names);

    loop {
        interrupt.check()?;
        let Some(row) = rows.next()? else { break };
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}
