use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_util::{TryStreamExt, pin_mut};
use serde_json::Value;
use tokio_postgres::{Client, Row};

use crate::driver::Interrupt;
use crate::error::SqlDispatchError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// Extracts a `RowValues` from a `tokio_postgres` Row at the given index.
///
/// # Errors
/// Returns `SqlDispatchError::PostgresError` if the column cannot be decoded.
pub fn postgres_extract_value(row: &Row, idx: usize) -> Result<RowValues, SqlDispatchError> {
    let type_name = row.columns()[idx].type_().name();

    let value = match type_name {
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Int(i64::from(v))),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)?
            .map_or(RowValues::Null, RowValues::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Float(f64::from(v))),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)?
            .map_or(RowValues::Null, RowValues::Float),
        "bool" => row
            .try_get::<_, Option<bool>>(idx)?
            .map_or(RowValues::Null, RowValues::Bool),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map_or(RowValues::Null, RowValues::Timestamp),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map_or(RowValues::Null, |v| RowValues::Timestamp(v.naive_utc())),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map_or(RowValues::Null, |v| {
                RowValues::Timestamp(v.and_time(chrono::NaiveTime::MIN))
            }),
        "json" | "jsonb" => row
            .try_get::<_, Option<Value>>(idx)?
            .map_or(RowValues::Null, RowValues::JSON),
        "bytea" => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map_or(RowValues::Null, RowValues::Blob),
        // text, varchar, bpchar, name and anything else readable as a string
        _ => row
            .try_get::<_, Option<String>>(idx)?
            .map_or(RowValues::Null, RowValues::Text),
    };
    Ok(value)
}

/// Prepare, stream and materialize a row-returning statement.
///
/// Rows are pulled one at a time so a release can stop the read between rows.
///
/// # Errors
/// Returns the tokio-postgres error for prepare/bind/read failures, or
/// `SqlDispatchError::Interrupted` if the connection was released mid-read.
pub async fn build_result_set(
    client: &Client,
    query: &str,
    params: &[RowValues],
    interrupt: Interrupt<'_>,
) -> Result<ResultSet, SqlDispatchError> {
    let stmt = client.prepare(query).await?;
    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect(),
    );
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(column_names);

    let stream = client.query_raw(&stmt, params.iter()).await?;
    pin_mut!(stream);
    loop {
        interrupt.check()?;
        let Some(row) = stream.try_next().await? else {
            break;
        };
        let mut row_values = Vec::with_capacity(col_count);
        for idx in 0..col_count {
            row_values.push(postgres_extract_value(&row, idx)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}
