use std::collections::HashMap;
use std::sync::Arc;

use super::row::{CustomDbRow, index_columns};
use crate::types::RowValues;

/// Rows materialized by a read job.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<CustomDbRow>,
    /// Number of rows materialized
    pub rows_affected: usize,
    column_names: Option<Arc<Vec<String>>>,
    column_index: Option<Arc<HashMap<String, usize>>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            ..ResultSet::default()
        }
    }

    /// Set the column names shared by every row added afterwards.
    pub fn set_column_names(&mut self, column_names: Arc<Vec<String>>) {
        self.column_index = Some(Arc::new(index_columns(&column_names)));
        self.column_names = Some(column_names);
    }

    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    /// Add a row using the shared column names. Ignored until column names are set.
    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        if let (Some(names), Some(index)) = (&self.column_names, &self.column_index) {
            self.results.push(CustomDbRow::with_index(
                Arc::clone(names),
                Arc::clone(index),
                row_values,
            ));
            self.rows_affected += 1;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_column_names() {
        let mut rs = ResultSet::with_capacity(2);
        rs.add_row_values(vec![RowValues::Int(0)]);
        assert!(rs.is_empty(), "rows without column names are dropped");

        rs.set_column_names(Arc::new(vec!["n".into()]));
        rs.add_row_values(vec![RowValues::Int(1)]);
        rs.add_row_values(vec![RowValues::Int(2)]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.rows_affected, 2);
        assert!(Arc::ptr_eq(
            &rs.results[0].column_names,
            &rs.results[1].column_names
        ));
        assert_eq!(rs.results[1].get("n"), Some(&RowValues::Int(2)));
    }
}
