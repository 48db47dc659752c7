use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::error::Result;
use crate::value::Value;

/// One result row: shared column labels plus wire values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Value of the named column; `None` when the column is absent from the
    /// row (distinct from a present SQL NULL).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.column_index(name).map(|index| &self.values[index])
    }
}

/// Lazily yielded result rows.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;
