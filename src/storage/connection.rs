//! Abstract engine contract.
//!
//! Everything above this layer talks to the database only through
//! [`DbConnection`], bound [`Parameters`] and materialized [`RowSet`]s.

use crate::error::Result;
use crate::value::{SqlValue, StorageAffinity};
use std::sync::Arc;

/// Ordered collection of named statement parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    entries: Vec<(String, SqlValue)>,
}

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value to a named placeholder (`:name`), replacing any earlier binding.
    pub fn bind(&mut self, name: impl Into<String>, value: SqlValue) -> &mut Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Append every binding of `other`.
    pub fn extend(&mut self, other: Self) {
        for (name, value) in other.entries {
            self.bind(name, value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    #[must_use]
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|i| self.values.get(i))
    }

    /// Storage affinity of a cell, `None` for NULL or out of range.
    #[must_use]
    pub fn affinity(&self, index: usize) -> Option<StorageAffinity> {
        self.values.get(index).and_then(SqlValue::affinity)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fully read result of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, for scalar queries.
    #[must_use]
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first().and_then(|r| r.get(0))
    }
}

impl IntoIterator for RowSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Connection capability consumed by the migrator and sessions.
pub trait DbConnection {
    /// Execute a statement, returning the number of changed rows.
    ///
    /// # Errors
    ///
    /// Returns `Database` on engine failure.
    fn execute(&self, sql: &str, params: &Parameters) -> Result<usize>;

    /// Run a query and read every row.
    ///
    /// # Errors
    ///
    /// Returns `Database` on engine failure.
    fn query(&self, sql: &str, params: &Parameters) -> Result<RowSet>;

    /// Execute several parameterless statements.
    ///
    /// # Errors
    ///
    /// Returns `Database` on engine failure.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Database` if a transaction is already open.
    fn begin(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Database` if the commit fails.
    fn commit(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Database` if no transaction is open.
    fn rollback(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Database` on engine failure.
    fn savepoint(&self, name: &str) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Database` if the savepoint does not exist.
    fn release(&self, name: &str) -> Result<()>;

    /// Roll back to and release a savepoint.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the savepoint does not exist.
    fn rollback_to(&self, name: &str) -> Result<()>;

    /// Key assigned by the engine to the most recent insert.
    fn last_insert_rowid(&self) -> i64;
}
