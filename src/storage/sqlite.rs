//! SQLite engine adapter.
//!
//! [`SqliteConnection`] implements [`DbConnection`] over a single
//! `rusqlite::Connection`. Statements are prepared through the connection's
//! statement cache, so repeating a synthesized template is cheap.

use crate::config::OrmConfig;
use crate::error::Result;
use crate::storage::connection::{DbConnection, Parameters, Row, RowSet};
use crate::value::SqlValue;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

/// SQLite-backed connection.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Open a database file, creating it and its parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the connection
    /// cannot be configured.
    pub fn open(path: &Path, config: &OrmConfig) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!(path = %path.display(), journal_mode = %mode, "Opened database");
        }
        conn.pragma_update(None, "foreign_keys", config.enforce_foreign_keys)?;
        Ok(Self { conn })
    }

    /// Open a private in-memory database with foreign keys enforced.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self { conn })
    }

    /// The underlying rusqlite connection.
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn named(params: &Parameters) -> Vec<(&str, &dyn ToSql)> {
    params.iter().map(|(name, value)| (name, value as &dyn ToSql)).collect()
}

fn quote_savepoint(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl DbConnection for SqliteConnection {
    fn execute(&self, sql: &str, params: &Parameters) -> Result<usize> {
        debug!(sql, "Executing statement");
        let mut stmt = self.conn.prepare_cached(sql)?;
        Ok(stmt.execute(named(params).as_slice())?)
    }

    fn query(&self, sql: &str, params: &Parameters) -> Result<RowSet> {
        debug!(sql, "Running query");
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
        let bound = named(params);
        let mut rows = stmt.query(bound.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(SqlValue::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            out.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(RowSet {
            columns: columns.to_vec(),
            rows: out,
        })
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        debug!(sql, "Executing batch");
        Ok(self.conn.execute_batch(sql)?)
    }

    fn begin(&self) -> Result<()> {
        Ok(self.conn.execute_batch("BEGIN IMMEDIATE")?)
    }

    fn commit(&self) -> Result<()> {
        Ok(self.conn.execute_batch("COMMIT")?)
    }

    fn rollback(&self) -> Result<()> {
        Ok(self.conn.execute_batch("ROLLBACK")?)
    }

    fn savepoint(&self, name: &str) -> Result<()> {
        Ok(self.conn.execute_batch(&format!("SAVEPOINT {}", quote_savepoint(name)))?)
    }

    fn release(&self, name: &str) -> Result<()> {
        Ok(self.conn.execute_batch(&format!("RELEASE {}", quote_savepoint(name)))?)
    }

    fn rollback_to(&self, name: &str) -> Result<()> {
        let name = quote_savepoint(name);
        Ok(self
            .conn
            .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?)
    }

    fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }
}
