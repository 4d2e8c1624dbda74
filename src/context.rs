//! Database context.
//!
//! Owns the finalized schema and the configuration, and hands out sessions.
//! Every session opened through [`DbContext::open_session`] starts from a
//! migrated database.

use crate::config::OrmConfig;
use crate::error::{Error, Result};
use crate::schema::SqliteDbSchema;
use crate::storage::{DbConnection, MigrationReport, SchemaMigrator, Session, SqliteConnection};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct DbContext {
    schema: Arc<SqliteDbSchema>,
    config: OrmConfig,
}

impl DbContext {
    #[must_use]
    pub const fn new(schema: Arc<SqliteDbSchema>, config: OrmConfig) -> Self {
        Self { schema, config }
    }

    #[must_use]
    pub const fn schema(&self) -> &Arc<SqliteDbSchema> {
        &self.schema
    }

    #[must_use]
    pub const fn config(&self) -> &OrmConfig {
        &self.config
    }

    /// Database file sessions are opened on.
    ///
    /// # Errors
    ///
    /// Returns `Config` if no path is configured and no home directory exists.
    pub fn database_path(&self) -> Result<PathBuf> {
        self.config
            .database_path()
            .ok_or_else(|| Error::Config("no database path and no home directory".into()))
    }

    /// Open the configured database, migrate it, and start a session.
    ///
    /// # Errors
    ///
    /// Returns `Config` without a database path, `Database` if the file
    /// cannot be opened, and `Migration` if the schema cannot be applied.
    pub fn open_session(&self) -> Result<Session<SqliteConnection>> {
        let path = self.database_path()?;
        let conn = SqliteConnection::open(&path, &self.config)?;
        let report = self.migrate(&conn)?;
        info!(
            path = %path.display(),
            version = report.to_version,
            "Session opened"
        );
        Ok(self.session_with(conn))
    }

    /// Migrate an in-memory database and start a session on it.
    ///
    /// # Errors
    ///
    /// Returns `Migration` if the schema cannot be applied.
    pub fn open_memory_session(&self) -> Result<Session<SqliteConnection>> {
        let conn = SqliteConnection::open_memory()?;
        self.migrate(&conn)?;
        Ok(self.session_with(conn))
    }

    /// Bring any connection up to this context's schema.
    ///
    /// # Errors
    ///
    /// Returns `Migration` naming the failing step.
    pub fn migrate<C: DbConnection + ?Sized>(&self, conn: &C) -> Result<MigrationReport> {
        SchemaMigrator::new().migrate(conn, &self.schema)
    }

    /// Wrap an already prepared connection; no migration is run.
    #[must_use]
    pub fn session_with<C: DbConnection>(&self, conn: C) -> Session<C> {
        Session::new(conn, Arc::clone(&self.schema), self.config.detail_cache_enabled)
    }
}
