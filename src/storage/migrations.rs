//! Schema migration executor.
//!
//! Every applied schema is recorded in `__entitylite_schema` together with
//! its JSON snapshot and fingerprint. On open, the latest snapshot is diffed
//! against the current schema and the resulting plan runs in one
//! transaction. Opening with an unchanged schema does nothing, so this is
//! safe to call on every connection.

use crate::ddl::{DdlSynthesizer, MigrationStep};
use crate::error::{Error, Result};
use crate::schema::{SchemaSnapshot, SqliteDbSchema};
use crate::storage::connection::{DbConnection, Parameters};
use crate::value::SqlValue;
use tracing::{debug, info, warn};

/// Table holding the schema history.
pub const HISTORY_TABLE: &str = "__entitylite_schema";

const CREATE_HISTORY: &str = "CREATE TABLE IF NOT EXISTS \"__entitylite_schema\" (
    version INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    snapshot TEXT NOT NULL,
    applied_at INTEGER NOT NULL
)";

/// Outcome of a [`SchemaMigrator::migrate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version found on open; 0 for a database never migrated.
    pub from_version: i64,
    pub to_version: i64,
    pub steps_applied: usize,
}

impl MigrationReport {
    /// Whether the database was already at the current schema.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.from_version == self.to_version
    }
}

struct AppliedSchema {
    version: i64,
    fingerprint: String,
    snapshot: SchemaSnapshot,
}

/// Brings a database up to a finalized schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaMigrator;

impl SchemaMigrator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Migrate `conn` to `schema`.
    ///
    /// # Errors
    ///
    /// Returns `Migration` naming the failing step; the transaction is rolled
    /// back and the previous schema stays in place. Reading the history can
    /// fail with `Database` or `Json`.
    pub fn migrate<C: DbConnection + ?Sized>(
        &self,
        conn: &C,
        schema: &SqliteDbSchema,
    ) -> Result<MigrationReport> {
        conn.execute_batch(CREATE_HISTORY)?;

        let fingerprint = schema.fingerprint()?;
        let applied = latest(conn)?;
        let from_version = applied.as_ref().map_or(0, |a| a.version);

        if applied.as_ref().is_some_and(|a| a.fingerprint == fingerprint) {
            debug!(version = from_version, "Schema up to date");
            return Ok(MigrationReport {
                from_version,
                to_version: from_version,
                steps_applied: 0,
            });
        }

        let previous = applied.map(|a| a.snapshot).unwrap_or_default();
        let plan = DdlSynthesizer::new(schema).plan_migration(&previous);
        info!(
            from_version,
            steps = plan.len(),
            fingerprint = %fingerprint,
            "Applying schema migration"
        );

        let enforced = foreign_keys_enabled(conn)?;
        if enforced {
            conn.execute_batch("PRAGMA foreign_keys = OFF")?;
        }

        let outcome = apply(conn, &plan.steps, schema, &fingerprint);

        if enforced {
            if let Err(e) = conn.execute_batch("PRAGMA foreign_keys = ON") {
                warn!(error = %e, "Could not re-enable foreign key enforcement");
            }
        }

        let to_version = outcome?;
        info!(to_version, steps = plan.len(), "Schema migration complete");
        Ok(MigrationReport {
            from_version,
            to_version,
            steps_applied: plan.len(),
        })
    }

    /// Version currently recorded, or 0.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Json` if the history cannot be read.
    pub fn current_version<C: DbConnection + ?Sized>(&self, conn: &C) -> Result<i64> {
        conn.execute_batch(CREATE_HISTORY)?;
        Ok(latest(conn)?.map_or(0, |a| a.version))
    }
}

fn latest<C: DbConnection + ?Sized>(conn: &C) -> Result<Option<AppliedSchema>> {
    let rows = conn.query(
        "SELECT version, fingerprint, snapshot FROM \"__entitylite_schema\" ORDER BY version DESC LIMIT 1",
        &Parameters::new(),
    )?;
    let Some(row) = rows.rows.first() else {
        return Ok(None);
    };
    match (row.get(0), row.get(1), row.get(2)) {
        (Some(SqlValue::Integer(version)), Some(SqlValue::Text(fingerprint)), Some(SqlValue::Text(snapshot))) => {
            Ok(Some(AppliedSchema {
                version: *version,
                fingerprint: fingerprint.clone(),
                snapshot: serde_json::from_str(snapshot)?,
            }))
        }
        _ => Err(Error::Config(format!("{HISTORY_TABLE}: malformed history row"))),
    }
}

fn foreign_keys_enabled<C: DbConnection + ?Sized>(conn: &C) -> Result<bool> {
    let rows = conn.query("PRAGMA foreign_keys", &Parameters::new())?;
    Ok(matches!(rows.scalar(), Some(SqlValue::Integer(1))))
}

fn step_failed(step: &str, source: Error) -> Error {
    Error::Migration {
        step: step.to_string(),
        source: Box::new(source),
    }
}

fn apply<C: DbConnection + ?Sized>(
    conn: &C,
    steps: &[MigrationStep],
    schema: &SqliteDbSchema,
    fingerprint: &str,
) -> Result<i64> {
    conn.begin().map_err(|e| step_failed("begin", e))?;

    let run = || -> Result<i64> {
        for step in steps {
            debug!(step = %step.description, "Migration step");
            conn.execute_batch(&step.sql)
                .map_err(|e| step_failed(&step.description, e))?;
        }

        let violations = conn
            .query("PRAGMA foreign_key_check", &Parameters::new())
            .map_err(|e| step_failed("foreign key check", e))?;
        if let Some(row) = violations.rows.first() {
            let table = match row.get(0) {
                Some(SqlValue::Text(t)) => t.clone(),
                _ => "?".to_string(),
            };
            return Err(step_failed(
                "foreign key check",
                Error::schema(
                    table,
                    format!("{} rows violate foreign keys after migration", violations.len()),
                ),
            ));
        }

        let snapshot = serde_json::to_string(&schema.snapshot())
            .map_err(|e| step_failed("record schema", e.into()))?;
        let mut params = Parameters::new();
        params
            .bind(":fingerprint", SqlValue::Text(fingerprint.to_string()))
            .bind(":snapshot", SqlValue::Text(snapshot))
            .bind(":applied_at", SqlValue::Integer(chrono::Utc::now().timestamp_millis()));
        conn.execute(
            "INSERT INTO \"__entitylite_schema\" (fingerprint, snapshot, applied_at) \
             VALUES (:fingerprint, :snapshot, :applied_at)",
            &params,
        )
        .map_err(|e| step_failed("record schema", e))?;
        Ok(conn.last_insert_rowid())
    };

    match run() {
        Ok(version) => {
            conn.commit().map_err(|e| step_failed("commit", e))?;
            Ok(version)
        }
        Err(e) => {
            warn!(error = %e, "Schema migration failed, rolling back");
            if let Err(rollback) = conn.rollback() {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrmConfig;
    use crate::schema::testing::{Customer, shop_schema};
    use crate::schema::{ColumnChanges, SchemaBuilder};
    use crate::serialize::SerializerRegistry;
    use crate::storage::sqlite::SqliteConnection;
    use std::sync::Arc;

    fn customer_schema(with_name: bool, name_changes: fn(ColumnChanges) -> ColumnChanges) -> Arc<SqliteDbSchema> {
        let registry = Arc::new(SerializerRegistry::with_builtins());
        SchemaBuilder::new(registry)
            .has_table::<Customer>(|t| {
                let t = t.with_all_members_as_columns();
                if with_name {
                    t.with_column_changes("name", name_changes)
                } else {
                    t.excluding("name")
                }
            })
            .unwrap()
            .build()
            .unwrap()
    }

    fn count(conn: &SqliteConnection, sql: &str) -> i64 {
        match conn.query(sql, &Parameters::new()).unwrap().scalar() {
            Some(SqlValue::Integer(n)) => *n,
            other => panic!("unexpected scalar {other:?}"),
        }
    }

    #[test]
    fn test_fresh_database_then_idempotent() {
        let conn = SqliteConnection::open_memory().unwrap();
        let schema = shop_schema();
        let migrator = SchemaMigrator::new();

        let first = migrator.migrate(&conn, &schema).unwrap();
        assert_eq!(first.from_version, 0);
        assert_eq!(first.to_version, 1);
        assert_eq!(first.steps_applied, 5);

        let second = migrator.migrate(&conn, &schema).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.steps_applied, 0);
        assert_eq!(migrator.current_version(&conn).unwrap(), 1);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'Order'"),
            1
        );
    }

    #[test]
    fn test_added_nullable_column_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let config = OrmConfig::default();
        let migrator = SchemaMigrator::new();

        {
            let conn = SqliteConnection::open(&path, &config).unwrap();
            migrator.migrate(&conn, &customer_schema(false, |c| c)).unwrap();
            conn.execute_batch("INSERT INTO \"Customer\" (\"id\") VALUES (1), (2)").unwrap();
        }

        let conn = SqliteConnection::open(&path, &config).unwrap();
        let report = migrator
            .migrate(&conn, &customer_schema(true, ColumnChanges::nullable))
            .unwrap();
        assert_eq!((report.from_version, report.to_version), (1, 2));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM \"Customer\""), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM \"Customer\" WHERE \"name\" IS NULL"), 2);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%__entitylite_tmp'"),
            0
        );
    }

    #[test]
    fn test_failed_step_rolls_back_everything() {
        let conn = SqliteConnection::open_memory().unwrap();
        let migrator = SchemaMigrator::new();
        migrator.migrate(&conn, &customer_schema(false, |c| c)).unwrap();
        conn.execute_batch("INSERT INTO \"Customer\" (\"id\") VALUES (1)").unwrap();

        let err = migrator
            .migrate(&conn, &customer_schema(true, |c| c))
            .unwrap_err();
        match &err {
            Error::Migration { step, source } => {
                assert_eq!(step, "copy rows into Customer__entitylite_tmp");
                assert!(matches!(**source, Error::Database(_)));
            }
            other => panic!("expected migration error, got {other:?}"),
        }

        assert_eq!(migrator.current_version(&conn).unwrap(), 1);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM \"Customer\""), 1);
        assert_eq!(
            count(&conn, "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%__entitylite_tmp'"),
            0
        );
        assert_eq!(count(&conn, "PRAGMA foreign_keys"), 1);
    }
}
