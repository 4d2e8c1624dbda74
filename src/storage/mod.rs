//! Storage layer.
//!
//! Everything that touches a live database:
//! - the abstract engine contract the rest of the crate is written against
//! - the rusqlite adapter implementing it
//! - the schema migrator
//! - sessions (CRUD, queries, navigation loading)
//!
//! # Submodules
//!
//! - [`connection`] - Engine contract (`DbConnection`, parameters, rows)
//! - [`sqlite`] - SQLite implementation of the contract
//! - [`migrations`] - Schema history and migration executor
//! - [`session`] - Sessions, queries and result iterators

pub mod connection;
pub mod migrations;
pub mod session;
pub mod sqlite;

pub use connection::{DbConnection, Parameters, Row, RowSet};
pub use migrations::{MigrationReport, SchemaMigrator};
pub use session::{EntityIter, Query, Session};
pub use sqlite::SqliteConnection;
