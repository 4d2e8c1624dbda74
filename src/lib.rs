//! entitylite - entity schemas, SQL synthesis and lazily loaded object graphs over SQLite
//!
//! Describe entity types and their relationships once with the
//! [`SchemaBuilder`]; the finalized [`SqliteDbSchema`] then drives DDL and
//! migrations, DML and upserts, predicate translation, and sessions that
//! materialize entities and resolve their navigations through a per-session
//! detail cache.
//!
//! # Architecture
//!
//! - [`value`] - Runtime values, runtime types and storage cells
//! - [`serialize`] - Type serialization registry and failover converter
//! - [`schema`] - Entity contract, schema model and fluent builder
//! - [`ddl`] - DDL synthesis and migration planning
//! - [`dml`] - Insert/update/delete/upsert synthesis
//! - [`predicate`] - Boolean expressions and WHERE clause translation
//! - [`cache`] - Entity detail cache
//! - [`storage`] - Engine contract, SQLite adapter, migrator and sessions
//! - [`context`] - Database context handing out sessions
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod context;
pub mod ddl;
pub mod dml;
pub mod error;
pub mod predicate;
pub mod schema;
pub mod serialize;
pub mod storage;
pub mod value;

pub use cache::{CacheKey, CachedDetail, EntityDetailCache};
pub use config::OrmConfig;
pub use context::DbContext;
pub use ddl::{DdlSynthesizer, MigrationPlan, MigrationStep};
pub use dml::{DmlKind, DmlSqlSynthesisArgs, DmlSqlSynthesisResult, DmlSynthesizer};
pub use error::{Error, ErrorCode, Result};
pub use predicate::{CompareOp, Expr, PredicateTranslator, WhereClause};
pub use schema::{
    Entity, EntityValues, Member, Nav, NavMany, Related, SchemaBuilder, SqliteDbSchema,
};
pub use serialize::{Serializer, SerializerRegistry};
pub use storage::{DbConnection, Query, Session, SqliteConnection};
pub use value::{Decimal, SqlValue, StorageAffinity, Value, ValueType};
