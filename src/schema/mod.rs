//! Schema modeling.
//!
//! # Submodules
//!
//! - [`entity`] - Entity contract and navigation references
//! - [`model`] - Immutable schema model (tables, columns, keys, indexes)
//! - [`builder`] - Fluent builder producing the finalized model

pub mod builder;
pub mod entity;
pub mod model;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{ColumnChanges, ForeignKeyBuilder, IndexBuilder, SchemaBuilder, TableBuilder};
pub use entity::{Entity, EntityValues, Member, Nav, NavMany, Related, SharedEntity};
pub use model::{
    Cardinality, Collation, DefaultValuePolicy, ForeignKey, ForeignKeyAction, Index, IndexColumn,
    NavigationProperty, SchemaColumn, SchemaSnapshot, SchemaTable, SortOrder, SqliteDbSchema,
};
