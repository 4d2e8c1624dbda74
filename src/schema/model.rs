//! Immutable schema model.

use crate::error::{Error, Result};
use crate::schema::entity::ErasedMaterializer;
use crate::serialize::SerializerRegistry;
use crate::value::{StorageAffinity, ValueType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ── Keyword enumerations ──────────────────────────────────────

macro_rules! keyword_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($variant:ident => $keyword:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            /// SQL keyword for this value.
            #[must_use]
            pub const fn as_sql(&self) -> &'static str {
                match self {
                    $(Self::$variant => $keyword),*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_sql())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($keyword => Ok(Self::$variant),)*
                    _ => Err(Error::InvalidEnumValue {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_sql().to_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self> {
                value.parse()
            }
        }
    };
}

keyword_enum! {
    /// Text collation of a column or index column.
    Collation, "collation" {
        Binary => "BINARY",
        NoCase => "NOCASE",
        RTrim => "RTRIM",
    }
}

keyword_enum! {
    /// Referential action taken on update or delete of the referenced row.
    ForeignKeyAction, "foreign key action" {
        NoAction => "NO ACTION",
        SetNull => "SET NULL",
        Cascade => "CASCADE",
        SetDefault => "SET DEFAULT",
        Restrict => "RESTRICT",
    }
}

keyword_enum! {
    SortOrder, "sort order" {
        Asc => "ASC",
        Desc => "DESC",
    }
}

keyword_enum! {
    /// How a column's value is produced when the caller leaves it unset.
    DefaultValuePolicy, "default value policy" {
        None => "NONE",
        AutoIncrement => "AUTOINCREMENT",
        GenerateUuid => "UUID",
    }
}

keyword_enum! {
    Cardinality, "cardinality" {
        One => "ONE",
        Many => "MANY",
    }
}

impl Default for ForeignKeyAction {
    fn default() -> Self {
        Self::NoAction
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::Asc
    }
}

impl Default for DefaultValuePolicy {
    fn default() -> Self {
        Self::None
    }
}

// ── Tables ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub value_type: ValueType,
    pub affinity: StorageAffinity,
    pub nullable: bool,
    pub unique: bool,
    pub collation: Option<Collation>,
    pub default_value: DefaultValuePolicy,
}

impl SchemaColumn {
    #[must_use]
    pub fn is_auto_increment(&self) -> bool {
        self.default_value == DefaultValuePolicy::AutoIncrement
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub column: String,
    pub order: SortOrder,
    pub collation: Option<Collation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub table: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub name: String,
    pub columns: Vec<SchemaColumn>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
}

impl SchemaTable {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }

    /// Columns of the primary key, in key order.
    pub fn key_columns(&self) -> impl Iterator<Item = &SchemaColumn> {
        self.primary_key.iter().filter_map(|name| self.column(name))
    }

    /// The single auto-increment key column, if any.
    #[must_use]
    pub fn auto_increment_column(&self) -> Option<&SchemaColumn> {
        self.columns.iter().find(|c| c.is_auto_increment())
    }

    /// Whether two versions of a table share the same stored shape
    /// (columns, key and foreign keys; indexes excluded).
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.primary_key == other.primary_key
            && self.foreign_keys == other.foreign_keys
    }
}

// ── Navigation ────────────────────────────────────────────────

/// Related-entity reference riding on a foreign key.
///
/// Resolution selects the target rows whose `target_columns` equal the
/// owner's `owner_columns`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    pub owner_table: String,
    pub target_table: String,
    pub cardinality: Cardinality,
    pub foreign_key: String,
    pub owner_columns: Vec<String>,
    pub target_columns: Vec<String>,
    pub recursive: bool,
}

// ── Schema ────────────────────────────────────────────────────

/// Serializable tables-only view, persisted by the migrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<SchemaTable>,
}

impl SchemaSnapshot {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&SchemaTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// SHA-256 of the snapshot's JSON, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the snapshot cannot be serialized.
    pub fn fingerprint(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Per-table link back to the Rust entity type.
#[derive(Clone)]
pub(crate) struct EntityBinding {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) materialize: ErasedMaterializer,
}

/// The finalized, immutable schema.
pub struct SqliteDbSchema {
    tables: Vec<SchemaTable>,
    navigations: Vec<NavigationProperty>,
    bindings: HashMap<String, EntityBinding>,
    by_type: HashMap<TypeId, String>,
    registry: Arc<SerializerRegistry>,
}

impl fmt::Debug for SqliteDbSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteDbSchema")
            .field("tables", &self.tables.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("navigations", &self.navigations.len())
            .finish_non_exhaustive()
    }
}

impl SqliteDbSchema {
    pub(crate) fn new(
        tables: Vec<SchemaTable>,
        navigations: Vec<NavigationProperty>,
        bindings: HashMap<String, EntityBinding>,
        registry: Arc<SerializerRegistry>,
    ) -> Self {
        let by_type = bindings
            .iter()
            .map(|(table, binding)| (binding.type_id, table.clone()))
            .collect();
        Self {
            tables,
            navigations,
            bindings,
            by_type,
            registry,
        }
    }

    /// Tables in declaration order.
    #[must_use]
    pub fn tables(&self) -> &[SchemaTable] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&SchemaTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Table registered for an entity type.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` if the type was never registered.
    pub fn table_for<T: 'static>(&self) -> Result<&SchemaTable> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|name| self.table(name))
            .ok_or_else(|| Error::schema(std::any::type_name::<T>(), "entity type has no table"))
    }

    /// Table by name, failing when unknown.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` for an unknown table.
    pub fn require_table(&self, name: &str) -> Result<&SchemaTable> {
        self.table(name)
            .ok_or_else(|| Error::schema(name, "no such table"))
    }

    /// Index by name, across all tables.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.tables
            .iter()
            .flat_map(|t| t.indexes.iter())
            .find(|i| i.name == name)
    }

    #[must_use]
    pub fn navigation(&self, table: &str, name: &str) -> Option<&NavigationProperty> {
        self.navigations
            .iter()
            .find(|n| n.owner_table == table && n.name == name)
    }

    pub fn navigations_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a NavigationProperty> {
        self.navigations.iter().filter(move |n| n.owner_table == table)
    }

    /// Navigations whose targets are rows of `table`.
    pub fn navigations_to<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a NavigationProperty> {
        self.navigations.iter().filter(move |n| n.target_table == table)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    pub(crate) fn binding(&self, table: &str) -> Option<&EntityBinding> {
        self.bindings.get(table)
    }

    #[must_use]
    pub fn snapshot(&self) -> SchemaSnapshot {
        SchemaSnapshot {
            tables: self.tables.clone(),
        }
    }

    /// Fingerprint of [`Self::snapshot`].
    ///
    /// # Errors
    ///
    /// Returns `Json` if the snapshot cannot be serialized.
    pub fn fingerprint(&self) -> Result<String> {
        self.snapshot().fingerprint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_parse() {
        assert_eq!("nocase".parse::<Collation>().unwrap(), Collation::NoCase);
        assert_eq!(
            "set null".parse::<ForeignKeyAction>().unwrap(),
            ForeignKeyAction::SetNull
        );
        assert_eq!(ForeignKeyAction::Cascade.as_sql(), "CASCADE");
        assert_eq!(SortOrder::default(), SortOrder::Asc);
    }

    #[test]
    fn test_unknown_keyword_is_invalid_enum_value() {
        let err = "UNICODE".parse::<Collation>().unwrap_err();
        assert!(matches!(err, Error::InvalidEnumValue { kind: "collation", .. }));
        assert!(err.is_fatal());
        let err = "SOMETIMES".parse::<ForeignKeyAction>().unwrap_err();
        assert!(matches!(err, Error::InvalidEnumValue { .. }));
    }

    #[test]
    fn test_snapshot_rejects_unknown_keyword() {
        let json = r#"{"column":"name","order":"SIDEWAYS","collation":null}"#;
        let err = serde_json::from_str::<IndexColumn>(json).unwrap_err();
        assert!(err.to_string().contains("Invalid sort order value"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let mut snapshot = SchemaSnapshot {
            tables: vec![SchemaTable {
                name: "T".into(),
                columns: vec![SchemaColumn {
                    name: "id".into(),
                    value_type: ValueType::I64,
                    affinity: StorageAffinity::Integer,
                    nullable: false,
                    unique: false,
                    collation: None,
                    default_value: DefaultValuePolicy::AutoIncrement,
                }],
                primary_key: vec!["id".into()],
                foreign_keys: vec![],
                indexes: vec![],
            }],
        };
        let first = snapshot.fingerprint().unwrap();
        assert_eq!(first, snapshot.fingerprint().unwrap());
        assert_eq!(first.len(), 64);

        snapshot.tables[0].columns[0].nullable = true;
        assert_ne!(first, snapshot.fingerprint().unwrap());
    }
}
