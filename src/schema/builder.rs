//! Fluent schema builder.
//!
//! Declarations accumulate per table and are validated together in
//! [`SchemaBuilder::build`], which is the only way to obtain a
//! [`SqliteDbSchema`].

use crate::error::{Error, Result};
use crate::schema::entity::{Entity, Member, erased_materializer};
use crate::schema::model::{
    Cardinality, Collation, DefaultValuePolicy, EntityBinding, ForeignKey, ForeignKeyAction,
    Index, IndexColumn, NavigationProperty, SchemaColumn, SchemaTable, SortOrder,
    SqliteDbSchema,
};
use crate::serialize::SerializerRegistry;
use crate::value::{StorageAffinity, ValueType};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

// ── Column facets ─────────────────────────────────────────────

/// Facet overrides applied to one column by `with_column_changes`.
#[derive(Debug, Clone, Default)]
pub struct ColumnChanges {
    value_type: Option<ValueType>,
    nullable: Option<bool>,
    unique: Option<bool>,
    collation: Option<Collation>,
    default_value: Option<DefaultValuePolicy>,
}

impl ColumnChanges {
    #[must_use]
    pub const fn of_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = Some(true);
        self
    }

    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = Some(false);
        self
    }

    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = Some(true);
        self
    }

    #[must_use]
    pub const fn collate(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    #[must_use]
    pub const fn auto_increment(mut self) -> Self {
        self.default_value = Some(DefaultValuePolicy::AutoIncrement);
        self
    }

    #[must_use]
    pub const fn generate_uuid(mut self) -> Self {
        self.default_value = Some(DefaultValuePolicy::GenerateUuid);
        self
    }

    fn apply(&self, column: &mut PendingColumn) {
        if let Some(ty) = self.value_type {
            column.value_type = ty;
        }
        if let Some(nullable) = self.nullable {
            column.nullable = nullable;
        }
        if let Some(unique) = self.unique {
            column.unique = unique;
        }
        if self.collation.is_some() {
            column.collation = self.collation;
        }
        if let Some(policy) = self.default_value {
            column.default_value = policy;
        }
    }
}

#[derive(Debug, Clone)]
struct PendingColumn {
    name: String,
    value_type: ValueType,
    nullable: bool,
    unique: bool,
    collation: Option<Collation>,
    default_value: DefaultValuePolicy,
}

impl PendingColumn {
    fn new(name: impl Into<String>, value_type: ValueType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable,
            unique: false,
            collation: None,
            default_value: DefaultValuePolicy::None,
        }
    }
}

// ── Indexes ───────────────────────────────────────────────────

/// Declares the columns and uniqueness of one index.
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    columns: Vec<IndexColumn>,
    unique: bool,
}

impl IndexBuilder {
    #[must_use]
    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(IndexColumn {
            column: name.into(),
            order: SortOrder::Asc,
            collation: None,
        });
        self
    }

    #[must_use]
    pub fn column_desc(mut self, name: impl Into<String>) -> Self {
        self.columns.push(IndexColumn {
            column: name.into(),
            order: SortOrder::Desc,
            collation: None,
        });
        self
    }

    /// Collation of the most recently added column.
    #[must_use]
    pub fn collate(mut self, collation: Collation) -> Self {
        if let Some(last) = self.columns.last_mut() {
            last.collation = Some(collation);
        }
        self
    }

    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

// ── Foreign keys ──────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ReferencedEntity {
    type_id: TypeId,
    type_name: &'static str,
    members: Vec<Member>,
}

/// Declares one foreign key and the navigation properties riding on it.
#[derive(Debug, Clone)]
pub struct ForeignKeyBuilder {
    name: Option<String>,
    columns: Vec<String>,
    referenced: Option<ReferencedEntity>,
    referenced_columns: Vec<String>,
    has_one: Option<String>,
    with_many: Option<String>,
    on_update: ForeignKeyAction,
    on_delete: ForeignKeyAction,
    optional: bool,
}

impl ForeignKeyBuilder {
    fn new(columns: Vec<String>) -> Self {
        Self {
            name: None,
            columns,
            referenced: None,
            referenced_columns: Vec::new(),
            has_one: None,
            with_many: None,
            on_update: ForeignKeyAction::NoAction,
            on_delete: ForeignKeyAction::NoAction,
            optional: false,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Referenced entity and columns; no columns means its primary key.
    #[must_use]
    pub fn references<P: Entity>(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.referenced = Some(ReferencedEntity {
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
            members: P::members(),
        });
        self.referenced_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Singular navigation on the owning (dependent) entity.
    #[must_use]
    pub fn has_one(mut self, navigation: impl Into<String>) -> Self {
        self.has_one = Some(navigation.into());
        self
    }

    /// Plural inverse navigation on the referenced (principal) entity.
    #[must_use]
    pub fn with_many(mut self, navigation: impl Into<String>) -> Self {
        self.with_many = Some(navigation.into());
        self
    }

    #[must_use]
    pub const fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    #[must_use]
    pub const fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    #[must_use]
    pub const fn is_optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

// ── Tables ────────────────────────────────────────────────────

/// Declarations for one entity table.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    name: String,
    members: Vec<Member>,
    all_members: bool,
    excluded: HashSet<String>,
    explicit: Vec<PendingColumn>,
    changes: Vec<(String, ColumnChanges)>,
    primary_key: Option<Vec<String>>,
    foreign_keys: Vec<ForeignKeyBuilder>,
    indexes: Vec<(String, IndexBuilder)>,
    recursive: Vec<String>,
}

impl TableBuilder {
    fn new(name: &str, members: Vec<Member>) -> Self {
        Self {
            name: name.to_string(),
            members,
            all_members: false,
            excluded: HashSet::new(),
            explicit: Vec::new(),
            changes: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            recursive: Vec::new(),
        }
    }

    /// Table name; defaults to the entity name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// One column per data member; navigation wrappers and excluded
    /// members are skipped.
    #[must_use]
    pub const fn with_all_members_as_columns(mut self) -> Self {
        self.all_members = true;
        self
    }

    #[must_use]
    pub fn excluding(mut self, member: impl Into<String>) -> Self {
        self.excluded.insert(member.into());
        self
    }

    /// Add a column, or replace the type of a derived one.
    ///
    /// Naming the same column twice fails at build time.
    #[must_use]
    pub fn with_column(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.explicit.push(PendingColumn::new(name, value_type, false));
        self
    }

    #[must_use]
    pub fn with_column_changes(
        mut self,
        name: impl Into<String>,
        changes: impl FnOnce(ColumnChanges) -> ColumnChanges,
    ) -> Self {
        self.changes.push((name.into(), changes(ColumnChanges::default())));
        self
    }

    /// Single or composite primary key; defaults to a column named `id`/`Id`.
    #[must_use]
    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.primary_key = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_foreign_key(
        mut self,
        columns: impl IntoIterator<Item = impl Into<String>>,
        declare: impl FnOnce(ForeignKeyBuilder) -> ForeignKeyBuilder,
    ) -> Self {
        let fk = ForeignKeyBuilder::new(columns.into_iter().map(Into::into).collect());
        self.foreign_keys.push(declare(fk));
        self
    }

    #[must_use]
    pub fn has_index(
        mut self,
        name: impl Into<String>,
        declare: impl FnOnce(IndexBuilder) -> IndexBuilder,
    ) -> Self {
        self.indexes.push((name.into(), declare(IndexBuilder::default())));
        self
    }

    /// Follow this navigation when loading related entities recursively.
    #[must_use]
    pub fn recursive(mut self, navigation: impl Into<String>) -> Self {
        self.recursive.push(navigation.into());
        self
    }

    fn columns(&self) -> Result<Vec<PendingColumn>> {
        let mut columns: Vec<PendingColumn> = Vec::new();
        if self.all_members {
            for member in &self.members {
                if member.is_navigation() || self.excluded.contains(member.name) {
                    continue;
                }
                if columns.iter().any(|c| c.name == member.name) {
                    return Err(duplicate_column(&self.name, member.name));
                }
                columns.push(PendingColumn::new(member.name, member.value_type, member.nullable));
            }
        }
        for (i, column) in self.explicit.iter().enumerate() {
            if self.explicit[..i].iter().any(|c| c.name == column.name) {
                return Err(duplicate_column(&self.name, &column.name));
            }
            match columns.iter_mut().find(|c| c.name == column.name) {
                Some(existing) => existing.value_type = column.value_type,
                None => columns.push(column.clone()),
            }
        }
        for (name, changes) in &self.changes {
            let column = columns
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| Error::schema(format!("{}.{name}", self.name), "no such column"))?;
            changes.apply(column);
        }
        Ok(columns)
    }
}

fn duplicate_column(table: &str, column: &str) -> Error {
    Error::schema(format!("{table}.{column}"), "duplicate column name")
}

struct PendingTable {
    builder: TableBuilder,
    binding: EntityBinding,
}

// ── Schema ────────────────────────────────────────────────────

/// Write-once builder producing one [`SqliteDbSchema`].
pub struct SchemaBuilder {
    registry: Arc<SerializerRegistry>,
    tables: Vec<PendingTable>,
}

impl std::fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaBuilder")
            .field("tables", &self.tables.iter().map(|t| &t.builder.name).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SchemaBuilder {
    #[must_use]
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self {
            registry,
            tables: Vec::new(),
        }
    }

    /// Register an entity type and declare its table.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateTable` if `T` is already registered, or
    /// `SchemaDefinition` if another type already uses the table name.
    pub fn has_table<T: Entity>(
        mut self,
        declare: impl FnOnce(TableBuilder) -> TableBuilder,
    ) -> Result<Self> {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        if self.tables.iter().any(|t| t.binding.type_id == type_id) {
            return Err(Error::DuplicateTable {
                entity: type_name.to_string(),
            });
        }
        let builder = declare(TableBuilder::new(T::entity_name(), T::members()));
        if self.tables.iter().any(|t| t.builder.name == builder.name) {
            return Err(Error::schema(&builder.name, "table name already in use"));
        }
        debug!(table = %builder.name, entity = type_name, "Registered entity table");
        self.tables.push(PendingTable {
            builder,
            binding: EntityBinding {
                type_id,
                type_name,
                materialize: erased_materializer::<T>,
            },
        });
        Ok(self)
    }

    /// Validate every declaration and finalize the schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` naming the offending table or column.
    pub fn build(self) -> Result<Arc<SqliteDbSchema>> {
        let mut tables = Vec::with_capacity(self.tables.len());
        for pending in &self.tables {
            tables.push(self.finish_table(&pending.builder)?);
        }

        let table_of_type: HashMap<TypeId, String> = self
            .tables
            .iter()
            .map(|t| (t.binding.type_id, t.builder.name.clone()))
            .collect();

        let mut navigations = Vec::new();
        for (position, pending) in self.tables.iter().enumerate() {
            for fk in &pending.builder.foreign_keys {
                let (foreign_key, navs) =
                    resolve_foreign_key(&pending.builder, fk, &tables, &table_of_type)?;
                for column in &foreign_key.columns {
                    if let Some(col) = tables[position].columns.iter_mut().find(|c| &c.name == column) {
                        col.nullable = foreign_key.optional;
                    }
                }
                tables[position].foreign_keys.push(foreign_key);
                navigations.extend(navs);
            }
        }

        let mut seen = HashSet::new();
        for nav in &navigations {
            if !seen.insert((nav.owner_table.clone(), nav.name.clone())) {
                return Err(Error::schema(
                    format!("{}.{}", nav.owner_table, nav.name),
                    "navigation declared twice",
                ));
            }
        }
        for pending in &self.tables {
            for name in &pending.builder.recursive {
                let nav = navigations
                    .iter_mut()
                    .find(|n| n.owner_table == pending.builder.name && &n.name == name)
                    .ok_or_else(|| {
                        Error::schema(format!("{}.{name}", pending.builder.name), "no such navigation")
                    })?;
                nav.recursive = true;
            }
        }

        let mut index_names = HashSet::new();
        for table in &tables {
            for index in &table.indexes {
                if !index_names.insert(index.name.clone()) {
                    return Err(Error::schema(&index.name, "duplicate index name"));
                }
            }
        }

        let bindings = self
            .tables
            .into_iter()
            .map(|t| (t.builder.name, t.binding))
            .collect();

        info!(
            tables = tables.len(),
            navigations = navigations.len(),
            "Schema finalized"
        );
        Ok(Arc::new(SqliteDbSchema::new(
            tables,
            navigations,
            bindings,
            self.registry,
        )))
    }

    fn finish_table(&self, builder: &TableBuilder) -> Result<SchemaTable> {
        let table = &builder.name;
        let pending = builder.columns()?;
        if pending.is_empty() {
            return Err(Error::schema(table, "table has no columns"));
        }

        let primary_key = match &builder.primary_key {
            Some(key) => key.clone(),
            None => pending
                .iter()
                .find(|c| c.name == "id" || c.name == "Id")
                .map(|c| vec![c.name.clone()])
                .ok_or_else(|| Error::schema(table, "no primary key declared"))?,
        };
        if primary_key.is_empty() {
            return Err(Error::schema(table, "empty primary key"));
        }

        let mut columns = Vec::with_capacity(pending.len());
        for column in pending {
            let object = format!("{table}.{}", column.name);
            let affinity = self
                .registry
                .affinity_of(column.value_type)
                .map_err(|e| Error::schema(&object, e.to_string()))?;
            let key = primary_key.contains(&column.name);
            match column.default_value {
                DefaultValuePolicy::AutoIncrement
                    if !(key
                        && primary_key.len() == 1
                        && column.value_type.is_integer()
                        && affinity == StorageAffinity::Integer) =>
                {
                    return Err(Error::schema(
                        object,
                        "auto-increment requires a single INTEGER primary key",
                    ));
                }
                DefaultValuePolicy::GenerateUuid if column.value_type != ValueType::Uuid => {
                    return Err(Error::schema(object, "generated identifiers require a UUID column"));
                }
                _ => {}
            }
            columns.push(SchemaColumn {
                name: column.name,
                value_type: column.value_type,
                affinity,
                nullable: column.nullable && !key,
                unique: column.unique,
                collation: column.collation,
                default_value: column.default_value,
            });
        }

        for key in &primary_key {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(Error::schema(format!("{table}.{key}"), "primary key column does not exist"));
            }
        }

        let mut indexes = Vec::with_capacity(builder.indexes.len());
        for (name, index) in &builder.indexes {
            if index.columns.is_empty() {
                return Err(Error::schema(name, "index has no columns"));
            }
            for col in &index.columns {
                if !columns.iter().any(|c| c.name == col.column) {
                    return Err(Error::schema(
                        format!("{name}.{}", col.column),
                        "indexed column does not exist",
                    ));
                }
            }
            indexes.push(Index {
                name: name.clone(),
                table: table.clone(),
                columns: index.columns.clone(),
                unique: index.unique,
            });
        }

        Ok(SchemaTable {
            name: table.clone(),
            columns,
            primary_key,
            foreign_keys: Vec::new(),
            indexes,
        })
    }
}

/// Whether `columns` identify at most one row of `table`.
fn is_unique_key(table: &SchemaTable, columns: &[String]) -> bool {
    let same_set = |other: &[String]| {
        other.len() == columns.len() && columns.iter().all(|c| other.contains(c))
    };
    if same_set(&table.primary_key) {
        return true;
    }
    if let [single] = columns {
        if table.column(single).is_some_and(|c| c.unique) {
            return true;
        }
    }
    table.indexes.iter().any(|index| {
        index.unique
            && same_set(&index.columns.iter().map(|c| c.column.clone()).collect::<Vec<_>>())
    })
}

fn check_navigation_member(
    members: &[Member],
    table: &str,
    name: &str,
    cardinality: Cardinality,
) -> Result<()> {
    match members.iter().find(|m| m.name == name) {
        Some(member) if member.navigation == Some(cardinality) => Ok(()),
        Some(_) => Err(Error::schema(
            format!("{table}.{name}"),
            format!("member is not a {cardinality} navigation wrapper"),
        )),
        None => Err(Error::schema(format!("{table}.{name}"), "no such navigation member")),
    }
}

fn resolve_foreign_key(
    owner: &TableBuilder,
    fk: &ForeignKeyBuilder,
    tables: &[SchemaTable],
    table_of_type: &HashMap<TypeId, String>,
) -> Result<(ForeignKey, Vec<NavigationProperty>)> {
    let object = format!("{}({})", owner.name, fk.columns.join(", "));
    let referenced = fk
        .referenced
        .as_ref()
        .ok_or_else(|| Error::schema(&object, "foreign key references nothing"))?;
    let target_name = table_of_type
        .get(&referenced.type_id)
        .ok_or_else(|| {
            Error::schema(
                &object,
                format!("referenced entity {} has no table", referenced.type_name),
            )
        })?;
    let target = tables
        .iter()
        .find(|t| &t.name == target_name)
        .ok_or_else(|| Error::schema(&object, "referenced table missing"))?;
    let source = tables
        .iter()
        .find(|t| t.name == owner.name)
        .ok_or_else(|| Error::schema(&object, "owning table missing"))?;

    if fk.columns.is_empty() {
        return Err(Error::schema(&object, "foreign key has no columns"));
    }
    for column in &fk.columns {
        if source.column(column).is_none() {
            return Err(Error::schema(format!("{}.{column}", owner.name), "foreign key column does not exist"));
        }
    }
    let referenced_columns = if fk.referenced_columns.is_empty() {
        target.primary_key.clone()
    } else {
        fk.referenced_columns.clone()
    };
    if referenced_columns.len() != fk.columns.len() {
        return Err(Error::schema(&object, "column count differs from referenced columns"));
    }
    for column in &referenced_columns {
        if target.column(column).is_none() {
            return Err(Error::schema(format!("{}.{column}", target.name), "referenced column does not exist"));
        }
    }
    if !is_unique_key(target, &referenced_columns) {
        return Err(Error::schema(&object, "referenced columns are neither primary nor unique"));
    }
    if !fk.optional
        && (fk.on_delete == ForeignKeyAction::SetNull || fk.on_update == ForeignKeyAction::SetNull)
    {
        return Err(Error::schema(&object, "SET NULL requires an optional foreign key"));
    }

    let name = fk.name.clone().unwrap_or_else(|| {
        format!("FK_{}_{}_{}", owner.name, target.name, fk.columns.join("_"))
    });

    let mut navigations = Vec::new();
    if let Some(nav) = &fk.has_one {
        check_navigation_member(&owner.members, &owner.name, nav, Cardinality::One)?;
        navigations.push(NavigationProperty {
            name: nav.clone(),
            owner_table: owner.name.clone(),
            target_table: target.name.clone(),
            cardinality: Cardinality::One,
            foreign_key: name.clone(),
            owner_columns: fk.columns.clone(),
            target_columns: referenced_columns.clone(),
            recursive: false,
        });
    }
    if let Some(nav) = &fk.with_many {
        check_navigation_member(&referenced.members, &target.name, nav, Cardinality::Many)?;
        navigations.push(NavigationProperty {
            name: nav.clone(),
            owner_table: target.name.clone(),
            target_table: owner.name.clone(),
            cardinality: Cardinality::Many,
            foreign_key: name.clone(),
            owner_columns: referenced_columns.clone(),
            target_columns: fk.columns.clone(),
            recursive: false,
        });
    }

    Ok((
        ForeignKey {
            name,
            columns: fk.columns.clone(),
            referenced_table: target.name.clone(),
            referenced_columns,
            on_update: fk.on_update,
            on_delete: fk.on_delete,
            optional: fk.optional,
        },
        navigations,
    ))
}
