//! Sessions: CRUD, queries and navigation loading over one connection.
//!
//! A [`Session`] owns its connection and its own [`EntityDetailCache`].
//! Statement templates come from the DML synthesizer and are bound once per
//! entity; bulk calls synthesize a single template and reuse it for every row.
//!
//! Navigation resolution goes through the detail cache, so a navigation of
//! one owner row is fetched at most once per session until invalidated.
//! Mutations keep the cache consistent by evicting the entries owned by the
//! rows they touch, the entries of other owners that hold those rows, and
//! the navigations that may now include them.

use crate::cache::{CacheKey, EntityDetailCache};
use crate::ddl::quote_ident;
use crate::dml::{DmlSqlSynthesisArgs, DmlSqlSynthesisResult, DmlSynthesizer};
use crate::error::{Error, Result};
use crate::predicate::{Expr, PredicateTranslator};
use crate::schema::entity::ErasedEntity;
use crate::schema::{
    Cardinality, DefaultValuePolicy, Entity, EntityValues, NavigationProperty, Related,
    SchemaTable, SharedEntity, SortOrder, SqliteDbSchema,
};
use crate::serialize::SerializerRegistry;
use crate::storage::connection::{DbConnection, Parameters, Row};
use crate::value::{SqlValue, Value};
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Rows already on the current recursive loading path, by table and key.
type LoadPath = Vec<(String, Vec<SqlValue>)>;

/// Unit of work over one connection.
pub struct Session<C: DbConnection> {
    conn: C,
    schema: Arc<SqliteDbSchema>,
    cache: EntityDetailCache,
    depth: Cell<usize>,
}

impl<C: DbConnection> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("schema", &self.schema)
            .field("cache", &self.cache)
            .field("depth", &self.depth.get())
            .finish_non_exhaustive()
    }
}

fn snapshot<T: Entity>(entity: &T, table: &SchemaTable) -> EntityValues {
    table
        .columns
        .iter()
        .map(|c| (c.name.clone(), entity.read(&c.name)))
        .collect()
}

fn assign_generated_keys<T: Entity>(table: &SchemaTable, entity: &mut T) -> Result<()> {
    for column in table
        .columns
        .iter()
        .filter(|c| c.default_value == DefaultValuePolicy::GenerateUuid)
    {
        let unset = match entity.read(&column.name) {
            Value::Null => true,
            Value::Uuid(id) => id.is_nil(),
            _ => false,
        };
        if unset {
            entity.write(&column.name, Value::Uuid(Uuid::new_v4()))?;
        }
    }
    Ok(())
}

fn column_list(table: &SchemaTable) -> String {
    table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn downcast_shared<D: Entity>(shared: SharedEntity) -> Result<Arc<D>> {
    shared.downcast::<D>().map_err(|_| Error::Serialization {
        type_name: std::any::type_name::<D>().to_string(),
        message: "related entity has another type".into(),
    })
}

impl<C: DbConnection> Session<C> {
    #[must_use]
    pub fn new(conn: C, schema: Arc<SqliteDbSchema>, detail_cache_enabled: bool) -> Self {
        Self {
            conn,
            schema,
            cache: EntityDetailCache::new(detail_cache_enabled),
            depth: Cell::new(0),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &C {
        &self.conn
    }

    #[must_use]
    pub const fn schema(&self) -> &Arc<SqliteDbSchema> {
        &self.schema
    }

    /// The session's navigation cache, for explicit invalidation.
    #[must_use]
    pub const fn detail_cache(&self) -> &EntityDetailCache {
        &self.cache
    }

    fn registry(&self) -> &SerializerRegistry {
        self.schema.registry()
    }

    fn template<T: Entity>(&self, args: &DmlSqlSynthesisArgs) -> Result<DmlSqlSynthesisResult> {
        DmlSynthesizer::new(&self.schema).synthesize::<T>(args)
    }

    fn key_values(&self, table: &SchemaTable, read: impl Fn(&str) -> Value) -> Result<Vec<SqlValue>> {
        table
            .key_columns()
            .map(|c| self.registry().serialize_as(&read(&c.name), c.value_type))
            .collect()
    }

    /// Evict the row's own navigations and every cached detail holding it.
    fn evict_row<T: Entity>(&self, table: &SchemaTable, entity: &T) -> Result<()> {
        let key = self.key_values(table, |m| entity.read(m))?;
        self.cache.remove_owner(&table.name, &key);
        let same_key = table
            .key_columns()
            .map(|c| Expr::prop(c.name.as_str()).equals(entity.read(&c.name)))
            .reduce(Expr::and);
        if let Some(predicate) = same_key {
            self.cache.remove_where::<T>(&predicate, self.registry())?;
        }
        Ok(())
    }

    /// Evict cached navigations that may now include the row. The entry is
    /// found by owner key when the navigation joins on the owner's primary
    /// key; otherwise the navigation is evicted for every owner.
    fn evict_joining<T: Entity>(&self, table: &SchemaTable, entity: &T) -> Result<()> {
        for nav in self.schema.navigations_to(&table.name) {
            let owner = self.schema.require_table(&nav.owner_table)?;
            if nav.owner_columns != owner.primary_key {
                self.cache.remove_navigation(&nav.owner_table, &nav.name);
                continue;
            }
            let values: Vec<Value> = nav.target_columns.iter().map(|c| entity.read(c)).collect();
            if values.iter().any(Value::is_null) {
                continue;
            }
            let key = owner
                .key_columns()
                .zip(&values)
                .map(|(c, v)| self.registry().serialize_as(v, c.value_type))
                .collect::<Result<Vec<_>>>()?;
            self.cache.remove_key(&CacheKey::new(&nav.owner_table, key, &nav.name));
        }
        Ok(())
    }

    // ── Transactions ──────────────────────────────────────────

    /// Run `f` in a transaction, committing on `Ok` and rolling back on
    /// `Err`. Nested calls use savepoints, so an inner failure only undoes
    /// the inner work.
    ///
    /// A rollback also clears the detail cache, which may hold entities read
    /// inside the abandoned work.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or `Database` if the transaction cannot
    /// be opened or committed.
    pub fn transaction<R>(&self, f: impl FnOnce(&Self) -> Result<R>) -> Result<R> {
        let depth = self.depth.get();
        let savepoint = format!("entitylite_sp_{depth}");
        if depth == 0 {
            self.conn.begin()?;
        } else {
            self.conn.savepoint(&savepoint)?;
        }
        self.depth.set(depth + 1);
        let result = f(self);
        self.depth.set(depth);

        let outcome = result.and_then(|value| {
            if depth == 0 {
                self.conn.commit()?;
            } else {
                self.conn.release(&savepoint)?;
            }
            Ok(value)
        });
        if outcome.is_err() {
            let undo = if depth == 0 {
                self.conn.rollback()
            } else {
                self.conn.rollback_to(&savepoint)
            };
            if let Err(e) = undo {
                warn!(error = %e, depth, "Rollback failed");
            }
            self.cache.clear();
        }
        outcome
    }

    // ── Mutations ─────────────────────────────────────────────

    /// Insert an entity. Generated UUID keys are assigned before the insert
    /// and an auto-increment key is written back afterwards.
    ///
    /// # Errors
    ///
    /// Propagates synthesis, serialization and database failures.
    pub fn insert<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let template = self.template::<T>(&DmlSqlSynthesisArgs::insert())?;
        self.insert_with(&template, entity)
    }

    /// Insert many entities in one transaction with one statement template.
    ///
    /// # Errors
    ///
    /// Fails on the first failing row; nothing is inserted then.
    pub fn insert_many<T: Entity>(&self, entities: &mut [T]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let template = self.template::<T>(&DmlSqlSynthesisArgs::insert())?;
        self.transaction(|s| {
            for entity in entities.iter_mut() {
                s.insert_with(&template, entity)?;
            }
            Ok(entities.len())
        })
    }

    fn insert_with<T: Entity>(&self, template: &DmlSqlSynthesisResult, entity: &mut T) -> Result<()> {
        let table = self.schema.table_for::<T>()?;
        assign_generated_keys(table, entity)?;
        let params = template.bind(&snapshot(entity, table), self.registry())?;
        self.conn.execute(&template.sql, &params)?;
        if let Some(column) = table.auto_increment_column() {
            let rowid = Value::I64(self.conn.last_insert_rowid());
            let assigned = self.registry().convert(&rowid, column.value_type)?;
            entity.write(&column.name, assigned)?;
        }
        self.evict_joining(table, entity)
    }

    /// Update every non-key column of the row matching the entity's key.
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` for a null key and propagates database failures.
    pub fn update<T: Entity>(&self, entity: &T) -> Result<usize> {
        let template = self.template::<T>(&DmlSqlSynthesisArgs::update())?;
        self.update_with(&template, entity)
    }

    /// # Errors
    ///
    /// Fails on the first failing row; nothing is updated then.
    pub fn update_many<T: Entity>(&self, entities: &[T]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let template = self.template::<T>(&DmlSqlSynthesisArgs::update())?;
        self.transaction(|s| {
            entities
                .iter()
                .map(|e| s.update_with(&template, e))
                .sum::<Result<usize>>()
        })
    }

    fn update_with<T: Entity>(&self, template: &DmlSqlSynthesisResult, entity: &T) -> Result<usize> {
        let table = self.schema.table_for::<T>()?;
        let params = template.bind(&snapshot(entity, table), self.registry())?;
        let changed = self.conn.execute(&template.sql, &params)?;
        self.evict_row(table, entity)?;
        self.evict_joining(table, entity)?;
        Ok(changed)
    }

    /// Delete the row matching the entity's key and evict its cache entries.
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` for a null key and propagates database failures.
    pub fn delete<T: Entity>(&self, entity: &T) -> Result<usize> {
        let template = self.template::<T>(&DmlSqlSynthesisArgs::delete())?;
        self.delete_with(&template, entity)
    }

    /// # Errors
    ///
    /// Fails on the first failing row; nothing is deleted then.
    pub fn delete_many<T: Entity>(&self, entities: &[T]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let template = self.template::<T>(&DmlSqlSynthesisArgs::delete())?;
        self.transaction(|s| {
            entities
                .iter()
                .map(|e| s.delete_with(&template, e))
                .sum::<Result<usize>>()
        })
    }

    fn delete_with<T: Entity>(&self, template: &DmlSqlSynthesisResult, entity: &T) -> Result<usize> {
        let table = self.schema.table_for::<T>()?;
        let params = template.bind(&snapshot(entity, table), self.registry())?;
        let deleted = self.conn.execute(&template.sql, &params)?;
        self.evict_row(table, entity)?;
        Ok(deleted)
    }

    /// Delete every row of `T` matching `predicate`.
    ///
    /// Cache entries owned by the deleted rows are evicted, as are entries
    /// whose cached `T` matches the predicate.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPredicate` for untranslatable predicates and
    /// propagates database failures.
    pub fn delete_where<T: Entity>(&self, predicate: &Expr) -> Result<usize> {
        let table = self.schema.table_for::<T>()?;
        let clause = PredicateTranslator::new(&self.schema, self.registry()).translate::<T>(predicate)?;
        let name = quote_ident(&table.name);
        let keys = table
            .primary_key
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        let deleted = self.transaction(|s| {
            let doomed = s.conn.query(
                &format!("SELECT {keys} FROM {name} WHERE {}", clause.sql),
                &clause.parameters,
            )?;
            let deleted = s
                .conn
                .execute(&format!("DELETE FROM {name} WHERE {}", clause.sql), &clause.parameters)?;
            for row in doomed {
                let key: Vec<SqlValue> = (0..row.len()).filter_map(|i| row.get(i).cloned()).collect();
                s.cache.remove_owner(&table.name, &key);
            }
            Ok(deleted)
        })?;
        self.cache.remove_where::<T>(predicate, self.registry())?;
        debug!(table = %table.name, deleted, "Deleted by predicate");
        Ok(deleted)
    }

    /// Insert or update by primary key.
    ///
    /// An unassigned auto-increment key (null or zero) always inserts and
    /// reads the assigned key back.
    ///
    /// # Errors
    ///
    /// Propagates synthesis, serialization and database failures.
    pub fn upsert<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let insert = self.template::<T>(&DmlSqlSynthesisArgs::insert())?;
        let upsert = self.template::<T>(&DmlSqlSynthesisArgs::upsert())?;
        self.upsert_with(&insert, &upsert, entity)
    }

    /// # Errors
    ///
    /// Fails on the first failing row; nothing is written then.
    pub fn upsert_many<T: Entity>(&self, entities: &mut [T]) -> Result<usize> {
        if entities.is_empty() {
            return Ok(0);
        }
        let insert = self.template::<T>(&DmlSqlSynthesisArgs::insert())?;
        let upsert = self.template::<T>(&DmlSqlSynthesisArgs::upsert())?;
        self.transaction(|s| {
            for entity in entities.iter_mut() {
                s.upsert_with(&insert, &upsert, entity)?;
            }
            Ok(entities.len())
        })
    }

    fn upsert_with<T: Entity>(
        &self,
        insert: &DmlSqlSynthesisResult,
        upsert: &DmlSqlSynthesisResult,
        entity: &mut T,
    ) -> Result<()> {
        let table = self.schema.table_for::<T>()?;
        if let Some(column) = table.auto_increment_column() {
            let current = entity.read(&column.name);
            if current.is_null() || current.as_i128() == Some(0) {
                return self.insert_with(insert, entity);
            }
        }
        assign_generated_keys(table, entity)?;
        let params = upsert.bind(&snapshot(entity, table), self.registry())?;
        self.conn.execute(&upsert.sql, &params)?;
        self.evict_row(table, entity)?;
        self.evict_joining(table, entity)
    }

    // ── Reads ─────────────────────────────────────────────────

    /// Load one entity by its single-column primary key.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` for composite keys and propagates query
    /// failures.
    pub fn find<T: Entity>(&self, key: impl Into<Value>) -> Result<Option<T>> {
        let table = self.schema.table_for::<T>()?;
        let [column] = table.primary_key.as_slice() else {
            return Err(Error::schema(&table.name, "find needs a single-column primary key"));
        };
        self.query::<T>().filter(Expr::prop(column.clone()).equals(key)).first()
    }

    /// Start a query over the table of `T`.
    #[must_use]
    pub const fn query<T: Entity>(&self) -> Query<'_, T, C> {
        Query {
            session: self,
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
            include_related: false,
            entity: PhantomData,
        }
    }

    fn row_values(&self, table: &SchemaTable, row: &Row) -> Result<EntityValues> {
        let mut values = EntityValues::new();
        for (i, column) in table.columns.iter().enumerate() {
            let cell = row.get(i).unwrap_or(&SqlValue::Null);
            values.set(column.name.clone(), self.registry().deserialize(cell, column.value_type)?);
        }
        Ok(values)
    }

    fn materialize_root<T: Entity>(&self, table: &SchemaTable, row: &Row, include_related: bool) -> Result<T> {
        let mut entity = T::materialize(&mut self.row_values(table, row)?)?;
        if include_related {
            let key = self.key_values(table, |m| entity.read(m))?;
            let mut path: LoadPath = vec![(table.name.clone(), key)];
            for nav in self.schema.navigations_of(&table.name) {
                let related = self.resolve_related(nav, &entity, &mut path, true)?;
                entity.attach(&nav.name, related)?;
            }
        }
        Ok(entity)
    }

    fn materialize_erased(
        &self,
        table: &SchemaTable,
        row: &Row,
        path: &mut LoadPath,
        follow: bool,
    ) -> Result<SharedEntity> {
        let binding = self
            .schema
            .binding(&table.name)
            .ok_or_else(|| Error::schema(&table.name, "no entity type bound to table"))?;
        let mut entity = (binding.materialize)(&mut self.row_values(table, row)?)?;
        if follow {
            let marker = (table.name.clone(), self.key_values(table, |m| entity.read_member(m))?);
            if !path.contains(&marker) {
                path.push(marker);
                for nav in self.schema.navigations_of(&table.name).filter(|n| n.recursive) {
                    let related = self.resolve_related(nav, &*entity, path, follow)?;
                    entity.attach_related(&nav.name, related)?;
                }
                path.pop();
            }
        }
        Ok(entity.into_shared())
    }

    /// Resolve one navigation of `owner`, consulting the cache first.
    ///
    /// With `follow`, loaded entities have their recursive navigations
    /// resolved too, skipping rows already on `path`.
    fn resolve_related(
        &self,
        nav: &NavigationProperty,
        owner: &dyn ErasedEntity,
        path: &mut LoadPath,
        follow: bool,
    ) -> Result<Related> {
        let owner_table = self.schema.require_table(&nav.owner_table)?;
        let owner_key = self.key_values(owner_table, |m| owner.read_member(m))?;
        let cache_key = CacheKey::new(&nav.owner_table, owner_key, &nav.name);
        if let Some(hit) = self.cache.try_get(&cache_key) {
            return Ok(hit.into());
        }

        let target = self.schema.require_table(&nav.target_table)?;
        let mut params = Parameters::new();
        let mut filters = Vec::with_capacity(nav.target_columns.len());
        let mut absent = false;
        for (owner_column, target_column) in nav.owner_columns.iter().zip(&nav.target_columns) {
            let value = owner.read_member(owner_column);
            if value.is_null() {
                absent = true;
                break;
            }
            let column = target.column(target_column).ok_or_else(|| {
                Error::schema(format!("{}.{target_column}", target.name), "no such column")
            })?;
            let name = format!(":n{}", params.len());
            params.bind(name.clone(), self.registry().serialize_as(&value, column.value_type)?);
            filters.push(format!("{} = {name}", quote_ident(target_column)));
        }

        let mut items = Vec::new();
        if !absent {
            let order = target
                .primary_key
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "SELECT {} FROM {} WHERE {} ORDER BY {order}",
                column_list(target),
                quote_ident(&target.name),
                filters.join(" AND "),
            );
            for row in &self.conn.query(&sql, &params)?.rows {
                items.push(self.materialize_erased(target, row, path, follow)?);
            }
        }
        debug!(
            owner = %nav.owner_table,
            navigation = %nav.name,
            loaded = items.len(),
            "Resolved navigation"
        );

        let related = match nav.cardinality {
            Cardinality::One => Related::One(items.into_iter().next()),
            Cardinality::Many => Related::Many(items),
        };
        self.cache.upsert(cache_key, related.clone().into());
        Ok(related)
    }

    fn typed_navigation<O: Entity, D: Entity>(
        &self,
        name: &str,
        cardinality: Cardinality,
    ) -> Result<&NavigationProperty> {
        let owner = self.schema.table_for::<O>()?;
        let target = self.schema.table_for::<D>()?;
        let object = format!("{}.{name}", owner.name);
        let nav = self
            .schema
            .navigation(&owner.name, name)
            .ok_or_else(|| Error::schema(&object, "no such navigation"))?;
        if nav.target_table != target.name {
            return Err(Error::schema(
                object,
                format!("navigation targets {}, not {}", nav.target_table, target.name),
            ));
        }
        if nav.cardinality != cardinality {
            return Err(Error::schema(
                object,
                format!("navigation has cardinality {}", nav.cardinality),
            ));
        }
        Ok(nav)
    }

    /// Resolve a single-valued navigation; `None` when there is no related row.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` when `navigation` is not a single-valued
    /// navigation of `O` targeting `D`, and propagates query failures.
    pub fn load_one<O: Entity, D: Entity>(&self, owner: &O, navigation: &str) -> Result<Option<Arc<D>>> {
        let nav = self.typed_navigation::<O, D>(navigation, Cardinality::One)?;
        match self.resolve_related(nav, owner, &mut Vec::new(), false)? {
            Related::One(item) => item.map(downcast_shared::<D>).transpose(),
            Related::Many(_) => Err(Error::schema(navigation, "cached collection for single navigation")),
        }
    }

    /// Resolve a collection navigation.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` when `navigation` is not a collection
    /// navigation of `O` targeting `D`, and propagates query failures.
    pub fn load_many<O: Entity, D: Entity>(&self, owner: &O, navigation: &str) -> Result<Vec<Arc<D>>> {
        let nav = self.typed_navigation::<O, D>(navigation, Cardinality::Many)?;
        match self.resolve_related(nav, owner, &mut Vec::new(), false)? {
            Related::Many(items) => items.into_iter().map(downcast_shared::<D>).collect(),
            Related::One(_) => Err(Error::schema(navigation, "cached single value for collection navigation")),
        }
    }

    /// Resolve a navigation and hand it to the owner's [`Entity::attach`].
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` for unknown navigations and propagates
    /// query and attach failures.
    pub fn resolve<O: Entity>(&self, owner: &mut O, navigation: &str) -> Result<()> {
        let table = self.schema.table_for::<O>()?;
        let nav = self
            .schema
            .navigation(&table.name, navigation)
            .ok_or_else(|| Error::schema(format!("{}.{navigation}", table.name), "no such navigation"))?;
        let related = self.resolve_related(nav, &*owner, &mut Vec::new(), false)?;
        owner.attach(navigation, related)
    }
}

// ── Queries ───────────────────────────────────────────────────

/// Query over one entity type. Reusable: every [`Query::fetch`] re-runs it.
pub struct Query<'s, T, C: DbConnection> {
    session: &'s Session<C>,
    filter: Option<Expr>,
    order: Vec<(String, SortOrder)>,
    limit: Option<u64>,
    offset: Option<u64>,
    include_related: bool,
    entity: PhantomData<fn() -> T>,
}

impl<'s, T: Entity, C: DbConnection> Query<'s, T, C> {
    /// Add a condition; repeated calls are combined with AND.
    #[must_use]
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order.push((column.into(), order));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Resolve every navigation of each result, following recursive
    /// navigations of the loaded entities.
    #[must_use]
    pub fn include_related(mut self) -> Self {
        self.include_related = true;
        self
    }

    fn select(&self, limit: Option<u64>) -> Result<(&'s SchemaTable, String, Parameters)> {
        let session = self.session;
        let table = session.schema.table_for::<T>()?;
        let mut sql = format!("SELECT {} FROM {}", column_list(table), quote_ident(&table.name));
        let mut params = Parameters::new();

        if let Some(filter) = &self.filter {
            let clause = PredicateTranslator::new(&session.schema, session.registry()).translate::<T>(filter)?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause.sql);
            params = clause.parameters;
        }

        if !self.order.is_empty() {
            let mut terms = Vec::with_capacity(self.order.len());
            for (column, order) in &self.order {
                if table.column(column).is_none() {
                    return Err(Error::schema(format!("{}.{column}", table.name), "no such column"));
                }
                terms.push(format!("{} {}", quote_ident(column), order.as_sql()));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match (limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        Ok((table, sql, params))
    }

    fn fetch_limited(&self, limit: Option<u64>) -> Result<EntityIter<'s, T, C>> {
        let (table, sql, params) = self.select(limit)?;
        let rows = self.session.conn.query(&sql, &params)?;
        Ok(EntityIter {
            session: self.session,
            table,
            rows: rows.rows.into_iter(),
            include_related: self.include_related,
            entity: PhantomData,
        })
    }

    /// Run the query. Rows are materialized as the iterator advances.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPredicate` for untranslatable filters,
    /// `SchemaDefinition` for unknown order columns, and `Database` on
    /// engine failure.
    pub fn fetch(&self) -> Result<EntityIter<'s, T, C>> {
        self.fetch_limited(self.limit)
    }

    /// # Errors
    ///
    /// See [`Self::fetch`]; also fails on the first row that cannot be
    /// materialized.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.fetch()?.collect()
    }

    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub fn first(&self) -> Result<Option<T>> {
        self.fetch_limited(Some(self.limit.map_or(1, |l| l.min(1))))?
            .next()
            .transpose()
    }

    /// Number of rows the query would return.
    ///
    /// # Errors
    ///
    /// See [`Self::fetch`].
    pub fn count(&self) -> Result<u64> {
        let (_, sql, params) = self.select(self.limit)?;
        let rows = self
            .session
            .conn
            .query(&format!("SELECT COUNT(*) FROM ({sql})"), &params)?;
        row_count(rows.scalar())
    }
}

fn row_count(cell: Option<&SqlValue>) -> Result<u64> {
    match cell {
        Some(SqlValue::Integer(n)) => u64::try_from(*n).map_err(|_| Error::Overflow {
            value: n.to_string(),
            target: "u64".into(),
        }),
        other => Err(Error::Serialization {
            type_name: "u64".into(),
            message: format!(
                "COUNT(*) returned {}",
                other.and_then(SqlValue::affinity).map_or("no value", |a| a.sql_type())
            ),
        }),
    }
}

/// Lazily materializing result sequence of a [`Query`].
pub struct EntityIter<'s, T, C: DbConnection> {
    session: &'s Session<C>,
    table: &'s SchemaTable,
    rows: std::vec::IntoIter<Row>,
    include_related: bool,
    entity: PhantomData<fn() -> T>,
}

impl<T: Entity, C: DbConnection> Iterator for EntityIter<'_, T, C> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(
            self.session
                .materialize_root::<T>(self.table, &row, self.include_related),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl<T: Entity, C: DbConnection> ExactSizeIterator for EntityIter<'_, T, C> {}
