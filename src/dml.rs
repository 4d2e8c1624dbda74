//! DML synthesis.
//!
//! Produces one parameterized statement per (table, operation shape) plus
//! the plan that binds an entity snapshot to its placeholders. Templates are
//! independent of any particular row, so bulk operations synthesize once and
//! bind many times.

use crate::ddl::quote_ident;
use crate::error::{Error, Result};
use crate::schema::{EntityValues, SchemaColumn, SchemaTable, SqliteDbSchema};
use crate::serialize::SerializerRegistry;
use crate::storage::connection::Parameters;
use crate::value::ValueType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
    Upsert,
}

/// Which columns participate in the statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ColumnSelection {
    #[default]
    All,
    Only(Vec<String>),
    Except(Vec<String>),
}

impl ColumnSelection {
    fn includes(&self, column: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(names) => names.iter().any(|n| n == column),
            Self::Except(names) => !names.iter().any(|n| n == column),
        }
    }

    fn named(&self) -> &[String] {
        match self {
            Self::All => &[],
            Self::Only(names) | Self::Except(names) => names,
        }
    }
}

/// Requested statement shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlSqlSynthesisArgs {
    pub kind: DmlKind,
    pub columns: ColumnSelection,
    /// Columns matched by UPDATE/DELETE; the primary key when unset.
    pub key_columns: Option<Vec<String>>,
    /// Unique index used as the upsert conflict target; the primary key when unset.
    pub conflict_target: Option<String>,
}

impl DmlSqlSynthesisArgs {
    #[must_use]
    pub const fn new(kind: DmlKind) -> Self {
        Self {
            kind,
            columns: ColumnSelection::All,
            key_columns: None,
            conflict_target: None,
        }
    }

    #[must_use]
    pub const fn insert() -> Self {
        Self::new(DmlKind::Insert)
    }

    #[must_use]
    pub const fn update() -> Self {
        Self::new(DmlKind::Update)
    }

    #[must_use]
    pub const fn delete() -> Self {
        Self::new(DmlKind::Delete)
    }

    #[must_use]
    pub const fn upsert() -> Self {
        Self::new(DmlKind::Upsert)
    }

    #[must_use]
    pub fn only(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = ColumnSelection::Only(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn except(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = ColumnSelection::Except(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_key_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.key_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_conflict_target(mut self, index: impl Into<String>) -> Self {
        self.conflict_target = Some(index.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRole {
    /// A column value; null is bound as NULL.
    Value,
    /// A key matched in WHERE; null is a missing key.
    Key,
}

/// Maps one placeholder to the column whose value it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    pub name: String,
    pub column: String,
    pub value_type: ValueType,
    pub role: BindingRole,
}

/// Synthesized statement and its parameter plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmlSqlSynthesisResult {
    pub table: String,
    pub kind: DmlKind,
    pub sql: String,
    pub parameters: Vec<ParameterBinding>,
}

impl DmlSqlSynthesisResult {
    /// Serialize an entity snapshot into this statement's parameters.
    ///
    /// # Errors
    ///
    /// Returns `MissingKey` when a key binding is null, and propagates
    /// serialization failures unchanged.
    pub fn bind(&self, values: &EntityValues, registry: &SerializerRegistry) -> Result<Parameters> {
        let mut params = Parameters::new();
        for binding in &self.parameters {
            let value = values.get(&binding.column);
            if binding.role == BindingRole::Key && value.is_null() {
                return Err(Error::MissingKey {
                    table: self.table.clone(),
                    column: binding.column.clone(),
                });
            }
            params.bind(binding.name.clone(), registry.serialize_as(value, binding.value_type)?);
        }
        Ok(params)
    }
}

/// Accumulates placeholders in plan order.
#[derive(Default)]
struct Plan {
    parameters: Vec<ParameterBinding>,
}

impl Plan {
    fn push(&mut self, column: &SchemaColumn, role: BindingRole) -> String {
        let name = format!(":p{}", self.parameters.len());
        self.parameters.push(ParameterBinding {
            name: name.clone(),
            column: column.name.clone(),
            value_type: column.value_type,
            role,
        });
        name
    }
}

/// DML synthesizer over a finalized schema.
#[derive(Debug, Clone, Copy)]
pub struct DmlSynthesizer<'a> {
    schema: &'a SqliteDbSchema,
}

impl<'a> DmlSynthesizer<'a> {
    #[must_use]
    pub const fn new(schema: &'a SqliteDbSchema) -> Self {
        Self { schema }
    }

    /// Synthesize for the table registered to entity type `T`.
    ///
    /// # Errors
    ///
    /// See [`Self::synthesize_for`].
    pub fn synthesize<T: 'static>(&self, args: &DmlSqlSynthesisArgs) -> Result<DmlSqlSynthesisResult> {
        let table = self.schema.table_for::<T>()?;
        synthesize_table(table, args)
    }

    /// Synthesize for a table by name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` for unknown tables, columns or conflict
    /// targets, and for updates that would set no column.
    pub fn synthesize_for(&self, table: &str, args: &DmlSqlSynthesisArgs) -> Result<DmlSqlSynthesisResult> {
        synthesize_table(self.schema.require_table(table)?, args)
    }
}

fn require_column<'t>(table: &'t SchemaTable, name: &str) -> Result<&'t SchemaColumn> {
    table
        .column(name)
        .ok_or_else(|| Error::schema(format!("{}.{name}", table.name), "no such column"))
}

fn synthesize_table(table: &SchemaTable, args: &DmlSqlSynthesisArgs) -> Result<DmlSqlSynthesisResult> {
    for name in args.columns.named() {
        require_column(table, name)?;
    }
    let key_names = args.key_columns.as_ref().unwrap_or(&table.primary_key);
    let keys = key_names
        .iter()
        .map(|name| require_column(table, name))
        .collect::<Result<Vec<_>>>()?;
    if keys.is_empty() {
        return Err(Error::schema(&table.name, "statement needs at least one key column"));
    }
    let selected: Vec<&SchemaColumn> = table
        .columns
        .iter()
        .filter(|c| args.columns.includes(&c.name))
        .collect();

    let mut plan = Plan::default();
    let name = quote_ident(&table.name);
    let sql = match args.kind {
        DmlKind::Insert => {
            let columns: Vec<&SchemaColumn> = selected
                .into_iter()
                .filter(|c| !c.is_auto_increment())
                .collect();
            insert_sql(&name, &columns, &mut plan)
        }
        DmlKind::Upsert => {
            let target = conflict_columns(table, args.conflict_target.as_deref())?;
            let mut sql = insert_sql(&name, &selected, &mut plan);
            let updates: Vec<String> = selected
                .iter()
                .filter(|c| !target.contains(&c.name) && !table.is_primary_key(&c.name))
                .map(|c| format!("{0} = excluded.{0}", quote_ident(&c.name)))
                .collect();
            let target_list = target.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ({target_list}) DO NOTHING"));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({target_list}) DO UPDATE SET {}",
                    updates.join(", ")
                ));
            }
            sql
        }
        DmlKind::Update => {
            let sets: Vec<String> = selected
                .iter()
                .filter(|c| !key_names.contains(&c.name))
                .map(|c| format!("{} = {}", quote_ident(&c.name), plan.push(c, BindingRole::Value)))
                .collect();
            if sets.is_empty() {
                return Err(Error::schema(&table.name, "no columns to update"));
            }
            format!("UPDATE {name} SET {} WHERE {}", sets.join(", "), key_filter(&keys, &mut plan))
        }
        DmlKind::Delete => format!("DELETE FROM {name} WHERE {}", key_filter(&keys, &mut plan)),
    };

    Ok(DmlSqlSynthesisResult {
        table: table.name.clone(),
        kind: args.kind,
        sql,
        parameters: plan.parameters,
    })
}

fn insert_sql(name: &str, columns: &[&SchemaColumn], plan: &mut Plan) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {name} DEFAULT VALUES");
    }
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    let placeholders: Vec<String> = columns
        .iter()
        .map(|c| plan.push(c, BindingRole::Value))
        .collect();
    format!(
        "INSERT INTO {name} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
}

fn key_filter(keys: &[&SchemaColumn], plan: &mut Plan) -> String {
    keys.iter()
        .map(|c| format!("{} = {}", quote_ident(&c.name), plan.push(c, BindingRole::Key)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn conflict_columns(table: &SchemaTable, target: Option<&str>) -> Result<Vec<String>> {
    let Some(index_name) = target else {
        return Ok(table.primary_key.clone());
    };
    let index = table
        .indexes
        .iter()
        .find(|i| i.name == index_name)
        .ok_or_else(|| Error::schema(index_name, format!("no index on {}", table.name)))?;
    if !index.unique {
        return Err(Error::schema(index_name, "conflict target must be a unique index"));
    }
    Ok(index.columns.iter().map(|c| c.column.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing::{Customer, Order, Tag, shop_schema};
    use crate::value::{SqlValue, Value};
    use uuid::Uuid;

    #[test]
    fn test_insert_omits_auto_increment_key() {
        let schema = shop_schema();
        let result = DmlSynthesizer::new(&schema)
            .synthesize::<Customer>(&DmlSqlSynthesisArgs::insert())
            .unwrap();
        assert_eq!(result.sql, "INSERT INTO \"Customer\" (\"name\") VALUES (:p0)");
        assert_eq!(result.parameters.len(), 1);
        assert!(result.parameters.iter().all(|p| p.column != "id"));
    }

    #[test]
    fn test_insert_keeps_generated_uuid_key() {
        let schema = shop_schema();
        let result = DmlSynthesizer::new(&schema)
            .synthesize::<Tag>(&DmlSqlSynthesisArgs::insert())
            .unwrap();
        assert_eq!(
            result.sql,
            "INSERT INTO \"Tag\" (\"id\", \"label\", \"weight\") VALUES (:p0, :p1, :p2)"
        );
    }

    #[test]
    fn test_insert_default_values_when_nothing_remains() {
        let schema = shop_schema();
        let result = DmlSynthesizer::new(&schema)
            .synthesize::<Customer>(&DmlSqlSynthesisArgs::insert().only(["id"]))
            .unwrap();
        assert_eq!(result.sql, "INSERT INTO \"Customer\" DEFAULT VALUES");
        assert!(result.parameters.is_empty());
    }

    #[test]
    fn test_update_and_delete_match_primary_key() {
        let schema = shop_schema();
        let dml = DmlSynthesizer::new(&schema);
        let update = dml.synthesize::<Order>(&DmlSqlSynthesisArgs::update()).unwrap();
        assert_eq!(
            update.sql,
            "UPDATE \"Order\" SET \"customer_id\" = :p0, \"total\" = :p1, \"note\" = :p2 WHERE \"id\" = :p3"
        );
        assert_eq!(update.parameters[3].role, BindingRole::Key);

        let delete = dml.synthesize::<Order>(&DmlSqlSynthesisArgs::delete()).unwrap();
        assert_eq!(delete.sql, "DELETE FROM \"Order\" WHERE \"id\" = :p0");
    }

    #[test]
    fn test_upsert_updates_non_key_columns() {
        let schema = shop_schema();
        let result = DmlSynthesizer::new(&schema)
            .synthesize::<Customer>(&DmlSqlSynthesisArgs::upsert())
            .unwrap();
        assert_eq!(
            result.sql,
            "INSERT INTO \"Customer\" (\"id\", \"name\") VALUES (:p0, :p1) ON CONFLICT (\"id\") DO UPDATE SET \"name\" = excluded.\"name\""
        );
    }

    #[test]
    fn test_upsert_on_unique_index() {
        let schema = shop_schema();
        let dml = DmlSynthesizer::new(&schema);
        let result = dml
            .synthesize::<Tag>(&DmlSqlSynthesisArgs::upsert().with_conflict_target("IX_Tag_label"))
            .unwrap();
        assert!(result.sql.ends_with(
            "ON CONFLICT (\"label\") DO UPDATE SET \"weight\" = excluded.\"weight\""
        ));
        assert!(!result.sql.contains("\"id\" = excluded"));

        let err = dml
            .synthesize::<Order>(&DmlSqlSynthesisArgs::upsert().with_conflict_target("IX_Order_placed"))
            .unwrap_err();
        assert!(err.to_string().contains("unique index"));
    }

    #[test]
    fn test_upsert_do_nothing_when_only_keys() {
        let schema = shop_schema();
        let result = DmlSynthesizer::new(&schema)
            .synthesize::<Customer>(&DmlSqlSynthesisArgs::upsert().only(["id"]))
            .unwrap();
        assert!(result.sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
    }

    #[test]
    fn test_unknown_column_selection() {
        let schema = shop_schema();
        let err = DmlSynthesizer::new(&schema)
            .synthesize::<Customer>(&DmlSqlSynthesisArgs::update().except(["nickname"]))
            .unwrap_err();
        assert!(matches!(err, Error::SchemaDefinition { .. }));
    }

    #[test]
    fn test_bind_serializes_and_requires_keys() {
        let schema = shop_schema();
        let registry = schema.registry();
        let update = DmlSynthesizer::new(&schema)
            .synthesize::<Tag>(&DmlSqlSynthesisArgs::update())
            .unwrap();

        let id = Uuid::new_v4();
        let values: EntityValues = [
            ("id", Value::Uuid(id)),
            ("label", Value::from("red")),
            ("weight", Value::U64(7)),
        ]
        .into_iter()
        .collect();
        let params = update.bind(&values, registry).unwrap();
        assert_eq!(params.get(":p0"), Some(&SqlValue::Text("red".into())));
        assert_eq!(
            params.get(":p1"),
            Some(&SqlValue::Text("00000000000000000007".into()))
        );
        assert_eq!(params.get(":p2"), Some(&SqlValue::Text(id.to_string())));

        let mut missing = values.clone();
        missing.set("id", Value::Null);
        let err = update.bind(&missing, registry).unwrap_err();
        assert!(matches!(err, Error::MissingKey { ref column, .. } if column == "id"));
    }

    #[test]
    fn test_bulk_template_is_row_independent() {
        let schema = shop_schema();
        let dml = DmlSynthesizer::new(&schema);
        let a = dml.synthesize::<Order>(&DmlSqlSynthesisArgs::insert()).unwrap();
        let b = dml.synthesize_for("Order", &DmlSqlSynthesisArgs::insert()).unwrap();
        assert_eq!(a, b);
    }
}
