//! DDL synthesis.
//!
//! Compiles the schema model into CREATE/DROP statements and plans the
//! statement sequence that moves a database from one schema version to the
//! next. The engine's ALTER vocabulary is limited, so any change to a
//! table's stored shape is applied by rebuilding the table.

use crate::error::{Error, Result};
use crate::schema::{Index, SchemaSnapshot, SchemaTable, SqliteDbSchema};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Suffix of the temporary table used while rebuilding a table.
pub const REBUILD_SUFFIX: &str = "__entitylite_tmp";

/// Quote an identifier, doubling embedded quotes.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list<'a>(names: impl IntoIterator<Item = &'a String>) -> String {
    names
        .into_iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// CREATE TABLE for `table`, created under `name`.
#[must_use]
pub fn create_table_sql(table: &SchemaTable, name: &str) -> String {
    let single_key = table.primary_key.len() == 1;
    let mut lines = Vec::with_capacity(table.columns.len() + table.foreign_keys.len() + 1);

    for column in &table.columns {
        let mut line = format!("{} {}", quote_ident(&column.name), column.affinity.sql_type());
        let inline_key = single_key && table.is_primary_key(&column.name);
        if inline_key {
            line.push_str(" PRIMARY KEY");
            if column.is_auto_increment() {
                line.push_str(" AUTOINCREMENT");
            }
        }
        if column.unique && !inline_key {
            line.push_str(" UNIQUE");
        }
        if !column.nullable && !column.is_auto_increment() {
            line.push_str(" NOT NULL");
        }
        if let Some(collation) = column.collation {
            let _ = write!(line, " COLLATE {collation}");
        }
        lines.push(line);
    }

    if !single_key {
        lines.push(format!("PRIMARY KEY ({})", quote_list(&table.primary_key)));
    }

    for fk in &table.foreign_keys {
        lines.push(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            quote_ident(&fk.name),
            quote_list(&fk.columns),
            quote_ident(&fk.referenced_table),
            quote_list(&fk.referenced_columns),
            fk.on_update,
            fk.on_delete,
        ));
    }

    format!("CREATE TABLE {} (\n    {}\n)", quote_ident(name), lines.join(",\n    "))
}

/// CREATE INDEX for `index`, created under `name`.
#[must_use]
pub fn create_index_sql(index: &Index, name: &str) -> String {
    let columns = index
        .columns
        .iter()
        .map(|c| match c.collation {
            Some(collation) => format!("{} COLLATE {collation} {}", quote_ident(&c.column), c.order),
            None => format!("{} {}", quote_ident(&c.column), c.order),
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE {}INDEX {} ON {} ({columns})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(name),
        quote_ident(&index.table),
    )
}

#[must_use]
pub fn drop_table_sql(name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(name))
}

#[must_use]
pub fn drop_index_sql(name: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", quote_ident(name))
}

/// Tables ordered so every referenced table precedes its dependents.
///
/// Self references are ignored; members of a reference cycle keep their
/// declaration order.
#[must_use]
pub fn dependency_order(tables: &[SchemaTable]) -> Vec<&SchemaTable> {
    fn visit<'a>(
        table: &'a SchemaTable,
        tables: &'a [SchemaTable],
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
        out: &mut Vec<&'a SchemaTable>,
    ) {
        if done.contains(table.name.as_str()) || !visiting.insert(table.name.as_str()) {
            return;
        }
        for fk in &table.foreign_keys {
            if fk.referenced_table == table.name {
                continue;
            }
            if let Some(target) = tables.iter().find(|t| t.name == fk.referenced_table) {
                visit(target, tables, visiting, done, out);
            }
        }
        visiting.remove(table.name.as_str());
        done.insert(table.name.as_str());
        out.push(table);
    }

    let mut out = Vec::with_capacity(tables.len());
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    for table in tables {
        visit(table, tables, &mut visiting, &mut done, &mut out);
    }
    out
}

// ── Migration plan ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub description: String,
    pub sql: String,
}

impl MigrationStep {
    fn new(description: impl Into<String>, sql: String) -> Self {
        Self {
            description: description.into(),
            sql,
        }
    }
}

/// Ordered statements moving a database from one schema version to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }
}

// ── Synthesizer ───────────────────────────────────────────────

/// DDL synthesizer over a finalized schema.
#[derive(Debug, Clone, Copy)]
pub struct DdlSynthesizer<'a> {
    schema: &'a SqliteDbSchema,
}

impl<'a> DdlSynthesizer<'a> {
    #[must_use]
    pub const fn new(schema: &'a SqliteDbSchema) -> Self {
        Self { schema }
    }

    /// CREATE statement for a table or index, optionally under a new name.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` if no table or index has that name.
    pub fn synthesize_create(&self, object: &str, new_name: Option<&str>) -> Result<String> {
        let name = new_name.unwrap_or(object);
        if let Some(table) = self.schema.table(object) {
            return Ok(create_table_sql(table, name));
        }
        if let Some(index) = self.schema.index(object) {
            return Ok(create_index_sql(index, name));
        }
        Err(Error::schema(object, "no table or index with this name"))
    }

    /// DROP statement for a table or index.
    ///
    /// # Errors
    ///
    /// Returns `SchemaDefinition` if no table or index has that name.
    pub fn synthesize_drop(&self, object: &str) -> Result<String> {
        if self.schema.table(object).is_some() {
            return Ok(drop_table_sql(object));
        }
        if self.schema.index(object).is_some() {
            return Ok(drop_index_sql(object));
        }
        Err(Error::schema(object, "no table or index with this name"))
    }

    /// Every CREATE statement: tables in dependency order, then indexes.
    #[must_use]
    pub fn synthesize_all(&self) -> Vec<String> {
        let ordered = dependency_order(self.schema.tables());
        let mut statements: Vec<String> = ordered
            .iter()
            .map(|t| create_table_sql(t, &t.name))
            .collect();
        statements.extend(
            ordered
                .iter()
                .flat_map(|t| t.indexes.iter())
                .map(|i| create_index_sql(i, &i.name)),
        );
        statements
    }

    /// Steps moving a database at schema `old` to this synthesizer's schema.
    ///
    /// Tables absent from the new schema are left in place.
    #[must_use]
    pub fn plan_migration(&self, old: &SchemaSnapshot) -> MigrationPlan {
        let mut steps = Vec::new();

        for table in dependency_order(self.schema.tables()) {
            match old.table(&table.name) {
                None => {
                    steps.push(MigrationStep::new(
                        format!("create table {}", table.name),
                        create_table_sql(table, &table.name),
                    ));
                    steps.extend(create_indexes(table));
                }
                Some(previous) if !previous.same_shape(table) => {
                    steps.extend(rebuild_table(previous, table));
                }
                Some(previous) => steps.extend(diff_indexes(previous, table)),
            }
        }

        MigrationPlan { steps }
    }
}

fn create_indexes(table: &SchemaTable) -> impl Iterator<Item = MigrationStep> + '_ {
    table.indexes.iter().map(|index| {
        MigrationStep::new(
            format!("create index {}", index.name),
            create_index_sql(index, &index.name),
        )
    })
}

fn rebuild_table(previous: &SchemaTable, table: &SchemaTable) -> Vec<MigrationStep> {
    let temp = format!("{}{REBUILD_SUFFIX}", table.name);
    let mut steps = vec![MigrationStep::new(
        format!("create table {temp}"),
        create_table_sql(table, &temp),
    )];

    let shared: Vec<&String> = table
        .columns
        .iter()
        .map(|c| &c.name)
        .filter(|name| previous.column(name).is_some())
        .collect();
    if !shared.is_empty() {
        let columns = quote_list(shared.iter().copied());
        steps.push(MigrationStep::new(
            format!("copy rows into {temp}"),
            format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                quote_ident(&temp),
                quote_ident(&table.name),
            ),
        ));
    }

    steps.push(MigrationStep::new(
        format!("drop table {}", table.name),
        drop_table_sql(&table.name),
    ));
    steps.push(MigrationStep::new(
        format!("rename {temp} to {}", table.name),
        format!(
            "ALTER TABLE {} RENAME TO {}",
            quote_ident(&temp),
            quote_ident(&table.name)
        ),
    ));
    steps.extend(create_indexes(table));
    steps
}

fn diff_indexes(previous: &SchemaTable, table: &SchemaTable) -> Vec<MigrationStep> {
    let mut steps = Vec::new();
    for old in &previous.indexes {
        let replaced = table.indexes.iter().find(|i| i.name == old.name);
        if replaced.is_none_or(|new| new != old) {
            steps.push(MigrationStep::new(
                format!("drop index {}", old.name),
                drop_index_sql(&old.name),
            ));
        }
    }
    for index in &table.indexes {
        let existing = previous.indexes.iter().find(|i| i.name == index.name);
        if existing.is_none_or(|old| old != index) {
            steps.push(MigrationStep::new(
                format!("create index {}", index.name),
                create_index_sql(index, &index.name),
            ));
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing::{Customer, shop_schema};
    use crate::schema::{ColumnChanges, SchemaBuilder, TableBuilder};
    use crate::serialize::SerializerRegistry;
    use std::sync::Arc;

    #[test]
    fn test_create_table_with_autoincrement_and_unique() {
        let schema = shop_schema();
        let sql = DdlSynthesizer::new(&schema).synthesize_create("Customer", None).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"Customer\" (\n    \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n    \"name\" TEXT UNIQUE NOT NULL COLLATE NOCASE\n)"
        );
        assert_eq!(sql.matches("PRIMARY KEY AUTOINCREMENT").count(), 1);
        assert_eq!(sql.matches("UNIQUE NOT NULL").count(), 1);
    }

    #[test]
    fn test_create_table_with_foreign_key_and_rename() {
        let schema = shop_schema();
        let sql = DdlSynthesizer::new(&schema)
            .synthesize_create("Order", Some("Order_v2"))
            .unwrap();
        assert!(sql.starts_with("CREATE TABLE \"Order_v2\" ("));
        assert!(sql.contains("\"total\" TEXT NOT NULL"));
        assert!(sql.contains("\"note\" TEXT,") || sql.contains("\"note\" TEXT\n"));
        assert!(sql.contains(
            "CONSTRAINT \"FK_Order_Customer_customer_id\" FOREIGN KEY (\"customer_id\") REFERENCES \"Customer\" (\"id\") ON UPDATE NO ACTION ON DELETE CASCADE"
        ));
    }

    #[test]
    fn test_create_index() {
        let schema = shop_schema();
        let ddl = DdlSynthesizer::new(&schema);
        assert_eq!(
            ddl.synthesize_create("IX_Tag_label", None).unwrap(),
            "CREATE UNIQUE INDEX \"IX_Tag_label\" ON \"Tag\" (\"label\" COLLATE NOCASE ASC)"
        );
        assert_eq!(
            ddl.synthesize_create("IX_Order_placed", None).unwrap(),
            "CREATE INDEX \"IX_Order_placed\" ON \"Order\" (\"total\" DESC, \"note\" ASC)"
        );
    }

    #[test]
    fn test_drop_and_unknown_object() {
        let schema = shop_schema();
        let ddl = DdlSynthesizer::new(&schema);
        assert_eq!(ddl.synthesize_drop("Tag").unwrap(), "DROP TABLE IF EXISTS \"Tag\"");
        assert_eq!(
            ddl.synthesize_drop("IX_Tag_label").unwrap(),
            "DROP INDEX IF EXISTS \"IX_Tag_label\""
        );
        let err = ddl.synthesize_create("Nope", None).unwrap_err();
        assert!(matches!(err, Error::SchemaDefinition { .. }));
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_synthesize_all_orders_dependencies() {
        let schema = shop_schema();
        let statements = DdlSynthesizer::new(&schema).synthesize_all();
        let customer = statements.iter().position(|s| s.contains("TABLE \"Customer\"")).unwrap();
        let order = statements.iter().position(|s| s.contains("TABLE \"Order\"")).unwrap();
        assert!(customer < order);
        assert!(statements.last().unwrap().starts_with("CREATE"));
        assert_eq!(statements.iter().filter(|s| s.contains("INDEX")).count(), 2);
    }

    #[test]
    fn test_plan_from_empty_creates_everything() {
        let schema = shop_schema();
        let plan = DdlSynthesizer::new(&schema).plan_migration(&SchemaSnapshot::default());
        assert_eq!(plan.len(), 5);
        assert!(plan.steps.iter().all(|s| s.sql.starts_with("CREATE")));
    }

    #[test]
    fn test_plan_unchanged_is_empty() {
        let schema = shop_schema();
        let plan = DdlSynthesizer::new(&schema).plan_migration(&schema.snapshot());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_added_column_rebuilds_table() {
        let registry = Arc::new(SerializerRegistry::with_builtins());
        let old = SchemaBuilder::new(Arc::clone(&registry))
            .has_table::<Customer>(|t| t.with_all_members_as_columns().excluding("name"))
            .unwrap()
            .build()
            .unwrap()
            .snapshot();
        let new = SchemaBuilder::new(registry)
            .has_table::<Customer>(|t| {
                t.with_all_members_as_columns()
                    .with_column_changes("name", ColumnChanges::nullable)
                    .has_index("IX_Customer_name", |i| i.column("name"))
            })
            .unwrap()
            .build()
            .unwrap();

        let plan = DdlSynthesizer::new(&new).plan_migration(&old);
        let descriptions: Vec<&str> = plan.steps.iter().map(|s| s.description.as_str()).collect();
        assert_eq!(
            descriptions,
            vec![
                "create table Customer__entitylite_tmp",
                "copy rows into Customer__entitylite_tmp",
                "drop table Customer",
                "rename Customer__entitylite_tmp to Customer",
                "create index IX_Customer_name",
            ]
        );
        assert_eq!(
            plan.steps[1].sql,
            "INSERT INTO \"Customer__entitylite_tmp\" (\"id\") SELECT \"id\" FROM \"Customer\""
        );
    }

    #[test]
    fn test_plan_changed_index_is_recreated() {
        let registry = Arc::new(SerializerRegistry::with_builtins());
        let build = |unique: bool| {
            SchemaBuilder::new(Arc::clone(&registry))
                .has_table::<Customer>(|t| {
                    t.with_all_members_as_columns().has_index("IX_Customer_name", |i| {
                        let i = i.column("name");
                        if unique { i.unique() } else { i }
                    })
                })
                .unwrap()
                .build()
                .unwrap()
        };
        let old = build(false).snapshot();
        let new = build(true);
        let plan = DdlSynthesizer::new(&new).plan_migration(&old);
        assert_eq!(plan.len(), 2);
        assert!(plan.steps[0].sql.starts_with("DROP INDEX"));
        assert!(plan.steps[1].sql.starts_with("CREATE UNIQUE INDEX"));

        let bare = SchemaBuilder::new(Arc::clone(&registry))
            .has_table::<Customer>(TableBuilder::with_all_members_as_columns)
            .unwrap()
            .build()
            .unwrap();
        let plan = DdlSynthesizer::new(&bare).plan_migration(&old);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.steps[0].sql, "DROP INDEX IF EXISTS \"IX_Customer_name\"");
    }
}
