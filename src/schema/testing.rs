//! Entity fixtures shared by the crate's unit tests.

use crate::error::{Error, Result};
use crate::schema::builder::{ColumnChanges, SchemaBuilder};
use crate::schema::entity::{Entity, EntityValues, Member, Nav, NavMany, Related};
use crate::schema::model::{Cardinality, Collation, ForeignKeyAction, SqliteDbSchema};
use crate::serialize::SerializerRegistry;
use crate::value::{Decimal, Value, ValueType};
use chrono::TimeDelta;
use std::sync::Arc;
use uuid::Uuid;

fn wrong_member(member: &str) -> Error {
    Error::Serialization {
        type_name: "fixture".into(),
        message: format!("cannot write member '{member}'"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub orders: NavMany<Order>,
}

impl Customer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Customer {
    fn entity_name() -> &'static str {
        "Customer"
    }

    fn members() -> Vec<Member> {
        vec![
            Member::new("id", ValueType::I64),
            Member::new("name", ValueType::Text),
            Member::navigation("orders", Cardinality::Many),
        ]
    }

    fn read(&self, member: &str) -> Value {
        match member {
            "id" => self.id.into(),
            "name" => self.name.clone().into(),
            _ => Value::Null,
        }
    }

    fn write(&mut self, member: &str, value: Value) -> Result<()> {
        match (member, value) {
            ("id", Value::I64(id)) => self.id = id,
            ("name", Value::Text(name)) => self.name = name,
            (other, _) => return Err(wrong_member(other)),
        }
        Ok(())
    }

    fn materialize(values: &mut EntityValues) -> Result<Self> {
        Ok(Self {
            id: values.take("id")?,
            name: values.take("name")?,
            orders: NavMany::Unresolved,
        })
    }

    fn attach(&mut self, navigation: &str, related: Related) -> Result<()> {
        if navigation == "orders" {
            self.orders = NavMany::from_related(related)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub total: Decimal,
    pub note: Option<String>,
    pub customer: Nav<Customer>,
}

impl Order {
    pub fn new(customer_id: i64, total: &str) -> Self {
        Self {
            customer_id,
            total: total.parse().unwrap_or_default(),
            ..Self::default()
        }
    }
}

impl Entity for Order {
    fn entity_name() -> &'static str {
        "Order"
    }

    fn members() -> Vec<Member> {
        vec![
            Member::new("id", ValueType::I64),
            Member::new("customer_id", ValueType::I64),
            Member::new("total", ValueType::Decimal),
            Member::optional("note", ValueType::Text),
            Member::navigation("customer", Cardinality::One),
        ]
    }

    fn read(&self, member: &str) -> Value {
        match member {
            "id" => self.id.into(),
            "customer_id" => self.customer_id.into(),
            "total" => self.total.into(),
            "note" => self.note.clone().into(),
            _ => Value::Null,
        }
    }

    fn write(&mut self, member: &str, value: Value) -> Result<()> {
        match (member, value) {
            ("id", Value::I64(id)) => self.id = id,
            ("customer_id", Value::I64(id)) => self.customer_id = id,
            (other, _) => return Err(wrong_member(other)),
        }
        Ok(())
    }

    fn materialize(values: &mut EntityValues) -> Result<Self> {
        Ok(Self {
            id: values.take("id")?,
            customer_id: values.take("customer_id")?,
            total: values.take("total")?,
            note: values.take("note")?,
            customer: Nav::Unresolved,
        })
    }

    fn attach(&mut self, navigation: &str, related: Related) -> Result<()> {
        if navigation == "customer" {
            self.customer = Nav::from_related(related)?;
        }
        Ok(())
    }
}

/// Entity keyed by a generated identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub label: String,
    pub weight: Option<u64>,
}

impl Entity for Tag {
    fn entity_name() -> &'static str {
        "Tag"
    }

    fn members() -> Vec<Member> {
        vec![
            Member::new("id", ValueType::Uuid),
            Member::new("label", ValueType::Text),
            Member::optional("weight", ValueType::U64),
        ]
    }

    fn read(&self, member: &str) -> Value {
        match member {
            "id" => self.id.into(),
            "label" => self.label.clone().into(),
            "weight" => self.weight.into(),
            _ => Value::Null,
        }
    }

    fn write(&mut self, member: &str, value: Value) -> Result<()> {
        match (member, value) {
            ("id", Value::Uuid(id)) => self.id = id,
            (other, _) => return Err(wrong_member(other)),
        }
        Ok(())
    }

    fn materialize(values: &mut EntityValues) -> Result<Self> {
        Ok(Self {
            id: values.take("id")?,
            label: values.take("label")?,
            weight: values.take("weight")?,
        })
    }
}

/// Entity with wide integer and duration columns, stored as sortable text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub id: i64,
    pub counter: u128,
    pub drift: i128,
    pub elapsed: TimeDelta,
}

impl Entity for Reading {
    fn entity_name() -> &'static str {
        "Reading"
    }

    fn members() -> Vec<Member> {
        vec![
            Member::new("id", ValueType::I64),
            Member::new("counter", ValueType::U128),
            Member::new("drift", ValueType::I128),
            Member::new("elapsed", ValueType::Duration),
        ]
    }

    fn read(&self, member: &str) -> Value {
        match member {
            "id" => self.id.into(),
            "counter" => self.counter.into(),
            "drift" => self.drift.into(),
            "elapsed" => self.elapsed.into(),
            _ => Value::Null,
        }
    }

    fn write(&mut self, member: &str, value: Value) -> Result<()> {
        match (member, value) {
            ("id", Value::I64(id)) => self.id = id,
            (other, _) => return Err(wrong_member(other)),
        }
        Ok(())
    }

    fn materialize(values: &mut EntityValues) -> Result<Self> {
        Ok(Self {
            id: values.take("id")?,
            counter: values.take("counter")?,
            drift: values.take("drift")?,
            elapsed: values.take("elapsed")?,
        })
    }
}

pub fn ledger_schema() -> Arc<SqliteDbSchema> {
    let registry = Arc::new(SerializerRegistry::with_builtins());
    SchemaBuilder::new(registry)
        .has_table::<Reading>(|t| {
            t.with_all_members_as_columns()
                .with_column_changes("id", ColumnChanges::auto_increment)
        })
        .and_then(SchemaBuilder::build)
        .expect("ledger schema builds")
}

pub fn shop_builder() -> SchemaBuilder {
    let registry = Arc::new(SerializerRegistry::with_builtins());
    SchemaBuilder::new(registry)
        .has_table::<Customer>(|t| {
            t.with_all_members_as_columns()
                .with_column_changes("id", ColumnChanges::auto_increment)
                .with_column_changes("name", |c| c.unique().collate(Collation::NoCase))
                .recursive("orders")
        })
        .and_then(|b| {
            b.has_table::<Order>(|t| {
                t.with_all_members_as_columns()
                    .with_column_changes("id", ColumnChanges::auto_increment)
                    .with_foreign_key(["customer_id"], |fk| {
                        fk.references::<Customer>(["id"])
                            .has_one("customer")
                            .with_many("orders")
                            .on_delete(ForeignKeyAction::Cascade)
                    })
                    .has_index("IX_Order_placed", |i| i.column_desc("total").column("note"))
            })
        })
        .and_then(|b| {
            b.has_table::<Tag>(|t| {
                t.with_all_members_as_columns()
                    .with_column_changes("id", ColumnChanges::generate_uuid)
                    .has_index("IX_Tag_label", |i| i.column("label").collate(Collation::NoCase).unique())
            })
        })
        .expect("fixture tables register")
}

pub fn shop_schema() -> Arc<SqliteDbSchema> {
    shop_builder().build().expect("fixture schema builds")
}
