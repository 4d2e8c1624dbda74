//! Entity contract.
//!
//! Entity shapes are declared ahead of time through [`Entity::members`]
//! instead of being discovered at runtime. Each entity type exposes its data
//! members by name so the builder can derive columns, the synthesizers can
//! snapshot instances, and the session can materialize rows back into values.

use crate::error::{Error, Result};
use crate::schema::model::Cardinality;
use crate::value::{Value, ValueType};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Type-erased shared entity, as stored in the detail cache.
pub type SharedEntity = Arc<dyn Any + Send + Sync>;

/// One declared data member of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: &'static str,
    pub value_type: ValueType,
    pub nullable: bool,
    /// Set for deferred navigation wrappers; such members never become columns.
    pub navigation: Option<Cardinality>,
}

impl Member {
    /// A non-nullable data member.
    #[must_use]
    pub const fn new(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            value_type,
            nullable: false,
            navigation: None,
        }
    }

    /// A data member whose value may be null.
    #[must_use]
    pub const fn optional(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            value_type,
            nullable: true,
            navigation: None,
        }
    }

    /// A deferred navigation wrapper ([`Nav`] or [`NavMany`]).
    #[must_use]
    pub const fn navigation(name: &'static str, cardinality: Cardinality) -> Self {
        Self {
            name,
            value_type: ValueType::Any,
            nullable: true,
            navigation: Some(cardinality),
        }
    }

    #[must_use]
    pub const fn is_navigation(&self) -> bool {
        self.navigation.is_some()
    }
}

/// Snapshot of an entity's member values, keyed by member (column) name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityValues {
    values: HashMap<String, Value>,
}

impl EntityValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a member, null when absent.
    #[must_use]
    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&Value::Null)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Move a typed member out of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the stored value has another runtime type.
    pub fn take<T: crate::value::FromValue>(&mut self, name: &str) -> Result<T> {
        T::from_value(self.values.remove(name).unwrap_or(Value::Null)).map_err(|e| match e {
            Error::Serialization { type_name, message } => Error::Serialization {
                type_name,
                message: format!("member '{name}': {message}"),
            },
            other => other,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for EntityValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// A resolved navigation target handed to [`Entity::attach`].
#[derive(Clone)]
pub enum Related {
    One(Option<SharedEntity>),
    Many(Vec<SharedEntity>),
}

impl std::fmt::Debug for Related {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(Some(_)) => f.write_str("One(Some(..))"),
            Self::One(None) => f.write_str("One(None)"),
            Self::Many(items) => write!(f, "Many({} items)", items.len()),
        }
    }
}

fn downcast<T: Any + Send + Sync>(shared: SharedEntity) -> Result<Arc<T>> {
    shared.downcast::<T>().map_err(|_| Error::Serialization {
        type_name: std::any::type_name::<T>().to_string(),
        message: "related entity has another type".into(),
    })
}

/// Single-valued navigation reference.
///
/// `Unresolved` until first access through the session; afterwards either
/// the related entity or the knowledge that there is none.
#[derive(Debug, Clone)]
pub enum Nav<T> {
    Unresolved,
    Resolved(Arc<T>),
    Absent,
}

impl<T: Any + Send + Sync> Nav<T> {
    /// Build from a resolved navigation target.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the target is many-valued or of another type.
    pub fn from_related(related: Related) -> Result<Self> {
        match related {
            Related::One(Some(shared)) => Ok(Self::Resolved(downcast(shared)?)),
            Related::One(None) => Ok(Self::Absent),
            Related::Many(_) => Err(Error::Serialization {
                type_name: std::any::type_name::<T>().to_string(),
                message: "single navigation received a collection".into(),
            }),
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// The related entity, if resolved and present.
    #[must_use]
    pub fn get(&self) -> Option<&Arc<T>> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

/// Collection navigation reference.
#[derive(Debug, Clone)]
pub enum NavMany<T> {
    Unresolved,
    Resolved(Vec<Arc<T>>),
}

impl<T> Default for Nav<T> {
    fn default() -> Self {
        Self::Unresolved
    }
}

impl<T> Default for NavMany<T> {
    fn default() -> Self {
        Self::Unresolved
    }
}

impl<T: Any + Send + Sync> NavMany<T> {
    /// Build from a resolved navigation target.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the target is single-valued or of another type.
    pub fn from_related(related: Related) -> Result<Self> {
        match related {
            Related::Many(items) => items
                .into_iter()
                .map(downcast)
                .collect::<Result<Vec<_>>>()
                .map(Self::Resolved),
            Related::One(_) => Err(Error::Serialization {
                type_name: std::any::type_name::<T>().to_string(),
                message: "collection navigation received a single value".into(),
            }),
        }
    }

    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    #[must_use]
    pub fn get(&self) -> Option<&[Arc<T>]> {
        match self {
            Self::Resolved(items) => Some(items),
            Self::Unresolved => None,
        }
    }
}

/// A persistable entity type.
pub trait Entity: Any + Send + Sync + Sized {
    /// Default table name.
    fn entity_name() -> &'static str;

    /// Declared data members, navigation wrappers included.
    fn members() -> Vec<Member>;

    /// Current value of a data member; null for unknown members.
    fn read(&self, member: &str) -> Value;

    /// Assign a data member, used for engine-assigned and generated keys.
    ///
    /// # Errors
    ///
    /// Implementations return `Serialization` for a value of the wrong type.
    fn write(&mut self, member: &str, value: Value) -> Result<()>;

    /// Rebuild an instance from a row's deserialized values.
    ///
    /// # Errors
    ///
    /// Implementations return `Serialization` when a member is missing or
    /// has the wrong type.
    fn materialize(values: &mut EntityValues) -> Result<Self>;

    /// Receive a resolved navigation target. Entities without navigation
    /// members keep the default, which ignores it.
    ///
    /// # Errors
    ///
    /// Implementations return `Serialization` when the target has the wrong shape.
    fn attach(&mut self, navigation: &str, related: Related) -> Result<()> {
        let _ = (navigation, related);
        Ok(())
    }
}

/// Object-safe view of an [`Entity`], used where the concrete type is only
/// known through the schema (recursive navigation loading).
pub(crate) trait ErasedEntity: Send + Sync {
    fn read_member(&self, member: &str) -> Value;

    fn attach_related(&mut self, navigation: &str, related: Related) -> Result<()>;

    fn into_shared(self: Box<Self>) -> SharedEntity;
}

impl<T: Entity> ErasedEntity for T {
    fn read_member(&self, member: &str) -> Value {
        self.read(member)
    }

    fn attach_related(&mut self, navigation: &str, related: Related) -> Result<()> {
        self.attach(navigation, related)
    }

    fn into_shared(self: Box<Self>) -> SharedEntity {
        let arc: Arc<T> = Arc::from(self);
        arc
    }
}

/// Materializer stored per table so rows of any registered entity type can
/// be rebuilt without naming the type statically.
pub(crate) type ErasedMaterializer = fn(&mut EntityValues) -> Result<Box<dyn ErasedEntity>>;

pub(crate) fn erased_materializer<T: Entity>(values: &mut EntityValues) -> Result<Box<dyn ErasedEntity>> {
    Ok(Box::new(T::materialize(values)?))
}
