//! Type serialization registry.
//!
//! Bridges runtime value types and the engine's four storage affinities.
//!
//! # Submodules
//!
//! - [`builtin`] - Built-in serializer catalog
//! - [`failover`] - Generic converter used when no exact serializer applies

pub mod builtin;
pub mod failover;

pub use failover::FailoverConverter;

use crate::error::{Error, Result};
use crate::value::{SqlValue, StorageAffinity, Value, ValueType};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Bidirectional converter between one runtime type and its storage form.
///
/// Implementations only ever see non-null values; null handling is done by
/// the registry for every type.
pub trait Serializer: Send + Sync {
    /// Runtime type this serializer handles.
    fn runtime_type(&self) -> ValueType;

    /// Storage affinity of the serialized form.
    fn serialized_type(&self) -> StorageAffinity;

    /// Convert a runtime value into its storage cell.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the value is of another runtime type, or
    /// `Overflow` when the value cannot be represented in storage.
    fn serialize(&self, value: &Value) -> Result<SqlValue>;

    /// Reconstruct a runtime value from its storage cell.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` for a cell of the wrong affinity and `Format`
    /// for malformed text.
    fn deserialize(&self, cell: &SqlValue) -> Result<Value>;
}

/// Registry mapping runtime types to their active serializer.
///
/// One lock guards the whole map, so a lookup never observes a registration
/// or replacement half-way through.
pub struct SerializerRegistry {
    serializers: RwLock<HashMap<ValueType, Arc<dyn Serializer>>>,
    failover: FailoverConverter,
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.serializers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SerializerRegistry")
            .field("types", &map.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl SerializerRegistry {
    /// A registry with no serializers at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            serializers: RwLock::new(HashMap::new()),
            failover: FailoverConverter,
        }
    }

    /// A registry preloaded with the built-in catalog.
    #[must_use]
    pub fn with_builtins() -> Self {
        let map = builtin::catalog()
            .into_iter()
            .map(|s| (s.runtime_type(), s))
            .collect();
        Self {
            serializers: RwLock::new(map),
            failover: FailoverConverter,
        }
    }

    /// Add a serializer for a type that has none yet.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateSerializer` if the type already has one.
    pub fn register_serializer(&self, serializer: Arc<dyn Serializer>) -> Result<()> {
        let ty = serializer.runtime_type();
        let mut map = self.serializers.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&ty) {
            return Err(Error::DuplicateSerializer {
                type_name: ty.to_string(),
            });
        }
        debug!(value_type = %ty, "Registering serializer");
        map.insert(ty, serializer);
        Ok(())
    }

    /// Substitute the serializer of an already-registered type.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredType` if the type has no serializer, or
    /// `Serialization` if the replacement handles a different type.
    pub fn replace_serializer(&self, ty: ValueType, serializer: Arc<dyn Serializer>) -> Result<()> {
        if serializer.runtime_type() != ty {
            return Err(Error::Serialization {
                type_name: ty.to_string(),
                message: format!("replacement handles {}", serializer.runtime_type()),
            });
        }
        let mut map = self.serializers.write().unwrap_or_else(PoisonError::into_inner);
        match map.get_mut(&ty) {
            Some(slot) => {
                debug!(value_type = %ty, "Replacing serializer");
                *slot = serializer;
                Ok(())
            }
            None => Err(Error::UnregisteredType {
                type_name: ty.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn is_serializer_registered_for_model_type(&self, ty: ValueType) -> bool {
        self.serializers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&ty)
    }

    /// Active serializer for a runtime type.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredType` if none is registered.
    pub fn get(&self, ty: ValueType) -> Result<Arc<dyn Serializer>> {
        self.serializers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ty)
            .cloned()
            .ok_or_else(|| Error::UnregisteredType {
                type_name: ty.to_string(),
            })
    }

    /// Storage affinity a column of the given runtime type resolves to.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredType` if no serializer is registered.
    pub fn affinity_of(&self, ty: ValueType) -> Result<StorageAffinity> {
        Ok(self.get(ty)?.serialized_type())
    }

    #[must_use]
    pub const fn failover(&self) -> &FailoverConverter {
        &self.failover
    }

    /// Serialize a value as the given runtime type.
    ///
    /// A value of another runtime type is first converted through the
    /// failover converter.
    ///
    /// # Errors
    ///
    /// Propagates lookup, conversion and serialization failures unchanged.
    pub fn serialize_as(&self, value: &Value, ty: ValueType) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(SqlValue::Null);
        }
        let serializer = self.get(ty)?;
        if value.value_type() == Some(ty) {
            serializer.serialize(value)
        } else {
            serializer.serialize(&self.failover.convert(value, ty)?)
        }
    }

    /// Serialize a value using its own runtime type.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredType` if the value's type has no serializer.
    pub fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value.value_type() {
            None => Ok(SqlValue::Null),
            Some(ty) => self.get(ty)?.serialize(value),
        }
    }

    /// Deserialize a storage cell into the given runtime type.
    ///
    /// # Errors
    ///
    /// Propagates lookup and deserialization failures unchanged.
    pub fn deserialize(&self, cell: &SqlValue, ty: ValueType) -> Result<Value> {
        if cell.is_null() {
            return Ok(Value::Null);
        }
        self.get(ty)?.deserialize(cell)
    }

    /// Convert a runtime value to another runtime type.
    ///
    /// # Errors
    ///
    /// Returns the failover converter's error when the types differ and the
    /// pair is not convertible.
    pub fn convert(&self, value: &Value, to: ValueType) -> Result<Value> {
        if value.value_type() == Some(to) {
            return Ok(value.clone());
        }
        self.failover.convert(value, to)
    }
}
