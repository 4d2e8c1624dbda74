//! Entity detail cache.
//!
//! Holds resolved navigation targets for one session, keyed by the owner's
//! table, primary-key storage values and navigation name. Two in-memory
//! instances of the same row therefore share one entry. Entries never
//! expire; they live until removed or cleared.

use crate::error::Result;
use crate::predicate::Expr;
use crate::schema::{Entity, Related, SharedEntity};
use crate::serialize::SerializerRegistry;
use crate::value::SqlValue;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Identity of one (owner row, navigation) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub owner_table: String,
    pub owner_key: Vec<SqlValue>,
    pub navigation: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(owner_table: impl Into<String>, owner_key: Vec<SqlValue>, navigation: impl Into<String>) -> Self {
        Self {
            owner_table: owner_table.into(),
            owner_key,
            navigation: navigation.into(),
        }
    }
}

/// A cached navigation target; `One(None)` records a known absence.
#[derive(Clone)]
pub enum CachedDetail {
    One(Option<SharedEntity>),
    Many(Vec<SharedEntity>),
}

impl CachedDetail {
    fn contains(&self, target: &SharedEntity) -> bool {
        let same = |item: &SharedEntity| std::ptr::addr_eq(Arc::as_ptr(item), Arc::as_ptr(target));
        match self {
            Self::One(Some(item)) => same(item),
            Self::One(None) => false,
            Self::Many(items) => items.iter().any(same),
        }
    }

    fn items(&self) -> &[SharedEntity] {
        match self {
            Self::One(Some(item)) => std::slice::from_ref(item),
            Self::One(None) => &[],
            Self::Many(items) => items,
        }
    }
}

impl std::fmt::Debug for CachedDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(Some(_)) => f.write_str("One(Some(..))"),
            Self::One(None) => f.write_str("One(None)"),
            Self::Many(items) => write!(f, "Many({} items)", items.len()),
        }
    }
}

impl From<CachedDetail> for Related {
    fn from(detail: CachedDetail) -> Self {
        match detail {
            CachedDetail::One(item) => Self::One(item),
            CachedDetail::Many(items) => Self::Many(items),
        }
    }
}

impl From<Related> for CachedDetail {
    fn from(related: Related) -> Self {
        match related {
            Related::One(item) => Self::One(item),
            Related::Many(items) => Self::Many(items),
        }
    }
}

/// Per-session cache of resolved navigation targets.
#[derive(Debug)]
pub struct EntityDetailCache {
    enabled: bool,
    entries: RwLock<HashMap<CacheKey, CachedDetail>>,
}

impl Default for EntityDetailCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EntityDetailCache {
    /// A cache; when `enabled` is false every lookup misses and nothing is stored.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn try_get(&self, key: &CacheKey) -> Option<CachedDetail> {
        if !self.enabled {
            return None;
        }
        let hit = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        debug!(
            table = %key.owner_table,
            navigation = %key.navigation,
            hit = hit.is_some(),
            "Detail cache lookup"
        );
        hit
    }

    /// Typed single-valued lookup: `Some(None)` is a cached absence.
    #[must_use]
    pub fn get_one<D: Entity>(&self, key: &CacheKey) -> Option<Option<Arc<D>>> {
        match self.try_get(key)? {
            CachedDetail::One(None) => Some(None),
            CachedDetail::One(Some(item)) => item.downcast::<D>().ok().map(Some),
            CachedDetail::Many(_) => None,
        }
    }

    #[must_use]
    pub fn get_many<D: Entity>(&self, key: &CacheKey) -> Option<Vec<Arc<D>>> {
        match self.try_get(key)? {
            CachedDetail::Many(items) => items
                .into_iter()
                .map(|item| item.downcast::<D>().ok())
                .collect(),
            CachedDetail::One(_) => None,
        }
    }

    /// Record a resolved navigation target.
    pub fn upsert(&self, key: CacheKey, detail: CachedDetail) {
        if !self.enabled {
            return;
        }
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, detail);
    }

    /// Evict every entry whose value is (or contains) this exact instance.
    pub fn remove<D: Entity>(&self, detail: &Arc<D>) -> usize {
        let target: SharedEntity = Arc::clone(detail) as SharedEntity;
        self.evict(|_, cached| cached.contains(&target))
    }

    /// Evict every entry holding an entity of type `T` that matches `predicate`.
    ///
    /// # Errors
    ///
    /// Propagates predicate evaluation failures; nothing is evicted then.
    pub fn remove_where<T: Entity>(&self, predicate: &Expr, registry: &SerializerRegistry) -> Result<usize> {
        let mut doomed = Vec::new();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            for (key, cached) in entries.iter() {
                for item in cached.items() {
                    if let Some(entity) = item.downcast_ref::<T>() {
                        if predicate.evaluate(entity, registry)? {
                            doomed.push(key.clone());
                            break;
                        }
                    }
                }
            }
        }
        Ok(self.evict(|key, _| doomed.contains(key)))
    }

    pub fn remove_key(&self, key: &CacheKey) -> usize {
        self.evict(|k, _| k == key)
    }

    /// Evict one navigation for every owner row.
    pub fn remove_navigation(&self, owner_table: &str, navigation: &str) -> usize {
        self.evict(|key, _| key.owner_table == owner_table && key.navigation == navigation)
    }

    /// Evict every entry owned by one row.
    pub fn remove_owner(&self, owner_table: &str, owner_key: &[SqlValue]) -> usize {
        self.evict(|key, _| key.owner_table == owner_table && key.owner_key == owner_key)
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("Detail cache cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, doomed: impl Fn(&CacheKey, &CachedDetail) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, cached| !doomed(key, cached));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Detail cache eviction");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing::{Customer, Order};

    fn key(owner: i64, navigation: &str) -> CacheKey {
        CacheKey::new("Order", vec![SqlValue::Integer(owner)], navigation)
    }

    #[test]
    fn test_upsert_then_hit_then_remove() {
        let cache = EntityDetailCache::new(true);
        let ann = Arc::new(Customer {
            id: 1,
            ..Customer::new("Ann")
        });
        assert!(cache.try_get(&key(10, "customer")).is_none());

        cache.upsert(key(10, "customer"), CachedDetail::One(Some(ann.clone())));
        cache.upsert(key(11, "customer"), CachedDetail::One(Some(ann.clone())));
        let hit = cache.get_one::<Customer>(&key(10, "customer")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&hit, &ann));

        assert_eq!(cache.remove(&ann), 2);
        assert!(cache.try_get(&key(10, "customer")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_is_by_identity_not_equality() {
        let cache = EntityDetailCache::new(true);
        let first = Arc::new(Customer::new("Ann"));
        let twin = Arc::new(Customer::new("Ann"));
        cache.upsert(key(1, "customer"), CachedDetail::One(Some(first)));
        assert_eq!(cache.remove(&twin), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_known_absence_is_a_hit() {
        let cache = EntityDetailCache::new(true);
        cache.upsert(key(3, "customer"), CachedDetail::One(None));
        assert!(matches!(cache.get_one::<Customer>(&key(3, "customer")), Some(None)));
    }

    #[test]
    fn test_remove_where_and_many_entries() {
        let cache = EntityDetailCache::new(true);
        let registry = SerializerRegistry::with_builtins();
        let big = Arc::new(Order::new(1, "500.00"));
        let small = Arc::new(Order::new(1, "5.00"));
        let owner = CacheKey::new("Customer", vec![SqlValue::Integer(1)], "orders");
        let other = CacheKey::new("Customer", vec![SqlValue::Integer(2)], "orders");
        cache.upsert(owner.clone(), CachedDetail::Many(vec![big.clone(), small.clone()]));
        cache.upsert(other.clone(), CachedDetail::Many(vec![small.clone()]));

        assert_eq!(cache.get_many::<Order>(&owner).unwrap().len(), 2);

        let evicted = cache
            .remove_where::<Order>(&Expr::prop("total").gt(100_i32), &registry)
            .unwrap();
        assert_eq!(evicted, 1);
        assert!(cache.try_get(&owner).is_none());
        assert!(cache.try_get(&other).is_some());

        assert_eq!(cache.remove(&small), 1);
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let cache = EntityDetailCache::new(false);
        cache.upsert(key(1, "customer"), CachedDetail::One(None));
        assert!(cache.try_get(&key(1, "customer")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_remove_owner_and_clear() {
        let cache = EntityDetailCache::default();
        cache.upsert(key(1, "customer"), CachedDetail::One(None));
        cache.upsert(key(2, "customer"), CachedDetail::One(None));
        assert_eq!(cache.remove_owner("Order", &[SqlValue::Integer(1)]), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_key_and_navigation() {
        let cache = EntityDetailCache::default();
        cache.upsert(key(1, "customer"), CachedDetail::One(None));
        cache.upsert(key(2, "customer"), CachedDetail::One(None));
        cache.upsert(key(2, "lines"), CachedDetail::Many(Vec::new()));
        assert_eq!(cache.remove_key(&key(1, "customer")), 1);
        assert_eq!(cache.remove_key(&key(1, "customer")), 0);
        assert_eq!(cache.remove_navigation("Order", "customer"), 1);
        assert!(cache.try_get(&key(2, "lines")).is_some());
    }
}
