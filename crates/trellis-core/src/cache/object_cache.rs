//! Object Cache - shared cache of loaded graph entities
//!
//! Entries are put by the layers above the record storage and expire after a
//! TTL. This crate only ever invalidates them through [`CacheInvalidation`].
//! Chain heads published during a commit are staged and become visible when
//! the commit calls `commit_cows`.

use super::CacheInvalidation;
use crate::record::{NodeRecord, PropertyValue, RelationshipRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Key for cached objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    /// Node object
    Node(u64),
    /// Relationship object
    Relationship(u64),
    /// Relationship type token
    RelationshipType(u32),
    /// Property key token
    PropertyKey(u32),
    /// Properties of the graph itself
    GraphProperties,
}

/// Cached entity payload
#[derive(Debug, Clone, PartialEq)]
pub enum CachedEntity {
    /// A node with its chain heads
    Node(NodeRecord),
    /// A relationship
    Relationship(RelationshipRecord),
    /// A token name
    Token(String),
    /// Graph properties by key id
    Properties(Vec<(u32, PropertyValue)>),
}

#[derive(Debug, Clone)]
struct CachedObject {
    entity: CachedEntity,
    cached_at: Instant,
    access_count: u64,
}

impl CachedObject {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

#[derive(Debug, Default)]
struct ObjectCacheStats {
    hits: AtomicUsize,
    misses: AtomicUsize,
    inserts: AtomicUsize,
    invalidations: AtomicUsize,
    evictions: AtomicUsize,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: usize,
    /// Lookups that found nothing
    pub misses: usize,
    /// Entries put
    pub inserts: usize,
    /// Entries dropped by invalidation events
    pub invalidations: usize,
    /// Entries dropped by TTL or capacity
    pub evictions: usize,
}

/// Object cache with TTL-based eviction
pub struct ObjectCache {
    cache: RwLock<HashMap<ObjectKey, CachedObject>>,
    pending_first_ids: Mutex<HashMap<u64, (u64, u64)>>,
    max_entries: usize,
    default_ttl: Duration,
    stats: ObjectCacheStats,
}

impl ObjectCache {
    /// Create a new object cache
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            pending_first_ids: Mutex::new(HashMap::new()),
            max_entries,
            default_ttl,
            stats: ObjectCacheStats::default(),
        }
    }

    /// Get an entity from the cache
    pub fn get(&self, key: &ObjectKey) -> Option<CachedEntity> {
        let mut cache = self.cache.write();
        let expired = match cache.get_mut(key) {
            Some(obj) if !obj.is_expired(self.default_ttl) => {
                obj.access_count += 1;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Some(obj.entity.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.remove(key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Put an entity into the cache, evicting the least used entry when full
    pub fn put(&self, key: ObjectKey, entity: CachedEntity) {
        let mut cache = self.cache.write();
        if cache.len() >= self.max_entries && !cache.contains_key(&key) {
            self.evict_one(&mut cache);
        }
        cache.insert(
            key,
            CachedObject {
                entity,
                cached_at: Instant::now(),
                access_count: 0,
            },
        );
        self.stats.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether `key` has a live entry
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.cache
            .read()
            .get(key)
            .is_some_and(|obj| !obj.is_expired(self.default_ttl))
    }

    /// Number of entries
    pub fn size(&self) -> usize {
        self.cache.read().len()
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.cache.write().clear();
        self.pending_first_ids.lock().clear();
    }

    /// Counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            inserts: self.stats.inserts.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    fn invalidate(&self, key: ObjectKey) {
        if self.cache.write().remove(&key).is_some() {
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn evict_one(&self, cache: &mut HashMap<ObjectKey, CachedObject>) {
        let victim = cache
            .iter()
            .min_by_key(|(_, obj)| (!obj.is_expired(self.default_ttl), obj.access_count))
            .map(|(key, _)| *key);
        if let Some(key) = victim {
            cache.remove(&key);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(100_000, Duration::from_secs(300))
    }
}

impl CacheInvalidation for ObjectCache {
    fn remove_node(&self, id: u64) {
        self.pending_first_ids.lock().remove(&id);
        self.invalidate(ObjectKey::Node(id));
    }

    fn remove_relationship(&self, id: u64) {
        self.invalidate(ObjectKey::Relationship(id));
    }

    fn remove_relationship_type(&self, id: u32) {
        self.invalidate(ObjectKey::RelationshipType(id));
    }

    fn remove_property_key(&self, id: u32) {
        self.invalidate(ObjectKey::PropertyKey(id));
    }

    fn remove_graph_properties(&self) {
        self.invalidate(ObjectKey::GraphProperties);
    }

    fn set_first_ids(&self, node_id: u64, first_relationship_id: u64, first_property_id: u64) {
        self.pending_first_ids
            .lock()
            .insert(node_id, (first_relationship_id, first_property_id));
    }

    fn commit_cows(&self) {
        let pending = std::mem::take(&mut *self.pending_first_ids.lock());
        let mut cache = self.cache.write();
        for (node_id, (first_rel, first_prop)) in pending {
            if let Some(obj) = cache.get_mut(&ObjectKey::Node(node_id)) {
                if let CachedEntity::Node(node) = &mut obj.entity {
                    node.first_relationship_id = first_rel;
                    node.first_property_id = first_prop;
                }
            }
        }
    }
}
