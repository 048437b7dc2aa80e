//! Cache invalidation hook
//!
//! The record layer never populates caches. It tells whoever holds cached
//! entities which ones went stale: at prepare time for deleted and promoted
//! entities, after a recovered commit for everything it touched, and on
//! rollback for everything the transaction staged.

pub mod object_cache;

pub use object_cache::{CacheStats, CachedEntity, ObjectCache, ObjectKey};

/// Receiver of cache invalidation events
pub trait CacheInvalidation: Send + Sync {
    /// Drop the cached node
    fn remove_node(&self, id: u64);

    /// Drop the cached relationship
    fn remove_relationship(&self, id: u64);

    /// Drop the cached relationship type token
    fn remove_relationship_type(&self, id: u32);

    /// Drop the cached property key token
    fn remove_property_key(&self, id: u32);

    /// Drop the cached graph properties
    fn remove_graph_properties(&self);

    /// Publish the committed chain heads of a node
    fn set_first_ids(&self, node_id: u64, first_relationship_id: u64, first_property_id: u64);

    /// Merge state staged during the commit into the shared cache
    fn commit_cows(&self);
}

/// Hook for deployments without an object cache
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl CacheInvalidation for NoCache {
    fn remove_node(&self, _id: u64) {}
    fn remove_relationship(&self, _id: u64) {}
    fn remove_relationship_type(&self, _id: u32) {}
    fn remove_property_key(&self, _id: u32) {}
    fn remove_graph_properties(&self) {}
    fn set_first_ids(&self, _node_id: u64, _first_relationship_id: u64, _first_property_id: u64) {}
    fn commit_cows(&self) {}
}
