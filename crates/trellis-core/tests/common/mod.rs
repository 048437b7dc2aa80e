//! Shared fixtures for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use trellis_core::Kernel;
use trellis_core::cache::CacheInvalidation;
use trellis_core::chain::Direction;
use trellis_core::config::StoreConfig;
use trellis_core::record::{NO_ID, RelDirection};
use trellis_core::store::GraphStore;
use trellis_core::transaction::{StoreTransaction, WriteTransaction};

/// One invalidation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Node(u64),
    Relationship(u64),
    RelationshipType(u32),
    PropertyKey(u32),
    GraphProperties,
    FirstIds(u64, u64, u64),
    CommitCows,
}

/// Cache hook that remembers every call
#[derive(Debug, Default)]
pub struct RecordingCache {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingCache {
    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<CacheEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn saw(&self, event: CacheEvent) -> bool {
        self.events.lock().contains(&event)
    }

    fn record(&self, event: CacheEvent) {
        self.events.lock().push(event);
    }
}

impl CacheInvalidation for RecordingCache {
    fn remove_node(&self, id: u64) {
        self.record(CacheEvent::Node(id));
    }

    fn remove_relationship(&self, id: u64) {
        self.record(CacheEvent::Relationship(id));
    }

    fn remove_relationship_type(&self, id: u32) {
        self.record(CacheEvent::RelationshipType(id));
    }

    fn remove_property_key(&self, id: u32) {
        self.record(CacheEvent::PropertyKey(id));
    }

    fn remove_graph_properties(&self) {
        self.record(CacheEvent::GraphProperties);
    }

    fn set_first_ids(&self, node_id: u64, first_relationship_id: u64, first_property_id: u64) {
        self.record(CacheEvent::FirstIds(
            node_id,
            first_relationship_id,
            first_property_id,
        ));
    }

    fn commit_cows(&self) {
        self.record(CacheEvent::CommitCows);
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn config(threshold: u64) -> StoreConfig {
    StoreConfig::default().with_dense_node_threshold(threshold)
}

pub fn open_kernel(dir: &Path, config: StoreConfig) -> (Kernel, Arc<RecordingCache>) {
    init_tracing();
    let cache = Arc::new(RecordingCache::default());
    let kernel = Kernel::open(dir, config, Arc::clone(&cache) as Arc<dyn CacheInvalidation>)
        .unwrap();
    (kernel, cache)
}

/// Create `count` nodes in `tx`
pub fn create_nodes(kernel: &Kernel, tx: &mut WriteTransaction, count: usize) -> Vec<u64> {
    (0..count)
        .map(|_| {
            let id = kernel.next_node_id().unwrap();
            tx.node_create(id).unwrap();
            id
        })
        .collect()
}

/// Create a relationship in `tx`, returning its id
pub fn connect(
    kernel: &Kernel,
    tx: &mut WriteTransaction,
    type_id: u32,
    start: u64,
    end: u64,
) -> u64 {
    let id = kernel.next_relationship_id().unwrap();
    tx.relationship_create(id, type_id, start, end).unwrap();
    id
}

/// Every relationship of `node` through repeated `get_more_relationships`
pub fn relationship_ids<T: StoreTransaction>(
    tx: &mut T,
    node: u64,
    direction: Direction,
    types: &[u32],
) -> Vec<u64> {
    let mut position = tx.get_relationship_chain_position(node).unwrap();
    let mut ids = Vec::new();
    loop {
        let batch = tx
            .get_more_relationships(node, &mut position, direction, types)
            .unwrap();
        if batch.is_empty() {
            break;
        }
        ids.extend(batch.ids());
    }
    ids.sort_unstable();
    ids
}

/// Walk one (sub-)chain of `node` in the store, checking the back pointers,
/// the head flag and the head count; returns the chain members
fn check_chain(store: &GraphStore, node: u64, head: u64) -> Vec<u64> {
    if head == NO_ID {
        return Vec::new();
    }
    let first = store.relationships().get(head).unwrap();
    assert!(
        first.first_in_chain_for(node).unwrap(),
        "head {} of node {} is not flagged first",
        head,
        node
    );
    let count = first.prev_for(node).unwrap();

    let mut members = vec![head];
    let mut prev = head;
    let mut next = first.next_for(node).unwrap();
    while next != NO_ID {
        let rel = store.relationships().get(next).unwrap();
        assert!(!rel.first_in_chain_for(node).unwrap());
        assert_eq!(rel.prev_for(node).unwrap(), prev, "back pointer of {}", next);
        members.push(next);
        prev = next;
        next = rel.next_for(node).unwrap();
    }
    assert_eq!(count, members.len() as u64, "head count of node {}", node);
    members
}

/// Check every chain of `node` as committed to the store; returns all its
/// relationships
pub fn assert_chain_integrity(store: &GraphStore, node: u64) -> Vec<u64> {
    let record = store.nodes().get(node).unwrap();
    let mut members = Vec::new();
    if !record.is_dense {
        members = check_chain(store, node, record.first_relationship_id);
    } else {
        let mut prev_type = None;
        let mut next = record.first_relationship_id;
        while next != NO_ID {
            let group = store.groups().get(next).unwrap();
            assert!(!group.is_empty(), "empty group {} left on node {}", next, node);
            assert_ne!(prev_type, Some(group.type_id), "duplicate group type");
            prev_type = Some(group.type_id);
            for direction in RelDirection::ALL {
                for id in check_chain(store, node, group.head(direction)) {
                    let rel = store.relationships().get(id).unwrap();
                    assert_eq!(rel.type_id, group.type_id);
                    assert_eq!(rel.direction_from(node), Some(direction));
                    members.push(id);
                }
            }
            next = group.next_group;
        }
    }
    members.sort_unstable();
    members
}
