//! Property chains of nodes, relationships and the graph

mod common;

use common::{config, connect, create_nodes, open_kernel};
use tempfile::TempDir;
use trellis_core::Error;
use trellis_core::record::{NO_ID, PropertyValue};
use trellis_core::store::GraphStore;
use trellis_core::transaction::StoreTransaction;

/// Property record ids of a chain, checking the back pointers and that no
/// record is empty
fn property_chain(store: &GraphStore, first: u64) -> Vec<u64> {
    let mut ids = Vec::new();
    let mut prev = NO_ID;
    let mut next = first;
    while next != NO_ID {
        let record = store.properties().records().get(next).unwrap();
        assert_eq!(record.prev_property_id, prev, "back pointer of {}", next);
        assert!(!record.is_empty(), "empty property record {}", next);
        ids.push(next);
        prev = next;
        next = record.next_property_id;
    }
    ids
}

fn string(len: usize) -> PropertyValue {
    PropertyValue::String("x".repeat(len))
}

// ============================================================================
// Adding and loading
// ============================================================================

#[test]
fn test_small_properties_share_one_record() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let a = tx.node_add_property(node, 1, PropertyValue::Int(42)).unwrap();
    let b = tx.node_add_property(node, 2, PropertyValue::Bool(true)).unwrap();
    assert_eq!(a.record_id, b.record_id);

    let loaded = tx.node_load_properties(node).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[&1].value, Some(PropertyValue::Int(42)));
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    let first = store.nodes().get(node).unwrap().first_property_id;
    assert_eq!(property_chain(store, first), vec![a.record_id]);

    let mut reader = kernel.begin_read();
    let loaded = reader.node_load_properties(node).unwrap();
    assert_eq!(loaded[&1], a);
    assert_eq!(loaded[&2].value, Some(PropertyValue::Bool(true)));
}

#[test]
fn test_full_record_starts_a_new_head() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let mut records = Vec::new();
    for key in 0..5 {
        let data = tx
            .node_add_property(node, key, PropertyValue::Float(key as f64))
            .unwrap();
        records.push(data.record_id);
    }
    kernel.commit(&mut tx).unwrap();

    // Two 16-byte blocks fill a record
    assert_eq!(records[0], records[1]);
    assert_eq!(records[2], records[3]);
    assert_ne!(records[1], records[2]);
    assert_ne!(records[3], records[4]);

    let store = kernel.store();
    let first = store.nodes().get(node).unwrap().first_property_id;
    assert_eq!(first, records[4]);
    assert_eq!(
        property_chain(store, first),
        vec![records[4], records[2], records[0]]
    );

    let mut reader = kernel.begin_read();
    let loaded = reader.node_load_properties(node).unwrap();
    let values: Vec<_> = loaded.values().map(|p| p.value.clone().unwrap()).collect();
    assert_eq!(
        values,
        (0..5).map(|k| PropertyValue::Float(k as f64)).collect::<Vec<_>>()
    );
}

#[test]
fn test_long_strings_load_lazily() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let long = string(300);
    tx.node_add_property(node, 3, long.clone()).unwrap();
    tx.node_add_property(node, 4, string(24)).unwrap();
    assert_eq!(
        tx.node_load_properties(node).unwrap()[&3].value,
        Some(long.clone())
    );
    kernel.commit(&mut tx).unwrap();

    let mut reader = kernel.begin_read();
    let loaded = reader.node_load_properties(node).unwrap();
    assert_eq!(loaded[&3].value, None);
    assert_eq!(loaded[&4].value, Some(string(24)));
    assert_eq!(reader.load_property_value(&loaded[&3]).unwrap(), long);
}

// ============================================================================
// Changing and removing
// ============================================================================

#[test]
fn test_change_in_place_keeps_the_record() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let k = tx.node_add_property(node, 0, string(5)).unwrap();
    kernel.commit(&mut tx).unwrap();

    let mut tx = kernel.begin_write();
    let changed = tx.node_change_property(node, &k, PropertyValue::Int(7)).unwrap();
    assert_eq!(changed.record_id, k.record_id);
    kernel.commit(&mut tx).unwrap();

    let mut reader = kernel.begin_read();
    assert_eq!(
        reader.node_load_properties(node).unwrap()[&0].value,
        Some(PropertyValue::Int(7))
    );
}

#[test]
fn test_change_that_no_longer_fits_moves_to_a_new_head() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let k = tx.node_add_property(node, 0, string(5)).unwrap();
    let n = tx.node_add_property(node, 1, PropertyValue::Int(9)).unwrap();
    assert_eq!(k.record_id, n.record_id);
    kernel.commit(&mut tx).unwrap();

    let mut tx = kernel.begin_write();
    let changed = tx.node_change_property(node, &k, string(24)).unwrap();
    assert_ne!(changed.record_id, k.record_id);
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    let first = store.nodes().get(node).unwrap().first_property_id;
    assert_eq!(first, changed.record_id);
    assert_eq!(
        property_chain(store, first),
        vec![changed.record_id, n.record_id]
    );

    let mut reader = kernel.begin_read();
    let loaded = reader.node_load_properties(node).unwrap();
    assert_eq!(loaded[&0].value, Some(string(24)));
    assert_eq!(loaded[&1].value, Some(PropertyValue::Int(9)));
}

#[test]
fn test_removing_last_block_unlinks_the_record() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let mut properties = Vec::new();
    for key in 0..6 {
        properties.push(tx.node_add_property(node, key, PropertyValue::Int(key as i64)).unwrap());
    }
    kernel.commit(&mut tx).unwrap();
    let chain_before = property_chain(
        kernel.store(),
        kernel.store().nodes().get(node).unwrap().first_property_id,
    );
    assert_eq!(chain_before.len(), 3);

    // Empty the middle record
    let mut tx = kernel.begin_write();
    tx.node_remove_property(node, &properties[2]).unwrap();
    tx.node_remove_property(node, &properties[3]).unwrap();
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    let first = store.nodes().get(node).unwrap().first_property_id;
    assert_eq!(
        property_chain(store, first),
        vec![chain_before[0], chain_before[2]]
    );
    assert!(
        store
            .properties()
            .records()
            .get_checked(chain_before[1])
            .unwrap()
            .is_none()
    );

    // Then the head
    let mut tx = kernel.begin_write();
    tx.node_remove_property(node, &properties[4]).unwrap();
    tx.node_remove_property(node, &properties[5]).unwrap();
    kernel.commit(&mut tx).unwrap();
    let first = kernel.store().nodes().get(node).unwrap().first_property_id;
    assert_eq!(first, chain_before[2]);
    assert_eq!(property_chain(kernel.store(), first).len(), 1);

    let mut reader = kernel.begin_read();
    let keys: Vec<_> = reader.node_load_properties(node).unwrap().into_keys().collect();
    assert_eq!(keys, vec![0, 1]);
}

#[test]
fn test_removing_a_missing_property_fails() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let data = tx.node_add_property(node, 0, PropertyValue::Bool(false)).unwrap();
    tx.node_remove_property(node, &data).unwrap();
    let err = tx.node_remove_property(node, &data).unwrap_err();
    assert!(matches!(err, Error::InvalidRecord(_) | Error::IllegalState(_)));
}

#[test]
fn test_changing_a_missing_property_allocates_nothing() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    let data = tx.node_add_property(node, 0, PropertyValue::Int(1)).unwrap();
    kernel.commit(&mut tx).unwrap();

    let mut tx = kernel.begin_write();
    tx.node_remove_property(node, &data).unwrap();
    let strings = kernel.store().properties().strings().records().id_generator();
    let (high, free) = (strings.high_id(), strings.free_count());

    let err = tx.node_change_property(node, &data, string(500)).unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
    assert_eq!(strings.high_id(), high);
    assert_eq!(strings.free_count(), free);
    kernel.rollback(&mut tx).unwrap();

    let mut reader = kernel.begin_read();
    assert_eq!(
        reader.node_load_properties(node).unwrap()[&0].value,
        Some(PropertyValue::Int(1))
    );
}

// ============================================================================
// Owners
// ============================================================================

#[test]
fn test_relationship_and_graph_properties() {
    let dir = TempDir::new().unwrap();
    let (kernel, cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rel = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    let weight = tx
        .relationship_add_property(rel, 0, PropertyValue::Float(0.5))
        .unwrap();
    let name = tx.graph_add_property(1, string(40)).unwrap();
    kernel.commit(&mut tx).unwrap();
    assert_ne!(kernel.store().meta().graph_record().first_property_id, NO_ID);

    let mut tx = kernel.begin_write();
    tx.relationship_change_property(rel, &weight, PropertyValue::Float(2.0))
        .unwrap();
    tx.graph_remove_property(&name).unwrap();
    tx.graph_add_property(2, PropertyValue::Int(1)).unwrap();
    cache.take();
    kernel.commit(&mut tx).unwrap();
    assert!(cache.saw(common::CacheEvent::GraphProperties));
    assert!(cache.saw(common::CacheEvent::Relationship(rel)));

    let mut reader = kernel.begin_read();
    let rel_props = reader.relationship_load_properties(rel).unwrap();
    assert_eq!(rel_props[&0].value, Some(PropertyValue::Float(2.0)));
    let graph_props = reader.graph_load_properties().unwrap();
    assert_eq!(graph_props.keys().copied().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_deleting_owners_returns_their_properties() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rel = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    tx.relationship_add_property(rel, 5, string(100)).unwrap();
    for key in 0..3 {
        tx.node_add_property(nodes[0], key, PropertyValue::Int(key as i64))
            .unwrap();
    }
    kernel.commit(&mut tx).unwrap();
    let first = kernel.store().nodes().get(nodes[0]).unwrap().first_property_id;
    let records = property_chain(kernel.store(), first);

    let mut tx = kernel.begin_write();
    let rel_props = tx.relationship_delete(rel).unwrap();
    assert_eq!(rel_props[&5].value, Some(string(100)));
    let node_props = tx.node_delete(nodes[0]).unwrap();
    assert_eq!(node_props.len(), 3);
    assert_eq!(node_props[&2].value, Some(PropertyValue::Int(2)));
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    assert!(store.nodes().get_checked(nodes[0]).unwrap().is_none());
    for id in records {
        assert!(store.properties().records().get_checked(id).unwrap().is_none());
    }
}
