//! Write transaction states, rollback, tokens, locks and cache notifications

mod common;

use common::{CacheEvent, config, connect, create_nodes, open_kernel};
use std::sync::Arc;
use tempfile::TempDir;
use trellis_core::cache::{CacheInvalidation, CachedEntity, ObjectCache, ObjectKey};
use trellis_core::{Error, Kernel};
use trellis_core::config::StoreConfig;
use trellis_core::log::LogEntry;
use trellis_core::record::{NO_ID, PropertyValue};
use trellis_core::transaction::{StoreTransaction, TxState};

// ============================================================================
// States
// ============================================================================

#[test]
fn test_state_transitions() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    assert_eq!(tx.state(), TxState::Active);
    create_nodes(&kernel, &mut tx, 1);

    assert!(matches!(tx.commit(1), Err(Error::IllegalState(_))));
    tx.prepare().unwrap();
    assert_eq!(tx.state(), TxState::Prepared);
    assert!(matches!(tx.prepare(), Err(Error::IllegalState(_))));
    assert!(matches!(tx.node_create(99), Err(Error::IllegalState(_))));

    tx.commit(kernel.last_committed_tx() + 1).unwrap();
    assert_eq!(tx.state(), TxState::Committed);
    assert!(matches!(tx.rollback(), Err(Error::IllegalState(_))));
    assert!(matches!(tx.commit(2), Err(Error::IllegalState(_))));
}

#[test]
fn test_out_of_order_commit_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    tx.prepare().unwrap();

    let last = kernel.last_committed_tx();
    let err = tx.commit(last + 5).unwrap_err();
    match err {
        Error::OrderingViolation { expected, actual } => {
            assert_eq!(expected, last + 1);
            assert_eq!(actual, last + 5);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(tx.state(), TxState::Prepared);
    assert_eq!(kernel.last_committed_tx(), last);

    kernel.rollback(&mut tx).unwrap();
    assert_eq!(tx.state(), TxState::RolledBack);
    assert!(kernel.store().nodes().get_checked(node).unwrap().is_none());
}

#[test]
fn test_dropped_transaction_releases_its_locks() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    {
        let mut tx = kernel.begin_write();
        create_nodes(&kernel, &mut tx, 3);
        assert_eq!(tx.held_lock_count(), 3);
    }
    assert_eq!(kernel.locks().stats().locked_resources, 0);
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn test_rollback_after_prepare_frees_created_ids() {
    let dir = TempDir::new().unwrap();
    let (kernel, cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rel = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    let property = tx
        .node_add_property(nodes[0], 0, PropertyValue::String("y".repeat(200)))
        .unwrap();
    tx.prepare().unwrap();
    cache.take();
    kernel.rollback(&mut tx).unwrap();

    let store = kernel.store();
    for node in &nodes {
        assert!(store.nodes().id_generator().is_free(*node));
        assert!(cache.saw(CacheEvent::Node(*node)));
    }
    assert!(store.relationships().id_generator().is_free(rel));
    assert!(cache.saw(CacheEvent::Relationship(rel)));
    assert!(
        store
            .properties()
            .records()
            .id_generator()
            .is_free(property.record_id)
    );
    assert!(store.properties().strings().records().id_generator().free_count() > 0);
    assert_eq!(tx.held_lock_count(), 0);

    let log = kernel.command_log().unwrap();
    assert_eq!(
        log.read_entries().unwrap().last(),
        Some(&LogEntry::Rollback {
            identifier: tx.identifier()
        })
    );
    assert!(log.committed_transactions().unwrap().is_empty());
}

#[test]
fn test_rollback_keeps_ids_when_configured() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        free_ids_during_rollback: false,
        ..config(50)
    };
    let (kernel, _cache) = open_kernel(dir.path(), config);

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    kernel.rollback(&mut tx).unwrap();

    assert!(!kernel.store().nodes().id_generator().is_free(node));
    assert_ne!(kernel.next_node_id().unwrap(), node);
}

#[test]
fn test_rollback_leaves_existing_records_untouched() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rel = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    kernel.commit(&mut tx).unwrap();
    let before = kernel.store().nodes().get(nodes[0]).unwrap();

    let mut tx = kernel.begin_write();
    tx.relationship_delete(rel).unwrap();
    tx.node_add_property(nodes[0], 1, PropertyValue::Int(1)).unwrap();
    kernel.rollback(&mut tx).unwrap();

    let store = kernel.store();
    assert_eq!(store.nodes().get(nodes[0]).unwrap(), before);
    assert!(store.relationships().get_checked(rel).unwrap().is_some());
    assert!(!store.relationships().id_generator().is_free(rel));
}

// ============================================================================
// Tokens
// ============================================================================

#[test]
fn test_tokens_are_visible_in_and_after_their_transaction() {
    let dir = TempDir::new().unwrap();
    let (kernel, cache) = open_kernel(dir.path(), config(50));

    let knows = kernel.next_relationship_type_id().unwrap();
    let name = kernel.next_property_key_id().unwrap();
    let mut tx = kernel.begin_write();
    tx.create_relationship_type(knows, "KNOWS").unwrap();
    tx.create_property_key(name, "name").unwrap();
    assert!(matches!(
        tx.create_relationship_type(knows, "LIKES"),
        Err(Error::InvalidRecord(_))
    ));

    let types = tx.load_relationship_types().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "KNOWS");
    assert_eq!(tx.load_property_key(name).unwrap(), "name");
    kernel.commit(&mut tx).unwrap();
    assert!(cache.saw(CacheEvent::RelationshipType(knows)));
    assert!(cache.saw(CacheEvent::PropertyKey(name)));

    let mut reader = kernel.begin_read();
    let types = reader.load_relationship_types().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!((types[0].id, types[0].name.as_str()), (knows, "KNOWS"));
    assert_eq!(reader.load_property_key(name).unwrap(), "name");

    let mut tx = kernel.begin_write();
    assert!(matches!(
        tx.create_property_key(name, "other"),
        Err(Error::InvalidRecord(_))
    ));
}

#[test]
fn test_rolled_back_token_id_is_reused() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let id = kernel.next_relationship_type_id().unwrap();
    let mut tx = kernel.begin_write();
    tx.create_relationship_type(id, "TEMP").unwrap();
    kernel.rollback(&mut tx).unwrap();

    assert_eq!(kernel.next_relationship_type_id().unwrap(), id);
    let mut reader = kernel.begin_read();
    assert!(reader.load_relationship_types().unwrap().is_empty());
}

// ============================================================================
// Commit side effects
// ============================================================================

#[test]
fn test_commit_publishes_first_ids() {
    let dir = TempDir::new().unwrap();
    let (kernel, cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rel = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    let property = tx.node_add_property(nodes[1], 0, PropertyValue::Int(3)).unwrap();
    kernel.commit(&mut tx).unwrap();

    assert!(cache.saw(CacheEvent::FirstIds(nodes[0], rel, NO_ID)));
    assert!(cache.saw(CacheEvent::FirstIds(nodes[1], rel, property.record_id)));
    assert_eq!(cache.events().last(), Some(&CacheEvent::CommitCows));
}

#[test]
fn test_commit_evicts_changed_relationships_and_graph_properties() {
    let dir = TempDir::new().unwrap();
    let (kernel, cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 3);
    let first = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    kernel.commit(&mut tx).unwrap();
    cache.take();

    // The new head rewrites the back pointer of the old one
    let mut tx = kernel.begin_write();
    let second = connect(&kernel, &mut tx, 0, nodes[0], nodes[2]);
    tx.graph_add_property(0, PropertyValue::Int(1)).unwrap();
    kernel.commit(&mut tx).unwrap();

    assert!(cache.saw(CacheEvent::Relationship(first)));
    assert!(cache.saw(CacheEvent::Relationship(second)));
    assert!(cache.saw(CacheEvent::GraphProperties));
    assert!(!cache.saw(CacheEvent::Node(nodes[0])));
    assert_eq!(cache.events().last(), Some(&CacheEvent::CommitCows));
}

#[test]
fn test_object_cache_holds_no_stale_entries_after_commit() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(ObjectCache::default());
    let kernel = Kernel::open(
        dir.path(),
        config(50),
        Arc::clone(&cache) as Arc<dyn CacheInvalidation>,
    )
    .unwrap();

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 3);
    let first = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    cache.put(
        ObjectKey::Relationship(first),
        CachedEntity::Relationship(store.relationships().get(first).unwrap()),
    );
    cache.put(
        ObjectKey::Node(nodes[0]),
        CachedEntity::Node(store.nodes().get(nodes[0]).unwrap()),
    );
    cache.put(ObjectKey::GraphProperties, CachedEntity::Properties(Vec::new()));

    let mut tx = kernel.begin_write();
    let second = connect(&kernel, &mut tx, 0, nodes[0], nodes[2]);
    tx.relationship_add_property(first, 1, PropertyValue::Int(5))
        .unwrap();
    tx.graph_add_property(0, PropertyValue::Bool(true)).unwrap();
    kernel.commit(&mut tx).unwrap();

    assert!(!cache.contains(&ObjectKey::Relationship(first)));
    assert!(!cache.contains(&ObjectKey::GraphProperties));
    match cache.get(&ObjectKey::Node(nodes[0])) {
        Some(CachedEntity::Node(node)) => {
            assert_eq!(node, store.nodes().get(nodes[0]).unwrap());
            assert_ne!(node.first_relationship_id, NO_ID);
            assert!([first, second].contains(&node.first_relationship_id));
        }
        other => panic!("node entry lost: {other:?}"),
    }
}

#[test]
fn test_deleted_records_are_evicted_on_prepare() {
    let dir = TempDir::new().unwrap();
    let (kernel, cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 3);
    let rel = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    kernel.commit(&mut tx).unwrap();
    cache.take();

    let mut tx = kernel.begin_write();
    tx.relationship_delete(rel).unwrap();
    tx.node_delete(nodes[2]).unwrap();
    tx.prepare().unwrap();
    assert!(cache.saw(CacheEvent::Relationship(rel)));
    assert!(cache.saw(CacheEvent::Node(nodes[2])));
    assert!(!cache.saw(CacheEvent::Node(nodes[0])));
    kernel.commit(&mut tx).unwrap();
}

// ============================================================================
// Locks
// ============================================================================

#[test]
fn test_conflicting_writers_time_out() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig {
        lock_timeout_ms: 50,
        ..config(50)
    };
    let (kernel, _cache) = open_kernel(dir.path(), config);

    let mut setup = kernel.begin_write();
    let node = create_nodes(&kernel, &mut setup, 1)[0];
    kernel.commit(&mut setup).unwrap();

    let mut first = kernel.begin_write();
    let mut second = kernel.begin_write();
    first.node_add_property(node, 0, PropertyValue::Int(1)).unwrap();
    assert!(matches!(
        second.node_add_property(node, 1, PropertyValue::Int(2)),
        Err(Error::LockTimeout(_))
    ));
    assert_eq!(second.state(), TxState::Active);

    kernel.commit(&mut first).unwrap();
    second.node_add_property(node, 1, PropertyValue::Int(2)).unwrap();
    kernel.commit(&mut second).unwrap();

    let mut reader = kernel.begin_read();
    assert_eq!(reader.node_load_properties(node).unwrap().len(), 2);
}

// ============================================================================
// Read-only transactions
// ============================================================================

#[test]
fn test_read_only_transaction() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let node = create_nodes(&kernel, &mut tx, 1)[0];
    kernel.commit(&mut tx).unwrap();

    let mut reader = kernel.begin_read();
    assert!(reader.is_read_only());
    assert!(reader.node_load_light(node).unwrap().is_some());
    assert!(!reader.is_node_created(node));
    assert!(reader.created_nodes().is_empty());
    assert!(matches!(
        reader.node_add_property(node, 0, PropertyValue::Bool(true)),
        Err(Error::IllegalState(_))
    ));
    assert!(matches!(reader.node_delete(node), Err(Error::IllegalState(_))));
    assert!(matches!(reader.prepare(), Err(Error::IllegalState(_))));
    assert!(matches!(reader.commit(2), Err(Error::IllegalState(_))));
    reader.rollback().unwrap();
    assert!(kernel.store().nodes().get_checked(node).unwrap().is_some());
}
