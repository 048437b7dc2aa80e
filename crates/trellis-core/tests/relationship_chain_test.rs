//! Relationship chain maintenance through write transactions
//!
//! These tests validate:
//! - Head insertion and chain counts
//! - Self-loops sharing one chain slot
//! - Unlinking from the head, middle and tail
//! - Read-your-writes before commit
//! - Chain integrity after arbitrary create/delete sequences, single and dense

mod common;

use common::{assert_chain_integrity, config, connect, create_nodes, open_kernel, relationship_ids};
use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;
use trellis_core::Error;
use trellis_core::chain::Direction;
use trellis_core::record::NO_ID;
use trellis_core::transaction::StoreTransaction;

// ============================================================================
// Single chains
// ============================================================================

#[test]
fn test_new_relationship_becomes_head_and_carries_count() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 3);
    let r0 = connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    let r1 = connect(&kernel, &mut tx, 0, nodes[0], nodes[2]);
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    let a = store.nodes().get(nodes[0]).unwrap();
    assert_eq!(a.first_relationship_id, r1);

    let head = store.relationships().get(r1).unwrap();
    assert!(head.first_in_start_chain);
    assert_eq!(head.start_prev, 2);
    assert_eq!(head.start_next, r0);
    // r1 is alone in the end node's chain
    assert_eq!(head.end_prev, 1);

    let tail = store.relationships().get(r0).unwrap();
    assert!(!tail.first_in_start_chain);
    assert_eq!(tail.start_prev, r1);
    assert_eq!(tail.start_next, NO_ID);

    assert_eq!(assert_chain_integrity(store, nodes[0]), vec![r0, r1]);
    assert_eq!(assert_chain_integrity(store, nodes[1]), vec![r0]);
}

#[test]
fn test_loop_keeps_both_sides_identical() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let out = connect(&kernel, &mut tx, 1, nodes[0], nodes[1]);
    let looped = connect(&kernel, &mut tx, 1, nodes[0], nodes[0]);
    let inc = connect(&kernel, &mut tx, 1, nodes[1], nodes[0]);
    kernel.commit(&mut tx).unwrap();

    let store = kernel.store();
    let rel = store.relationships().get(looped).unwrap();
    assert_eq!(rel.start_prev, rel.end_prev);
    assert_eq!(rel.start_next, rel.end_next);
    assert_eq!(rel.first_in_start_chain, rel.first_in_end_chain);
    assert_eq!(assert_chain_integrity(store, nodes[0]), vec![out, looped, inc]);

    let mut reader = kernel.begin_read();
    let a = nodes[0];
    assert_eq!(reader.get_relationship_count(a, None, Direction::Both).unwrap(), 3);
    assert_eq!(reader.get_relationship_count(a, None, Direction::Outgoing).unwrap(), 2);
    assert_eq!(reader.get_relationship_count(a, None, Direction::Incoming).unwrap(), 2);

    let mut position = reader.get_relationship_chain_position(a).unwrap();
    let batch = reader
        .get_more_relationships(a, &mut position, Direction::Both, &[])
        .unwrap();
    assert_eq!(batch.outgoing.len(), 1);
    assert_eq!(batch.incoming.len(), 1);
    assert_eq!(batch.loops[0].id, looped);
}

#[test]
fn test_delete_from_head_middle_and_tail() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rels: Vec<u64> = (0..5)
        .map(|_| connect(&kernel, &mut tx, 0, nodes[0], nodes[1]))
        .collect();
    kernel.commit(&mut tx).unwrap();

    // Chain order is newest first: rels[4], rels[3], ..., rels[0]
    for (victim, remaining) in [(rels[2], 4), (rels[4], 3), (rels[0], 2)] {
        let mut tx = kernel.begin_write();
        tx.relationship_delete(victim).unwrap();
        kernel.commit(&mut tx).unwrap();

        let store = kernel.store();
        assert!(store.relationships().get_checked(victim).unwrap().is_none());
        for node in &nodes {
            assert_eq!(assert_chain_integrity(store, *node).len(), remaining);
        }
    }

    let store = kernel.store();
    assert_eq!(store.nodes().get(nodes[0]).unwrap().first_relationship_id, rels[3]);
    assert_eq!(assert_chain_integrity(store, nodes[0]), vec![rels[1], rels[3]]);
}

#[test]
fn test_reads_see_own_writes_before_commit() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let rel = connect(&kernel, &mut tx, 3, nodes[0], nodes[1]);

    assert!(tx.is_node_created(nodes[0]));
    assert!(tx.is_relationship_created(rel));
    assert_eq!(tx.created_nodes(), nodes);
    assert_eq!(
        tx.get_relationship_count(nodes[1], Some(3), Direction::Incoming)
            .unwrap(),
        1
    );
    assert_eq!(tx.get_relationship_types(nodes[0]).unwrap(), vec![3]);
    assert_eq!(relationship_ids(&mut tx, nodes[0], Direction::Both, &[]), vec![rel]);

    let mut reader = kernel.begin_read();
    assert!(reader.node_load_light(nodes[0]).unwrap().is_none());

    tx.relationship_delete(rel).unwrap();
    assert!(tx.relationship_load_light(rel).unwrap().is_none());
    assert_eq!(tx.get_relationship_count(nodes[0], None, Direction::Both).unwrap(), 0);
}

#[test]
fn test_deleting_node_with_relationships_fails_prepare() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    connect(&kernel, &mut tx, 0, nodes[0], nodes[1]);
    kernel.commit(&mut tx).unwrap();

    let mut tx = kernel.begin_write();
    tx.node_delete(nodes[0]).unwrap();
    assert!(matches!(tx.prepare(), Err(Error::InvalidRecord(_))));
    tx.rollback().unwrap();
    assert!(kernel.store().nodes().get_checked(nodes[0]).unwrap().is_some());
}

#[test]
fn test_relationship_to_missing_node_is_rejected() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(dir.path(), config(50));

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 1);
    let rel = kernel.next_relationship_id().unwrap();
    assert!(matches!(
        tx.relationship_create(rel, 0, nodes[0], 999),
        Err(Error::InvalidRecord(_))
    ));
}

#[test]
fn test_batches_respect_grab_size_and_type_filter() {
    let dir = TempDir::new().unwrap();
    let (kernel, _cache) = open_kernel(
        dir.path(),
        config(50).with_relationship_grab_size(2),
    );

    let mut tx = kernel.begin_write();
    let nodes = create_nodes(&kernel, &mut tx, 2);
    let mut by_type: HashMap<u32, Vec<u64>> = HashMap::new();
    for i in 0..7u32 {
        let type_id = i % 2;
        by_type
            .entry(type_id)
            .or_default()
            .push(connect(&kernel, &mut tx, type_id, nodes[0], nodes[1]));
    }
    kernel.commit(&mut tx).unwrap();

    let mut reader = kernel.begin_read();
    let mut position = reader.get_relationship_chain_position(nodes[0]).unwrap();
    let first = reader
        .get_more_relationships(nodes[0], &mut position, Direction::Outgoing, &[])
        .unwrap();
    assert_eq!(first.len(), 2);
    assert!(position.has_more(Direction::Outgoing, &[]));

    let mut odd = by_type.remove(&1).unwrap();
    odd.sort_unstable();
    assert_eq!(
        relationship_ids(&mut reader, nodes[0], Direction::Outgoing, &[1]),
        odd
    );
    assert!(relationship_ids(&mut reader, nodes[0], Direction::Incoming, &[]).is_empty());
    assert_eq!(relationship_ids(&mut reader, nodes[1], Direction::Incoming, &[]).len(), 7);
}

// ============================================================================
// Arbitrary connect/disconnect sequences
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Create { type_id: u32, start: usize, end: usize },
    Delete(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u32..3, 0usize..4, 0usize..4)
            .prop_map(|(type_id, start, end)| Op::Create { type_id, start, end }),
        1 => any::<usize>().prop_map(Op::Delete),
    ]
}

#[derive(Debug, Clone, Copy)]
struct Live {
    id: u64,
    type_id: u32,
    start: u64,
    end: u64,
}

fn expected(live: &[Live], node: u64, type_id: Option<u32>, direction: Direction) -> Vec<u64> {
    let mut ids: Vec<u64> = live
        .iter()
        .filter(|r| type_id.is_none_or(|t| t == r.type_id))
        .filter(|r| match direction {
            Direction::Both => r.start == node || r.end == node,
            Direction::Outgoing => r.start == node,
            Direction::Incoming => r.end == node,
        })
        .map(|r| r.id)
        .collect();
    ids.sort_unstable();
    ids
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn chains_stay_consistent(
        ops in proptest::collection::vec(op(), 1..40),
        threshold in prop_oneof![Just(2u64), Just(3u64), Just(1000u64)],
    ) {
        let dir = TempDir::new().unwrap();
        let (kernel, _cache) = open_kernel(dir.path(), config(threshold));

        let mut tx = kernel.begin_write();
        let nodes = create_nodes(&kernel, &mut tx, 4);
        kernel.commit(&mut tx).unwrap();

        let mut live: Vec<Live> = Vec::new();
        for chunk in ops.chunks(5) {
            let mut tx = kernel.begin_write();
            for op in chunk {
                match *op {
                    Op::Create { type_id, start, end } => {
                        let (start, end) = (nodes[start], nodes[end]);
                        let id = connect(&kernel, &mut tx, type_id, start, end);
                        live.push(Live { id, type_id, start, end });
                    }
                    Op::Delete(index) if !live.is_empty() => {
                        let victim = live.remove(index % live.len());
                        tx.relationship_delete(victim.id).unwrap();
                    }
                    Op::Delete(_) => {}
                }
            }
            for node in &nodes {
                let count = tx.get_relationship_count(*node, None, Direction::Both).unwrap();
                prop_assert_eq!(count as usize, expected(&live, *node, None, Direction::Both).len());
            }
            kernel.commit(&mut tx).unwrap();
        }

        let mut reader = kernel.begin_read();
        for node in &nodes {
            prop_assert_eq!(
                assert_chain_integrity(kernel.store(), *node),
                expected(&live, *node, None, Direction::Both)
            );
            for direction in [Direction::Both, Direction::Outgoing, Direction::Incoming] {
                prop_assert_eq!(
                    relationship_ids(&mut reader, *node, direction, &[]),
                    expected(&live, *node, None, direction)
                );
                for type_id in 0..3 {
                    let want = expected(&live, *node, Some(type_id), direction);
                    prop_assert_eq!(
                        reader.get_relationship_count(*node, Some(type_id), direction).unwrap(),
                        want.len() as u64
                    );
                    prop_assert_eq!(
                        relationship_ids(&mut reader, *node, direction, &[type_id]),
                        want
                    );
                }
            }
        }
    }
}
