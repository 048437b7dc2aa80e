//! Relationship chain model
//!
//! A non-dense node threads all its relationships through one doubly linked
//! chain. A dense node points at a chain of relationship groups instead,
//! one per type, each holding separate outgoing, incoming and loop
//! sub-chains. The first record of any (sub-)chain stores the chain length
//! in its prev field.
//!
//! The functions here only read. They work against any [`RecordAccess`],
//! so the read-only transaction sees the stores and the write transaction
//! sees its own staged records.

mod position;

pub use position::{ChainPosition, DenseChainPosition};

use crate::record::{
    NodeRecord, PropertyRecord, RelDirection, RelationshipGroupRecord, RelationshipRecord, NO_ID,
};
use crate::store::GraphStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Direction filter for counting and loading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Relationships starting at the node (loops included)
    Outgoing,
    /// Relationships ending at the node (loops included)
    Incoming,
    /// Every relationship
    Both,
}

impl Direction {
    /// Whether a relationship seen as `rel` from the node passes this filter
    pub fn includes(self, rel: RelDirection) -> bool {
        match self {
            Direction::Both => true,
            Direction::Outgoing => rel != RelDirection::Incoming,
            Direction::Incoming => rel != RelDirection::Outgoing,
        }
    }
}

/// Relationships returned by one `get_more_relationships` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipBatch {
    /// Relationships starting at the node
    pub outgoing: Vec<RelationshipRecord>,
    /// Relationships ending at the node
    pub incoming: Vec<RelationshipRecord>,
    /// Relationships starting and ending at the node
    pub loops: Vec<RelationshipRecord>,
}

impl RelationshipBatch {
    fn push(&mut self, direction: RelDirection, record: RelationshipRecord) {
        match direction {
            RelDirection::Outgoing => self.outgoing.push(record),
            RelDirection::Incoming => self.incoming.push(record),
            RelDirection::Loop => self.loops.push(record),
        }
    }

    /// Total number of relationships
    pub fn len(&self) -> usize {
        self.outgoing.len() + self.incoming.len() + self.loops.len()
    }

    /// No relationships at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all relationships in the batch
    pub fn ids(&self) -> Vec<u64> {
        self.outgoing
            .iter()
            .chain(&self.incoming)
            .chain(&self.loops)
            .map(|r| r.id)
            .collect()
    }
}

/// Record source for chain reads
pub(crate) trait RecordAccess {
    fn store(&self) -> &GraphStore;

    /// Node, failing when it is not in use
    fn node(&mut self, id: u64) -> Result<NodeRecord>;

    /// Relationship, failing when it is not in use
    fn relationship(&mut self, id: u64) -> Result<RelationshipRecord>;

    /// Relationship reached while walking a chain; `None` when not in use
    fn chain_relationship(&mut self, id: u64) -> Result<Option<RelationshipRecord>>;

    /// Relationship group, failing when it is not in use
    fn group(&mut self, id: u64) -> Result<RelationshipGroupRecord>;

    /// Property record, failing when it is not in use
    fn property(&mut self, id: u64) -> Result<PropertyRecord>;
}

/// Groups of a dense node by type, with `prev_group` filled in
pub(crate) fn load_groups<A: RecordAccess + ?Sized>(
    access: &mut A,
    node: &NodeRecord,
) -> Result<BTreeMap<u32, RelationshipGroupRecord>> {
    let mut groups = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut prev = NO_ID;
    let mut next = node.first_relationship_id;
    while next != NO_ID {
        if !seen.insert(next) {
            return Err(Error::invalid_record(format!(
                "group chain of node {} loops at group {}",
                node.id, next
            )));
        }
        let mut group = access.group(next)?;
        group.prev_group = prev;
        prev = group.id;
        next = group.next_group;
        groups.insert(group.type_id, group);
    }
    Ok(groups)
}

/// Call `visit` for every relationship of a non-dense node's chain
pub(crate) fn walk_chain<A, F>(access: &mut A, node: &NodeRecord, mut visit: F) -> Result<()>
where
    A: RecordAccess + ?Sized,
    F: FnMut(&RelationshipRecord),
{
    let mut seen = HashSet::new();
    let mut next = node.first_relationship_id;
    while next != NO_ID {
        if !seen.insert(next) {
            return Err(Error::invalid_record(format!(
                "relationship chain of node {} loops at {}",
                node.id, next
            )));
        }
        let rel = access.relationship(next)?;
        visit(&rel);
        next = rel.next_for(node.id)?;
    }
    Ok(())
}

/// Chain length stored in the prev field of a chain head
pub(crate) fn head_count<A: RecordAccess + ?Sized>(
    access: &mut A,
    node_id: u64,
    head: u64,
) -> Result<u64> {
    if head == NO_ID {
        return Ok(0);
    }
    access.relationship(head)?.prev_for(node_id)
}

/// Number of relationships of `node_id`, optionally restricted to one type
/// and a direction
pub(crate) fn relationship_count<A: RecordAccess + ?Sized>(
    access: &mut A,
    node_id: u64,
    type_id: Option<u32>,
    direction: Direction,
) -> Result<u64> {
    let node = access.node(node_id)?;
    if !node.is_dense {
        if type_id.is_none() && direction == Direction::Both {
            return head_count(access, node_id, node.first_relationship_id);
        }
        let mut count = 0;
        walk_chain(access, &node, |rel| {
            let type_matches = type_id.is_none_or(|t| t == rel.type_id);
            let direction_matches = rel
                .direction_from(node_id)
                .is_some_and(|d| direction.includes(d));
            if type_matches && direction_matches {
                count += 1;
            }
        })?;
        return Ok(count);
    }

    let groups = load_groups(access, &node)?;
    let mut count = 0;
    for group in groups.values() {
        if type_id.is_some_and(|t| t != group.type_id) {
            continue;
        }
        for sub_chain in RelDirection::ALL {
            if direction.includes(sub_chain) {
                count += head_count(access, node_id, group.head(sub_chain))?;
            }
        }
    }
    Ok(count)
}

/// Distinct relationship types present on a node
pub(crate) fn relationship_types<A: RecordAccess + ?Sized>(
    access: &mut A,
    node_id: u64,
) -> Result<Vec<u32>> {
    let node = access.node(node_id)?;
    if node.is_dense {
        return Ok(load_groups(access, &node)?.into_keys().collect());
    }
    let mut types = BTreeSet::new();
    walk_chain(access, &node, |rel| {
        types.insert(rel.type_id);
    })?;
    Ok(types.into_iter().collect())
}

/// Position before the first relationship of a node
pub(crate) fn chain_position<A: RecordAccess + ?Sized>(
    access: &mut A,
    node_id: u64,
) -> Result<ChainPosition> {
    let node = access.node(node_id)?;
    if node.first_relationship_id == NO_ID {
        return Ok(ChainPosition::Empty);
    }
    if node.is_dense {
        Ok(ChainPosition::Dense(DenseChainPosition::new(load_groups(
            access, &node,
        )?)))
    } else {
        Ok(ChainPosition::Single {
            next: node.first_relationship_id,
        })
    }
}

/// Load up to `grab_size` relationships from `position`, advancing it
pub(crate) fn more_relationships<A: RecordAccess + ?Sized>(
    access: &mut A,
    node_id: u64,
    position: &mut ChainPosition,
    grab_size: usize,
    direction: Direction,
    types: &[u32],
) -> Result<RelationshipBatch> {
    let mut batch = RelationshipBatch::default();
    let mut current = position.current(direction, types);
    while batch.len() < grab_size && current != NO_ID {
        let Some(rel) = access.chain_relationship(current)? else {
            tracing::warn!(
                "Relationship {} in the chain of node {} is not in use, skipping the rest of its chain",
                current,
                node_id
            );
            current = position.advance(NO_ID, direction, types);
            continue;
        };
        let next = rel.next_for(node_id)?;
        let type_matches = types.is_empty() || types.contains(&rel.type_id);
        if let Some(rel_direction) = rel.direction_from(node_id) {
            if type_matches && direction.includes(rel_direction) {
                batch.push(rel_direction, rel);
            }
        }
        current = position.advance(next, direction, types);
    }
    Ok(batch)
}
