//! Node and relationship creation and deletion on a write transaction
//!
//! Every relationship sits in one chain per endpoint (a single chain for a
//! loop). New relationships are inserted at the head and the head carries
//! the chain length in its prev field. A node whose chain reaches the
//! configured threshold is converted to dense: its relationships move into
//! per-type groups, each with outgoing, incoming and loop sub-chains.

use super::lock::ResourceId;
use super::write::WriteTransaction;
use super::PropertyMap;
use crate::chain::RecordAccess;
use crate::record::relationship::MAX_TYPE_ID;
use crate::record::{
    NodeRecord, PropertyOwner, RelDirection, RelationshipGroupRecord, RelationshipRecord, NO_ID,
};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};

/// Distinct endpoints of a relationship
fn endpoints(rel: &RelationshipRecord) -> Vec<u64> {
    if rel.is_loop() {
        vec![rel.start_node]
    } else {
        vec![rel.start_node, rel.end_node]
    }
}

fn direction_of(rel: &RelationshipRecord, node_id: u64) -> Result<RelDirection> {
    rel.direction_from(node_id).ok_or_else(|| {
        Error::invalid_record(format!(
            "Relationship[{}] is not attached to node {}",
            rel.id, node_id
        ))
    })
}

impl WriteTransaction {
    pub(super) fn create_node(&mut self, id: u64) -> Result<()> {
        if self.nodes.contains_key(&id) || self.store.nodes().get_checked(id)?.is_some() {
            return Err(Error::invalid_record(format!("Node[{}] already exists", id)));
        }
        let mut node = NodeRecord::new(id);
        node.created = true;
        self.nodes.insert(id, node);
        self.lock(ResourceId::node(id))
    }

    pub(super) fn delete_node(&mut self, id: u64) -> Result<PropertyMap> {
        self.lock(ResourceId::node(id))?;
        let node = self.node_mut(id, true)?;
        node.in_use = false;
        let first_property = node.first_property_id;
        self.delete_property_chain(PropertyOwner::Node(id), first_property)
    }

    pub(super) fn create_relationship(
        &mut self,
        id: u64,
        type_id: u32,
        start: u64,
        end: u64,
    ) -> Result<()> {
        if type_id > MAX_TYPE_ID {
            return Err(Error::invalid_record(format!(
                "relationship type {} exceeds the maximum of {}",
                type_id, MAX_TYPE_ID
            )));
        }
        if self.relationships.contains_key(&id)
            || self.store.relationships().get_checked(id)?.is_some()
        {
            return Err(Error::invalid_record(format!(
                "Relationship[{}] already exists",
                id
            )));
        }
        for node in [start, end] {
            self.lock(ResourceId::node(node))?;
            self.node_mut(node, true)?;
        }

        self.convert_to_dense_if_necessary(start)?;
        if end != start {
            self.convert_to_dense_if_necessary(end)?;
        }

        let mut rel = RelationshipRecord::new(id, start, end, type_id);
        rel.created = true;
        self.relationships.insert(id, rel);
        self.lock(ResourceId::relationship(id))?;

        self.connect_endpoint(start, id)?;
        if end != start {
            self.connect_endpoint(end, id)?;
        }
        Ok(())
    }

    fn connect_endpoint(&mut self, node_id: u64, rel_id: u64) -> Result<()> {
        let node = self.node_mut(node_id, true)?.clone();
        if node.is_dense {
            return self.connect_to_dense(node_id, rel_id);
        }
        let head = node.first_relationship_id;
        self.relationship_mut(rel_id, true)?
            .set_next_for(node_id, head);
        self.connect(node_id, head, rel_id)?;
        self.node_mut(node_id, true)?.first_relationship_id = rel_id;
        Ok(())
    }

    /// Put `rel_id` in front of `head`, moving the chain count onto it
    fn connect(&mut self, node_id: u64, head: u64, rel_id: u64) -> Result<()> {
        let count = if head == NO_ID {
            0
        } else {
            self.lock(ResourceId::relationship(head))?;
            let head_rel = self.relationship_mut(head, true)?;
            if !head_rel.first_in_chain_for(node_id)? {
                return Err(Error::invalid_record(format!(
                    "Relationship[{}] is not the head of the chain of node {}",
                    head, node_id
                )));
            }
            let count = head_rel.prev_for(node_id)?;
            head_rel.set_prev_for(node_id, rel_id, false);
            count
        };
        self.relationship_mut(rel_id, true)?
            .set_prev_for(node_id, count + 1, true);
        Ok(())
    }

    fn connect_to_dense(&mut self, node_id: u64, rel_id: u64) -> Result<()> {
        let (type_id, direction) = {
            let rel = self.relationship_mut(rel_id, true)?;
            (rel.type_id, direction_of(rel, node_id)?)
        };
        let group_id = self.get_or_create_group(node_id, type_id)?;
        let head = self.group_mut(group_id, true)?.head(direction);
        self.relationship_mut(rel_id, true)?
            .set_next_for(node_id, head);
        self.connect(node_id, head, rel_id)?;
        self.group_mut(group_id, true)?.set_head(direction, rel_id);
        Ok(())
    }

    fn convert_to_dense_if_necessary(&mut self, node_id: u64) -> Result<()> {
        let node = self.node_mut(node_id, true)?.clone();
        if node.is_dense || node.first_relationship_id == NO_ID {
            return Ok(());
        }
        let count = self
            .relationship(node.first_relationship_id)?
            .prev_for(node_id)?;
        if count + 1 >= self.store.config().dense_node_threshold {
            self.convert_to_dense(node_id, node.first_relationship_id)?;
        }
        Ok(())
    }

    fn convert_to_dense(&mut self, node_id: u64, first: u64) -> Result<()> {
        {
            let node = self.node_mut(node_id, true)?;
            node.is_dense = true;
            node.first_relationship_id = NO_ID;
        }
        self.group_cache.insert(node_id, BTreeMap::new());

        let mut seen = HashSet::new();
        let mut next = first;
        while next != NO_ID {
            if !seen.insert(next) {
                return Err(Error::invalid_record(format!(
                    "relationship chain of node {} loops at {}",
                    node_id, next
                )));
            }
            self.lock(ResourceId::relationship(next))?;
            let following = self.relationship_mut(next, true)?.next_for(node_id)?;
            self.connect_to_dense(node_id, next)?;
            next = following;
        }

        self.upgraded_dense_nodes.push(node_id);
        tracing::debug!(
            "Converted node {} to dense, {} relationships moved into groups",
            node_id,
            seen.len()
        );
        Ok(())
    }

    /// Stage the group chain of a dense node and index it by type
    fn ensure_group_cache(&mut self, node_id: u64) -> Result<()> {
        if self.group_cache.contains_key(&node_id) {
            return Ok(());
        }
        let first = self.node_mut(node_id, false)?.first_relationship_id;
        let mut types = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut prev = NO_ID;
        let mut next = first;
        while next != NO_ID {
            if !seen.insert(next) {
                return Err(Error::invalid_record(format!(
                    "group chain of node {} loops at group {}",
                    node_id, next
                )));
            }
            let group = self.group_mut(next, true)?;
            group.prev_group = prev;
            types.insert(group.type_id, group.id);
            prev = next;
            next = group.next_group;
        }
        self.group_cache.insert(node_id, types);
        Ok(())
    }

    fn group_id_for(&mut self, node_id: u64, type_id: u32) -> Result<Option<u64>> {
        self.ensure_group_cache(node_id)?;
        Ok(self
            .group_cache
            .get(&node_id)
            .and_then(|types| types.get(&type_id))
            .copied())
    }

    fn get_or_create_group(&mut self, node_id: u64, type_id: u32) -> Result<u64> {
        if let Some(id) = self.group_id_for(node_id, type_id)? {
            return Ok(id);
        }

        let id = self.store.groups().next_id()?;
        let old_first = self.node_mut(node_id, true)?.first_relationship_id;
        let mut group = RelationshipGroupRecord::new(id, type_id);
        group.created = true;
        group.next_group = old_first;
        self.groups.insert(id, group);
        self.lock(ResourceId::group(id))?;

        if old_first != NO_ID {
            self.lock(ResourceId::group(old_first))?;
            self.group_mut(old_first, true)?.prev_group = id;
        }
        self.node_mut(node_id, true)?.first_relationship_id = id;
        self.group_cache
            .entry(node_id)
            .or_default()
            .insert(type_id, id);
        Ok(id)
    }

    fn delete_group(&mut self, node_id: u64, group_id: u64) -> Result<()> {
        self.lock(ResourceId::group(group_id))?;
        let group = self.group_mut(group_id, true)?.clone();

        if group.prev_group == NO_ID {
            self.node_mut(node_id, false)?.first_relationship_id = group.next_group;
        } else {
            self.lock(ResourceId::group(group.prev_group))?;
            self.group_mut(group.prev_group, true)?.next_group = group.next_group;
        }
        if group.next_group != NO_ID {
            self.lock(ResourceId::group(group.next_group))?;
            self.group_mut(group.next_group, true)?.prev_group = group.prev_group;
        }

        self.group_mut(group_id, true)?.in_use = false;
        if let Some(types) = self.group_cache.get_mut(&node_id) {
            types.remove(&group.type_id);
        }
        tracing::debug!(
            "Deleted empty group {} (type {}) of node {}",
            group_id,
            group.type_id,
            node_id
        );
        Ok(())
    }

    pub(super) fn delete_relationship(&mut self, id: u64) -> Result<PropertyMap> {
        self.lock(ResourceId::relationship(id))?;
        let rel = self.relationship_mut(id, true)?.clone();
        for node in endpoints(&rel) {
            self.lock(ResourceId::node(node))?;
            self.node_mut(node, false)?;
        }

        let properties =
            self.delete_property_chain(PropertyOwner::Relationship(id), rel.first_property_id)?;
        self.disconnect(&rel)?;
        self.update_nodes_for_deleted_relationship(&rel)?;
        self.relationship_mut(id, false)?.in_use = false;
        Ok(properties)
    }

    /// Link the neighbours of `rel` to each other in every chain it is in
    fn disconnect(&mut self, rel: &RelationshipRecord) -> Result<()> {
        for node_id in endpoints(rel) {
            let prev = rel.prev_for(node_id)?;
            let next = rel.next_for(node_id)?;
            let first = rel.first_in_chain_for(node_id)?;

            if !first && prev != NO_ID {
                self.lock(ResourceId::relationship(prev))?;
                let prev_rel = self.relationship_mut(prev, true)?;
                if prev_rel.next_for(node_id)? != rel.id {
                    return Err(Error::invalid_record(format!(
                        "Relationship[{}] does not point at Relationship[{}] in the chain of node {}",
                        prev, rel.id, node_id
                    )));
                }
                prev_rel.set_next_for(node_id, next);
            }

            if next != NO_ID {
                self.lock(ResourceId::relationship(next))?;
                let next_rel = self.relationship_mut(next, true)?;
                if next_rel.prev_for(node_id)? != rel.id {
                    return Err(Error::invalid_record(format!(
                        "Relationship[{}] does not point back at Relationship[{}] in the chain of node {}",
                        next, rel.id, node_id
                    )));
                }
                next_rel.set_prev_for(node_id, prev, first);
            }
        }
        Ok(())
    }

    /// Move chain heads off a deleted relationship and fix the counts
    fn update_nodes_for_deleted_relationship(&mut self, rel: &RelationshipRecord) -> Result<()> {
        for node_id in endpoints(rel) {
            let first = rel.first_in_chain_for(node_id)?;
            let next = rel.next_for(node_id)?;
            let node = self.node_mut(node_id, false)?.clone();

            let head = if !node.is_dense {
                if first {
                    self.node_mut(node_id, false)?.first_relationship_id = next;
                    next
                } else {
                    node.first_relationship_id
                }
            } else {
                let direction = direction_of(rel, node_id)?;
                let group_id = self.group_id_for(node_id, rel.type_id)?.ok_or_else(|| {
                    Error::invalid_record(format!(
                        "dense node {} has no group for type {}",
                        node_id, rel.type_id
                    ))
                })?;
                let group = self.group_mut(group_id, true)?;
                if first {
                    group.set_head(direction, next);
                }
                let head = group.head(direction);
                if group.is_empty() {
                    self.delete_group(node_id, group_id)?;
                }
                head
            };

            self.decrement_count(node_id, rel, head)?;
        }
        Ok(())
    }

    fn decrement_count(&mut self, node_id: u64, rel: &RelationshipRecord, head: u64) -> Result<()> {
        if head == NO_ID {
            return Ok(());
        }
        self.lock(ResourceId::relationship(head))?;
        let current = if rel.first_in_chain_for(node_id)? {
            rel.prev_for(node_id)?
        } else {
            self.relationship_mut(head, true)?.prev_for(node_id)?
        };
        let count = current.checked_sub(1).ok_or_else(|| {
            Error::invalid_record(format!(
                "chain count of node {} underflows at Relationship[{}]",
                node_id, head
            ))
        })?;
        self.relationship_mut(head, true)?
            .set_prev_for(node_id, count, true);
        Ok(())
    }
}
