//! Property chains and tokens on a write transaction
//!
//! New blocks go into the first record of the owner's chain when they fit,
//! otherwise into a fresh record that becomes the new head. A record left
//! without blocks is unlinked. String records of replaced or removed long
//! strings are retired onto the record that held them.

use super::lock::ResourceId;
use super::write::WriteTransaction;
use super::{PropertyData, PropertyMap};
use crate::chain::RecordAccess;
use crate::record::{PropertyBlock, PropertyOwner, PropertyRecord, PropertyValue, NO_ID};
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;

impl WriteTransaction {
    /// Lock and stage the owner, returning the head of its property chain
    fn owner_first_property(&mut self, owner: PropertyOwner) -> Result<u64> {
        match owner {
            PropertyOwner::Node(id) => {
                self.lock(ResourceId::node(id))?;
                Ok(self.node_mut(id, true)?.first_property_id)
            }
            PropertyOwner::Relationship(id) => {
                self.lock(ResourceId::relationship(id))?;
                Ok(self.relationship_mut(id, true)?.first_property_id)
            }
            PropertyOwner::Graph => Ok(self.graph_mut().first_property_id),
        }
    }

    fn set_owner_first_property(&mut self, owner: PropertyOwner, first: u64) -> Result<()> {
        match owner {
            PropertyOwner::Node(id) => self.node_mut(id, true)?.first_property_id = first,
            PropertyOwner::Relationship(id) => {
                self.relationship_mut(id, true)?.first_property_id = first
            }
            PropertyOwner::Graph => self.graph_mut().first_property_id = first,
        }
        Ok(())
    }

    pub(super) fn add_property(
        &mut self,
        owner: PropertyOwner,
        key_id: u32,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        let first = self.owner_first_property(owner)?;
        let block = self.store.properties().encode_value(key_id, &value)?;
        let record_id = self.add_block(owner, first, block)?;
        Ok(PropertyData {
            key_id,
            record_id,
            value: Some(value),
        })
    }

    /// Place `block` in the head record, or in a new head record when it
    /// does not fit
    fn add_block(&mut self, owner: PropertyOwner, first: u64, block: PropertyBlock) -> Result<u64> {
        if first != NO_ID && self.property(first)?.has_room_for(&block) {
            let host = self.property_mut(first, true)?;
            host.owner = Some(owner);
            host.add_block(block)?;
            return Ok(first);
        }

        let id = self.store.properties().records().next_id()?;
        let mut record = PropertyRecord::new(id);
        record.created = true;
        record.owner = Some(owner);
        record.next_property_id = first;
        record.add_block(block)?;
        self.properties.insert(id, record);

        if first != NO_ID {
            let old_head = self.property_mut(first, true)?;
            old_head.prev_property_id = id;
            old_head.owner = Some(owner);
        }
        self.set_owner_first_property(owner, id)?;
        Ok(id)
    }

    /// Move the string records of a removed block onto the record's
    /// retired list
    fn retire_block(&mut self, record_id: u64, mut block: PropertyBlock) -> Result<()> {
        self.store.properties().make_heavy(&mut block)?;
        let record = self.property_mut(record_id, false)?;
        for mut value in block.value_records {
            value.in_use = false;
            record.deleted_value_records.push(value);
        }
        Ok(())
    }

    fn take_block(
        &mut self,
        owner: PropertyOwner,
        property: &PropertyData,
    ) -> Result<(PropertyBlock, bool)> {
        let record = self.property_mut(property.record_id, true)?;
        record.owner = Some(owner);
        let block = record.remove_block(property.key_id).ok_or_else(|| {
            Error::illegal_state(format!(
                "property with key {} is not present in Property[{}]",
                property.key_id, property.record_id
            ))
        })?;
        Ok((block, record.is_empty()))
    }

    pub(super) fn change_property(
        &mut self,
        owner: PropertyOwner,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.owner_first_property(owner)?;
        // Take first: encoding allocates dynamic records for long values
        let (old, _) = self.take_block(owner, property)?;
        let block = match self
            .store
            .properties()
            .encode_value(property.key_id, &value)
        {
            Ok(block) => block,
            Err(e) => {
                self.property_mut(property.record_id, true)?.add_block(old)?;
                return Err(e);
            }
        };
        self.retire_block(property.record_id, old)?;

        let record_id = if self.property(property.record_id)?.has_room_for(&block) {
            self.property_mut(property.record_id, true)?
                .add_block(block)?;
            property.record_id
        } else {
            let first = self.owner_first_property(owner)?;
            self.add_block(owner, first, block)?
        };
        Ok(PropertyData {
            key_id: property.key_id,
            record_id,
            value: Some(value),
        })
    }

    pub(super) fn remove_property(
        &mut self,
        owner: PropertyOwner,
        property: &PropertyData,
    ) -> Result<()> {
        self.owner_first_property(owner)?;
        let (old, emptied) = self.take_block(owner, property)?;
        self.retire_block(property.record_id, old)?;
        if emptied {
            self.unlink_property_record(owner, property.record_id)?;
        }
        Ok(())
    }

    fn unlink_property_record(&mut self, owner: PropertyOwner, id: u64) -> Result<()> {
        let (prev, next) = {
            let record = self.property_mut(id, true)?;
            (record.prev_property_id, record.next_property_id)
        };
        if prev == NO_ID {
            self.set_owner_first_property(owner, next)?;
        } else {
            self.property_mut(prev, true)?.next_property_id = next;
        }
        if next != NO_ID {
            self.property_mut(next, true)?.prev_property_id = prev;
        }

        let record = self.property_mut(id, true)?;
        record.in_use = false;
        record.prev_property_id = NO_ID;
        record.next_property_id = NO_ID;
        Ok(())
    }

    /// Delete every record of a chain, returning the values it held
    pub(super) fn delete_property_chain(
        &mut self,
        owner: PropertyOwner,
        first: u64,
    ) -> Result<PropertyMap> {
        let store = Arc::clone(&self.store);
        let mut properties = PropertyMap::new();
        let mut seen = HashSet::new();
        let mut next = first;
        while next != NO_ID {
            if !seen.insert(next) {
                return Err(Error::invalid_record(format!(
                    "property chain starting at {} loops at {}",
                    first, next
                )));
            }
            let record = self.property_mut(next, true)?;
            record.owner = Some(owner);
            for mut block in std::mem::take(&mut record.blocks) {
                store.properties().make_heavy(&mut block)?;
                let value = store.properties().value(&block)?;
                properties.insert(
                    block.key_id(),
                    PropertyData {
                        key_id: block.key_id(),
                        record_id: record.id,
                        value: Some(value),
                    },
                );
                for mut value_record in block.value_records {
                    value_record.in_use = false;
                    record.deleted_value_records.push(value_record);
                }
            }
            record.in_use = false;
            next = record.next_property_id;
        }
        Ok(properties)
    }
}
