//! Transactions over the record stores
//!
//! [`WriteTransaction`] stages every record it touches in per-transaction
//! maps, turns them into [`Command`]s on prepare and applies those on
//! commit. [`ReadTransaction`] answers the same reads straight from the
//! stores and refuses every mutation. Both implement [`StoreTransaction`].

pub mod command;
pub mod lock;
mod properties;
mod read;
mod relationships;
mod write;

pub use command::{Command, CommandSet};
pub use lock::{LockStats, ResourceId, ResourceType, RowLockGuard, RowLockManager};
pub use read::ReadTransaction;
pub use write::WriteTransaction;

use crate::chain::{ChainPosition, Direction, RecordAccess, RelationshipBatch};
use crate::record::{NodeRecord, PropertyValue, RelationshipRecord, NO_ID};
use crate::store::{chain_string, NameData};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};

/// Lifecycle of a write transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Accepting operations
    Active,
    /// Turning staged records into commands
    Preparing,
    /// Commands generated, waiting for commit or rollback
    Prepared,
    /// Applying commands to the stores
    Committing,
    /// Applied
    Committed,
    /// Discarding staged state
    RollingBack,
    /// Discarded
    RolledBack,
}

/// A property as handed to callers: where it lives and, unless it is a long
/// string loaded light, its value
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyData {
    /// Property key token
    pub key_id: u32,
    /// Property record holding the block
    pub record_id: u64,
    /// Value; `None` until resolved with `load_property_value`
    pub value: Option<PropertyValue>,
}

/// Properties of one owner by key
pub type PropertyMap = BTreeMap<u32, PropertyData>;

/// Operations shared by write and read-only transactions
pub trait StoreTransaction {
    /// Transaction identifier (not the commit transaction id)
    fn identifier(&self) -> u64;

    /// Whether every mutation is rejected
    fn is_read_only(&self) -> bool;

    /// Create node `id`
    fn node_create(&mut self, id: u64) -> Result<()>;

    /// Delete node `id` and its property chain, returning the properties
    fn node_delete(&mut self, id: u64) -> Result<PropertyMap>;

    /// Create relationship `id` of `type_id` from `start` to `end`
    fn relationship_create(&mut self, id: u64, type_id: u32, start: u64, end: u64) -> Result<()>;

    /// Delete relationship `id`, unlinking it from both chains
    fn relationship_delete(&mut self, id: u64) -> Result<PropertyMap>;

    /// Add a property to a node
    fn node_add_property(
        &mut self,
        node: u64,
        key_id: u32,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Replace the value of a node property
    fn node_change_property(
        &mut self,
        node: u64,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Remove a node property
    fn node_remove_property(&mut self, node: u64, property: &PropertyData) -> Result<()>;

    /// Add a property to a relationship
    fn relationship_add_property(
        &mut self,
        relationship: u64,
        key_id: u32,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Replace the value of a relationship property
    fn relationship_change_property(
        &mut self,
        relationship: u64,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Remove a relationship property
    fn relationship_remove_property(
        &mut self,
        relationship: u64,
        property: &PropertyData,
    ) -> Result<()>;

    /// Add a graph property
    fn graph_add_property(&mut self, key_id: u32, value: PropertyValue) -> Result<PropertyData>;

    /// Replace the value of a graph property
    fn graph_change_property(
        &mut self,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData>;

    /// Remove a graph property
    fn graph_remove_property(&mut self, property: &PropertyData) -> Result<()>;

    /// Properties of a node
    fn node_load_properties(&mut self, node: u64) -> Result<PropertyMap>;

    /// Properties of a relationship
    fn relationship_load_properties(&mut self, relationship: u64) -> Result<PropertyMap>;

    /// Properties of the graph
    fn graph_load_properties(&mut self) -> Result<PropertyMap>;

    /// Resolve the value of a property, reading string records if needed
    fn load_property_value(&mut self, property: &PropertyData) -> Result<PropertyValue>;

    /// Node record, `None` when not in use
    fn node_load_light(&mut self, id: u64) -> Result<Option<NodeRecord>>;

    /// Relationship record, `None` when not in use
    fn relationship_load_light(&mut self, id: u64) -> Result<Option<RelationshipRecord>>;

    /// Create relationship type token `id`
    fn create_relationship_type(&mut self, id: u32, name: &str) -> Result<()>;

    /// Create property key token `id`
    fn create_property_key(&mut self, id: u32, name: &str) -> Result<()>;

    /// Every relationship type
    fn load_relationship_types(&mut self) -> Result<Vec<NameData>>;

    /// Name of a property key
    fn load_property_key(&mut self, id: u32) -> Result<String>;

    /// Relationships of `node`, optionally of one type, in `direction`
    fn get_relationship_count(
        &mut self,
        node: u64,
        type_id: Option<u32>,
        direction: Direction,
    ) -> Result<u64>;

    /// Relationship types present on `node`
    fn get_relationship_types(&mut self, node: u64) -> Result<Vec<u32>>;

    /// Position before the first relationship of `node`
    fn get_relationship_chain_position(&mut self, node: u64) -> Result<ChainPosition>;

    /// Next batch of relationships from `position`; empty `types` means all
    fn get_more_relationships(
        &mut self,
        node: u64,
        position: &mut ChainPosition,
        direction: Direction,
        types: &[u32],
    ) -> Result<RelationshipBatch>;

    /// Node was created by this transaction
    fn is_node_created(&self, id: u64) -> bool;

    /// Relationship was created by this transaction
    fn is_relationship_created(&self, id: u64) -> bool;

    /// Nodes created by this transaction, in id order
    fn created_nodes(&self) -> Vec<u64>;

    /// Generate commands
    fn prepare(&mut self) -> Result<()>;

    /// Apply the commands as transaction `tx_id`
    fn commit(&mut self, tx_id: u64) -> Result<()>;

    /// Discard everything staged
    fn rollback(&mut self) -> Result<()>;
}

/// Walk a property chain; long strings stay unresolved
pub(crate) fn load_property_chain<A: RecordAccess + ?Sized>(
    access: &mut A,
    first: u64,
) -> Result<PropertyMap> {
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
        let record = access.property(next)?;
        for block in &record.blocks {
            let value = match block.inline_value()? {
                Some(value) => Some(value),
                None if !block.value_records.is_empty() => {
                    Some(PropertyValue::String(chain_string(&block.value_records)?))
                }
                None => None,
            };
            properties.insert(
                block.key_id(),
                PropertyData {
                    key_id: block.key_id(),
                    record_id: record.id,
                    value,
                },
            );
        }
        next = record.next_property_id;
    }
    Ok(properties)
}

/// Value of `property`, read from the record holding it
pub(crate) fn property_value<A: RecordAccess + ?Sized>(
    access: &mut A,
    property: &PropertyData,
) -> Result<PropertyValue> {
    let record = access.property(property.record_id)?;
    let block = record.block(property.key_id).ok_or_else(|| {
        Error::illegal_state(format!(
            "property with key {} is not present in Property[{}]",
            property.key_id, property.record_id
        ))
    })?;
    access.store().properties().value(block)
}
