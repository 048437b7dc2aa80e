//! Read-only transaction

use super::{
    load_property_chain, property_value, PropertyData, PropertyMap, StoreTransaction,
};
use crate::chain::{self, ChainPosition, Direction, RecordAccess, RelationshipBatch};
use crate::record::{
    NodeRecord, PropertyRecord, PropertyValue, RelationshipGroupRecord, RelationshipRecord,
};
use crate::store::{GraphStore, NameData};
use crate::{Error, Result};
use std::sync::Arc;

/// Answers reads straight from the stores and rejects every mutation
pub struct ReadTransaction {
    identifier: u64,
    store: Arc<GraphStore>,
}

impl ReadTransaction {
    /// Open a read-only view of `store`
    pub fn new(identifier: u64, store: Arc<GraphStore>) -> Self {
        Self { identifier, store }
    }

    fn read_only<T>(&self) -> Result<T> {
        Err(Error::illegal_state(format!(
            "transaction {} is read only",
            self.identifier
        )))
    }
}

impl RecordAccess for ReadTransaction {
    fn store(&self) -> &GraphStore {
        &self.store
    }

    fn node(&mut self, id: u64) -> Result<NodeRecord> {
        self.store.nodes().get(id)
    }

    fn relationship(&mut self, id: u64) -> Result<RelationshipRecord> {
        self.store.relationships().get(id)
    }

    fn chain_relationship(&mut self, id: u64) -> Result<Option<RelationshipRecord>> {
        self.store.relationships().get_checked(id)
    }

    fn group(&mut self, id: u64) -> Result<RelationshipGroupRecord> {
        self.store.groups().get(id)
    }

    fn property(&mut self, id: u64) -> Result<PropertyRecord> {
        self.store.properties().records().get(id)
    }
}

impl StoreTransaction for ReadTransaction {
    fn identifier(&self) -> u64 {
        self.identifier
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn node_create(&mut self, _id: u64) -> Result<()> {
        self.read_only()
    }

    fn node_delete(&mut self, _id: u64) -> Result<PropertyMap> {
        self.read_only()
    }

    fn relationship_create(
        &mut self,
        _id: u64,
        _type_id: u32,
        _start: u64,
        _end: u64,
    ) -> Result<()> {
        self.read_only()
    }

    fn relationship_delete(&mut self, _id: u64) -> Result<PropertyMap> {
        self.read_only()
    }

    fn node_add_property(
        &mut self,
        _node: u64,
        _key_id: u32,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        self.read_only()
    }

    fn node_change_property(
        &mut self,
        _node: u64,
        _property: &PropertyData,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        self.read_only()
    }

    fn node_remove_property(&mut self, _node: u64, _property: &PropertyData) -> Result<()> {
        self.read_only()
    }

    fn relationship_add_property(
        &mut self,
        _relationship: u64,
        _key_id: u32,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        self.read_only()
    }

    fn relationship_change_property(
        &mut self,
        _relationship: u64,
        _property: &PropertyData,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        self.read_only()
    }

    fn relationship_remove_property(
        &mut self,
        _relationship: u64,
        _property: &PropertyData,
    ) -> Result<()> {
        self.read_only()
    }

    fn graph_add_property(&mut self, _key_id: u32, _value: PropertyValue) -> Result<PropertyData> {
        self.read_only()
    }

    fn graph_change_property(
        &mut self,
        _property: &PropertyData,
        _value: PropertyValue,
    ) -> Result<PropertyData> {
        self.read_only()
    }

    fn graph_remove_property(&mut self, _property: &PropertyData) -> Result<()> {
        self.read_only()
    }

    fn node_load_properties(&mut self, node: u64) -> Result<PropertyMap> {
        let first = self.node(node)?.first_property_id;
        load_property_chain(self, first)
    }

    fn relationship_load_properties(&mut self, relationship: u64) -> Result<PropertyMap> {
        let first = self.relationship(relationship)?.first_property_id;
        load_property_chain(self, first)
    }

    fn graph_load_properties(&mut self) -> Result<PropertyMap> {
        let first = self.store.meta().graph_record().first_property_id;
        load_property_chain(self, first)
    }

    fn load_property_value(&mut self, property: &PropertyData) -> Result<PropertyValue> {
        property_value(self, property)
    }

    fn node_load_light(&mut self, id: u64) -> Result<Option<NodeRecord>> {
        self.store.nodes().get_checked(id)
    }

    fn relationship_load_light(&mut self, id: u64) -> Result<Option<RelationshipRecord>> {
        self.store.relationships().get_checked(id)
    }

    fn create_relationship_type(&mut self, _id: u32, _name: &str) -> Result<()> {
        self.read_only()
    }

    fn create_property_key(&mut self, _id: u32, _name: &str) -> Result<()> {
        self.read_only()
    }

    fn load_relationship_types(&mut self) -> Result<Vec<NameData>> {
        self.store.relationship_types().all()
    }

    fn load_property_key(&mut self, id: u32) -> Result<String> {
        self.store.property_keys().name(id)
    }

    fn get_relationship_count(
        &mut self,
        node: u64,
        type_id: Option<u32>,
        direction: Direction,
    ) -> Result<u64> {
        chain::relationship_count(self, node, type_id, direction)
    }

    fn get_relationship_types(&mut self, node: u64) -> Result<Vec<u32>> {
        chain::relationship_types(self, node)
    }

    fn get_relationship_chain_position(&mut self, node: u64) -> Result<ChainPosition> {
        chain::chain_position(self, node)
    }

    fn get_more_relationships(
        &mut self,
        node: u64,
        position: &mut ChainPosition,
        direction: Direction,
        types: &[u32],
    ) -> Result<RelationshipBatch> {
        let grab_size = self.store.config().relationship_grab_size;
        chain::more_relationships(self, node, position, grab_size, direction, types)
    }

    fn is_node_created(&self, _id: u64) -> bool {
        false
    }

    fn is_relationship_created(&self, _id: u64) -> bool {
        false
    }

    fn created_nodes(&self) -> Vec<u64> {
        Vec::new()
    }

    fn prepare(&mut self) -> Result<()> {
        self.read_only()
    }

    fn commit(&mut self, _tx_id: u64) -> Result<()> {
        self.read_only()
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}
