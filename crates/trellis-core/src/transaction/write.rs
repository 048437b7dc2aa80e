//! Write transaction: staging, command generation and the commit protocol
//!
//! ```text
//! Active ──prepare──▶ Preparing ──▶ Prepared ──commit──▶ Committing ──▶ Committed
//!   │                    │             │
//!   └────────────────────┴─────────────┴──rollback──▶ RollingBack ──▶ RolledBack
//! ```
//!
//! Records are copied into per-transaction maps on first touch and every
//! read looks there before going to the stores. The maps are dropped
//! wholesale when the transaction ends.

use super::command::CommandSet;
use super::lock::{ResourceId, RowLockGuard, RowLockManager};
use super::{
    load_property_chain, property_value, PropertyData, PropertyMap, StoreTransaction, TxState,
};
use crate::cache::CacheInvalidation;
use crate::chain::{self, ChainPosition, Direction, RecordAccess, RelationshipBatch};
use crate::log::{CommandLog, LogEntry};
use crate::record::{
    GraphRecord, NodeRecord, PropertyOwner, PropertyRecord, PropertyValue, Record,
    RelationshipGroupRecord, RelationshipRecord, TokenRecord, NO_ID,
};
use crate::store::{chain_string, GraphStore, NameData, RecordStore, TokenStore};
use crate::{Error, Result};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A transaction that stages record changes and applies them on commit
pub struct WriteTransaction {
    pub(super) identifier: u64,
    pub(super) store: Arc<GraphStore>,
    cache: Arc<dyn CacheInvalidation>,
    locks: RowLockManager,
    held_locks: HashMap<ResourceId, RowLockGuard>,
    log: Option<Arc<CommandLog>>,
    state: TxState,
    recovered: bool,
    pub(super) nodes: HashMap<u64, NodeRecord>,
    pub(super) relationships: HashMap<u64, RelationshipRecord>,
    pub(super) groups: HashMap<u64, RelationshipGroupRecord>,
    pub(super) properties: HashMap<u64, PropertyRecord>,
    relationship_types: HashMap<u32, TokenRecord>,
    property_keys: HashMap<u32, TokenRecord>,
    graph: Option<GraphRecord>,
    /// node → type → group id, for dense nodes touched by this transaction
    pub(super) group_cache: HashMap<u64, BTreeMap<u32, u64>>,
    pub(super) upgraded_dense_nodes: Vec<u64>,
    commands: CommandSet,
}

fn stage<'a, R: Record>(
    staged: &'a mut HashMap<u64, R>,
    store: &RecordStore<R>,
    id: u64,
    check_in_use: bool,
) -> Result<&'a mut R> {
    let record = match staged.entry(id) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(store.get(id)?),
    };
    if check_in_use && !record.in_use() {
        return Err(Error::illegal_state(format!(
            "{}[{}] is deleted",
            R::TYPE_NAME,
            id
        )));
    }
    Ok(record)
}

fn read<R: Record>(staged: &HashMap<u64, R>, store: &RecordStore<R>, id: u64) -> Result<R> {
    match staged.get(&id) {
        Some(record) if record.in_use() => Ok(record.clone()),
        Some(_) => Err(Error::invalid_record(format!(
            "{}[{}] not in use",
            R::TYPE_NAME,
            id
        ))),
        None => store.get(id),
    }
}

fn free_id<R: Record>(store: &RecordStore<R>, id: u64) {
    if let Err(e) = store.free_id(id) {
        tracing::warn!(
            "Failed to free {} id {} during rollback: {}",
            R::TYPE_NAME,
            id,
            e
        );
    }
}

impl WriteTransaction {
    /// Start a transaction
    pub fn new(
        identifier: u64,
        store: Arc<GraphStore>,
        cache: Arc<dyn CacheInvalidation>,
        locks: RowLockManager,
        log: Option<Arc<CommandLog>>,
    ) -> Self {
        Self {
            identifier,
            store,
            cache,
            locks,
            held_locks: HashMap::new(),
            log,
            state: TxState::Active,
            recovered: false,
            nodes: HashMap::new(),
            relationships: HashMap::new(),
            groups: HashMap::new(),
            properties: HashMap::new(),
            relationship_types: HashMap::new(),
            property_keys: HashMap::new(),
            graph: None,
            group_cache: HashMap::new(),
            upgraded_dense_nodes: Vec::new(),
            commands: CommandSet::default(),
        }
    }

    /// A transaction rebuilt from the command log, ready to commit in
    /// recovery mode
    pub fn recovered(
        identifier: u64,
        store: Arc<GraphStore>,
        cache: Arc<dyn CacheInvalidation>,
        locks: RowLockManager,
        commands: CommandSet,
    ) -> Self {
        let mut tx = Self::new(identifier, store, cache, locks, None);
        tx.recovered = true;
        tx.state = TxState::Prepared;
        tx.commands = commands;
        tx
    }

    /// Current lifecycle state
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Whether the transaction was rebuilt from the command log
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Commands generated by prepare (or injected by recovery)
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Number of record locks held
    pub fn held_lock_count(&self) -> usize {
        self.held_locks.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(Error::illegal_state(format!(
                "transaction {} is {:?}",
                self.identifier, self.state
            )));
        }
        Ok(())
    }

    pub(super) fn lock(&mut self, resource: ResourceId) -> Result<()> {
        if let Entry::Vacant(entry) = self.held_locks.entry(resource) {
            entry.insert(self.locks.acquire_write(self.identifier, resource)?);
        }
        Ok(())
    }

    pub(super) fn node_mut(&mut self, id: u64, check_in_use: bool) -> Result<&mut NodeRecord> {
        stage(&mut self.nodes, self.store.nodes(), id, check_in_use)
    }

    pub(super) fn relationship_mut(
        &mut self,
        id: u64,
        check_in_use: bool,
    ) -> Result<&mut RelationshipRecord> {
        stage(
            &mut self.relationships,
            self.store.relationships(),
            id,
            check_in_use,
        )
    }

    pub(super) fn group_mut(
        &mut self,
        id: u64,
        check_in_use: bool,
    ) -> Result<&mut RelationshipGroupRecord> {
        stage(&mut self.groups, self.store.groups(), id, check_in_use)
    }

    pub(super) fn property_mut(
        &mut self,
        id: u64,
        check_in_use: bool,
    ) -> Result<&mut PropertyRecord> {
        stage(
            &mut self.properties,
            self.store.properties().records(),
            id,
            check_in_use,
        )
    }

    pub(super) fn graph_mut(&mut self) -> &mut GraphRecord {
        let store = &self.store;
        self.graph
            .get_or_insert_with(|| store.meta().graph_record())
    }

    fn create_token(
        staged: &mut HashMap<u32, TokenRecord>,
        tokens: &TokenStore,
        id: u32,
        name: &str,
    ) -> Result<()> {
        if staged.contains_key(&id) || tokens.tokens().get_checked(id as u64)?.is_some() {
            return Err(Error::invalid_record(format!(
                "token {} ({}) already exists",
                id, name
            )));
        }
        staged.insert(id, tokens.create(id, name)?);
        Ok(())
    }

    fn staged_commands(&self) -> CommandSet {
        CommandSet {
            relationship_types: self.relationship_types.values().cloned().collect(),
            property_keys: self.property_keys.values().cloned().collect(),
            nodes: self.nodes.values().cloned().collect(),
            relationships: self.relationships.values().cloned().collect(),
            groups: self.groups.values().cloned().collect(),
            properties: self.properties.values().cloned().collect(),
            graph: self.graph,
        }
    }

    fn generate_commands(&mut self) -> Result<()> {
        if let Some(node) = self
            .nodes
            .values()
            .find(|n| !n.in_use && n.first_relationship_id != NO_ID)
        {
            return Err(Error::invalid_record(format!(
                "Node[{}] is deleted but still has relationships",
                node.id
            )));
        }

        let mut commands = self.staged_commands();
        commands.sort();
        for node in commands.nodes.iter().filter(|n| !n.in_use) {
            self.cache.remove_node(node.id);
        }
        for id in &self.upgraded_dense_nodes {
            self.cache.remove_node(*id);
        }
        for rel in commands.relationships.iter().filter(|r| !r.in_use) {
            self.cache.remove_relationship(rel.id);
        }
        self.commands = commands;

        if let Some(log) = &self.log {
            log.append_prepared(self.identifier, &self.commands.commands())?;
        }
        Ok(())
    }

    fn commit_recovered(&mut self, tx_id: u64) -> Result<()> {
        self.state = TxState::Committing;
        let mut commands = std::mem::take(&mut self.commands);
        commands.execute_recovered(&self.store, self.cache.as_ref())?;
        self.store.meta().raise_last_committed(tx_id)?;
        self.state = TxState::Committed;
        self.clear();
        tracing::info!(
            "Recovered transaction {} as tx {} ({} commands)",
            self.identifier,
            tx_id,
            commands.len()
        );
        Ok(())
    }

    /// Free the ids of created records and evict everything touched
    fn release(&self, commands: &CommandSet, free_ids: bool) {
        let store = &self.store;
        for token in &commands.relationship_types {
            if free_ids && token.created {
                free_id(store.relationship_types().tokens(), token.id);
                for name in token.name_records.iter().filter(|r| r.created) {
                    free_id(store.relationship_types().names().records(), name.id);
                }
            }
            self.cache.remove_relationship_type(token.id as u32);
        }
        for token in &commands.property_keys {
            if free_ids && token.created {
                free_id(store.property_keys().tokens(), token.id);
                for name in token.name_records.iter().filter(|r| r.created) {
                    free_id(store.property_keys().names().records(), name.id);
                }
            }
            self.cache.remove_property_key(token.id as u32);
        }
        for node in &commands.nodes {
            if free_ids && node.created {
                free_id(store.nodes(), node.id);
            }
            self.cache.remove_node(node.id);
        }
        for rel in &commands.relationships {
            if free_ids && rel.created {
                free_id(store.relationships(), rel.id);
            }
            self.cache.remove_relationship(rel.id);
        }
        for group in &commands.groups {
            if free_ids && group.created {
                free_id(store.groups(), group.id);
            }
        }
        if commands.graph.is_some() {
            self.cache.remove_graph_properties();
        }
        for record in &commands.properties {
            match record.owner {
                Some(PropertyOwner::Node(id)) => self.cache.remove_node(id),
                Some(PropertyOwner::Relationship(id)) => self.cache.remove_relationship(id),
                Some(PropertyOwner::Graph) | None => {}
            }
            if !free_ids {
                continue;
            }
            if record.created {
                free_id(store.properties().records(), record.id);
            }
            let value_records = record
                .blocks
                .iter()
                .flat_map(|b| b.value_records.iter())
                .chain(record.deleted_value_records.iter());
            for value in value_records.filter(|r| r.created) {
                free_id(store.properties().strings().records(), value.id);
            }
        }
    }

    fn take_staged(&mut self) -> CommandSet {
        let set = CommandSet {
            relationship_types: std::mem::take(&mut self.relationship_types).into_values().collect(),
            property_keys: std::mem::take(&mut self.property_keys).into_values().collect(),
            nodes: std::mem::take(&mut self.nodes).into_values().collect(),
            relationships: std::mem::take(&mut self.relationships).into_values().collect(),
            groups: std::mem::take(&mut self.groups).into_values().collect(),
            properties: std::mem::take(&mut self.properties).into_values().collect(),
            graph: self.graph.take(),
        };
        self.group_cache.clear();
        self.upgraded_dense_nodes.clear();
        set
    }

    fn clear(&mut self) {
        self.take_staged();
        self.commands = CommandSet::default();
        self.held_locks.clear();
    }

    fn owner_first_property_for_read(&mut self, owner: PropertyOwner) -> Result<u64> {
        match owner {
            PropertyOwner::Node(id) => Ok(self.node(id)?.first_property_id),
            PropertyOwner::Relationship(id) => Ok(self.relationship(id)?.first_property_id),
            PropertyOwner::Graph => Ok(self
                .graph
                .unwrap_or_else(|| self.store.meta().graph_record())
                .first_property_id),
        }
    }
}

impl RecordAccess for WriteTransaction {
    fn store(&self) -> &GraphStore {
        &self.store
    }

    fn node(&mut self, id: u64) -> Result<NodeRecord> {
        read(&self.nodes, self.store.nodes(), id)
    }

    fn relationship(&mut self, id: u64) -> Result<RelationshipRecord> {
        read(&self.relationships, self.store.relationships(), id)
    }

    fn chain_relationship(&mut self, id: u64) -> Result<Option<RelationshipRecord>> {
        match self.relationships.get(&id) {
            Some(rel) => Ok(rel.in_use.then(|| rel.clone())),
            None => self.store.relationships().get_checked(id),
        }
    }

    fn group(&mut self, id: u64) -> Result<RelationshipGroupRecord> {
        read(&self.groups, self.store.groups(), id)
    }

    fn property(&mut self, id: u64) -> Result<PropertyRecord> {
        read(&self.properties, self.store.properties().records(), id)
    }
}

impl StoreTransaction for WriteTransaction {
    fn identifier(&self) -> u64 {
        self.identifier
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn node_create(&mut self, id: u64) -> Result<()> {
        self.ensure_active()?;
        self.create_node(id)
    }

    fn node_delete(&mut self, id: u64) -> Result<PropertyMap> {
        self.ensure_active()?;
        self.delete_node(id)
    }

    fn relationship_create(&mut self, id: u64, type_id: u32, start: u64, end: u64) -> Result<()> {
        self.ensure_active()?;
        self.create_relationship(id, type_id, start, end)
    }

    fn relationship_delete(&mut self, id: u64) -> Result<PropertyMap> {
        self.ensure_active()?;
        self.delete_relationship(id)
    }

    fn node_add_property(
        &mut self,
        node: u64,
        key_id: u32,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.ensure_active()?;
        self.add_property(PropertyOwner::Node(node), key_id, value)
    }

    fn node_change_property(
        &mut self,
        node: u64,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.ensure_active()?;
        self.change_property(PropertyOwner::Node(node), property, value)
    }

    fn node_remove_property(&mut self, node: u64, property: &PropertyData) -> Result<()> {
        self.ensure_active()?;
        self.remove_property(PropertyOwner::Node(node), property)
    }

    fn relationship_add_property(
        &mut self,
        relationship: u64,
        key_id: u32,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.ensure_active()?;
        self.add_property(PropertyOwner::Relationship(relationship), key_id, value)
    }

    fn relationship_change_property(
        &mut self,
        relationship: u64,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.ensure_active()?;
        self.change_property(PropertyOwner::Relationship(relationship), property, value)
    }

    fn relationship_remove_property(
        &mut self,
        relationship: u64,
        property: &PropertyData,
    ) -> Result<()> {
        self.ensure_active()?;
        self.remove_property(PropertyOwner::Relationship(relationship), property)
    }

    fn graph_add_property(&mut self, key_id: u32, value: PropertyValue) -> Result<PropertyData> {
        self.ensure_active()?;
        self.add_property(PropertyOwner::Graph, key_id, value)
    }

    fn graph_change_property(
        &mut self,
        property: &PropertyData,
        value: PropertyValue,
    ) -> Result<PropertyData> {
        self.ensure_active()?;
        self.change_property(PropertyOwner::Graph, property, value)
    }

    fn graph_remove_property(&mut self, property: &PropertyData) -> Result<()> {
        self.ensure_active()?;
        self.remove_property(PropertyOwner::Graph, property)
    }

    fn node_load_properties(&mut self, node: u64) -> Result<PropertyMap> {
        let first = self.owner_first_property_for_read(PropertyOwner::Node(node))?;
        load_property_chain(self, first)
    }

    fn relationship_load_properties(&mut self, relationship: u64) -> Result<PropertyMap> {
        let first = self.owner_first_property_for_read(PropertyOwner::Relationship(relationship))?;
        load_property_chain(self, first)
    }

    fn graph_load_properties(&mut self) -> Result<PropertyMap> {
        let first = self.owner_first_property_for_read(PropertyOwner::Graph)?;
        load_property_chain(self, first)
    }

    fn load_property_value(&mut self, property: &PropertyData) -> Result<PropertyValue> {
        property_value(self, property)
    }

    fn node_load_light(&mut self, id: u64) -> Result<Option<NodeRecord>> {
        match self.nodes.get(&id) {
            Some(node) => Ok(node.in_use.then(|| node.clone())),
            None => self.store.nodes().get_checked(id),
        }
    }

    fn relationship_load_light(&mut self, id: u64) -> Result<Option<RelationshipRecord>> {
        self.chain_relationship(id)
    }

    fn create_relationship_type(&mut self, id: u32, name: &str) -> Result<()> {
        self.ensure_active()?;
        Self::create_token(
            &mut self.relationship_types,
            self.store.relationship_types(),
            id,
            name,
        )
    }

    fn create_property_key(&mut self, id: u32, name: &str) -> Result<()> {
        self.ensure_active()?;
        Self::create_token(&mut self.property_keys, self.store.property_keys(), id, name)
    }

    fn load_relationship_types(&mut self) -> Result<Vec<NameData>> {
        let mut types: BTreeMap<u32, String> = self
            .store
            .relationship_types()
            .all()?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();
        for (id, token) in &self.relationship_types {
            types.insert(*id, chain_string(&token.name_records)?);
        }
        Ok(types
            .into_iter()
            .map(|(id, name)| NameData { id, name })
            .collect())
    }

    fn load_property_key(&mut self, id: u32) -> Result<String> {
        match self.property_keys.get(&id) {
            Some(token) => chain_string(&token.name_records),
            None => self.store.property_keys().name(id),
        }
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

    fn is_node_created(&self, id: u64) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.created)
    }

    fn is_relationship_created(&self, id: u64) -> bool {
        self.relationships.get(&id).is_some_and(|r| r.created)
    }

    fn created_nodes(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .nodes
            .values()
            .filter(|n| n.created && n.in_use)
            .map(|n| n.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn prepare(&mut self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(Error::illegal_state(format!(
                "cannot prepare transaction {} in state {:?}",
                self.identifier, self.state
            )));
        }
        self.state = TxState::Preparing;
        self.generate_commands()?;
        self.state = TxState::Prepared;
        tracing::debug!(
            "Prepared transaction {} ({} commands)",
            self.identifier,
            self.commands.len()
        );
        Ok(())
    }

    fn commit(&mut self, tx_id: u64) -> Result<()> {
        if self.state != TxState::Prepared {
            return Err(Error::illegal_state(format!(
                "cannot commit transaction {} in state {:?}",
                self.identifier, self.state
            )));
        }
        if self.recovered {
            return self.commit_recovered(tx_id);
        }
        self.store.meta().check_next_tx(tx_id)?;
        self.state = TxState::Committing;

        if let Some(log) = &self.log {
            log.append(&LogEntry::Commit {
                identifier: self.identifier,
                tx_id,
            })?;
            log.force()?;
        }

        let mut commands = std::mem::take(&mut self.commands);
        commands.execute(&self.store)?;
        commands.invalidate_committed(self.cache.as_ref());
        for node in commands.nodes.iter().filter(|n| n.in_use) {
            self.cache
                .set_first_ids(node.id, node.first_relationship_id, node.first_property_id);
        }
        self.cache.commit_cows();
        self.store.meta().compare_and_increment(tx_id)?;

        self.state = TxState::Committed;
        self.clear();
        tracing::debug!(
            "Committed transaction {} as tx {} ({} commands)",
            self.identifier,
            tx_id,
            commands.len()
        );
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.state {
            TxState::Active | TxState::Preparing | TxState::Prepared => {}
            state => {
                return Err(Error::illegal_state(format!(
                    "cannot roll back transaction {} in state {:?}",
                    self.identifier, state
                )));
            }
        }
        let logged = self.state == TxState::Prepared && !self.recovered;
        self.state = TxState::RollingBack;

        let staged = self.take_staged();
        let commands = if self.commands.is_empty() {
            staged
        } else {
            std::mem::take(&mut self.commands)
        };
        let config = self.store.config();
        let free_ids = if self.recovered {
            config.free_ids_during_recovery_rollback
        } else {
            config.free_ids_during_rollback
        };
        self.release(&commands, free_ids);
        self.clear();

        if let Some(log) = self.log.as_ref().filter(|_| logged) {
            // Lets log rotation drop the prepared commands
            if let Err(e) = log.append(&LogEntry::Rollback {
                identifier: self.identifier,
            }) {
                tracing::warn!(
                    "Could not log rollback of transaction {}: {}",
                    self.identifier,
                    e
                );
            }
        }

        self.state = TxState::RolledBack;
        tracing::debug!(
            "Rolled back transaction {} ({} staged records)",
            self.identifier,
            commands.len()
        );
        Ok(())
    }
}
