//! Commands: immutable after-images of the records a transaction touched
//!
//! Prepare turns every staged record into one command. Commit executes
//! them against the stores in a fixed order, and recovery executes the
//! same commands again after reading them back from the command log.

use crate::cache::CacheInvalidation;
use crate::record::{
    GraphRecord, NodeRecord, PropertyOwner, PropertyRecord, RelationshipGroupRecord,
    RelationshipRecord, TokenRecord,
};
use crate::store::GraphStore;
use crate::Result;
use serde::{Deserialize, Serialize};

/// After-image of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Node record
    Node(NodeRecord),
    /// Relationship record
    Relationship(RelationshipRecord),
    /// Relationship group record
    RelationshipGroup(RelationshipGroupRecord),
    /// Property record with its value records
    Property(PropertyRecord),
    /// Relationship type token with its name records
    RelationshipType(TokenRecord),
    /// Property key token with its name records
    PropertyKey(TokenRecord),
    /// Graph-global record
    Graph(GraphRecord),
}

impl Command {
    /// Record kind
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Node(_) => "node",
            Command::Relationship(_) => "relationship",
            Command::RelationshipGroup(_) => "relationship_group",
            Command::Property(_) => "property",
            Command::RelationshipType(_) => "relationship_type",
            Command::PropertyKey(_) => "property_key",
            Command::Graph(_) => "graph",
        }
    }

    /// Logical id of the record
    pub fn key(&self) -> u64 {
        match self {
            Command::Node(r) => r.id,
            Command::Relationship(r) => r.id,
            Command::RelationshipGroup(r) => r.id,
            Command::Property(r) => r.id,
            Command::RelationshipType(r) | Command::PropertyKey(r) => r.id,
            Command::Graph(_) => 0,
        }
    }

    /// Record was created by the transaction
    pub fn is_created(&self) -> bool {
        match self {
            Command::Node(r) => r.created,
            Command::Relationship(r) => r.created,
            Command::RelationshipGroup(r) => r.created,
            Command::Property(r) => r.created,
            Command::RelationshipType(r) | Command::PropertyKey(r) => r.created,
            Command::Graph(_) => false,
        }
    }

    /// Record ends the transaction not in use
    pub fn is_deleted(&self) -> bool {
        match self {
            Command::Node(r) => !r.in_use,
            Command::Relationship(r) => !r.in_use,
            Command::RelationshipGroup(r) => !r.in_use,
            Command::Property(r) => !r.in_use,
            Command::RelationshipType(r) | Command::PropertyKey(r) => !r.in_use,
            Command::Graph(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Modified,
    Deleted,
}

impl Phase {
    fn matches(self, created: bool, deleted: bool) -> bool {
        match self {
            Phase::Created => created && !deleted,
            Phase::Modified => !created && !deleted,
            Phase::Deleted => deleted,
        }
    }
}

/// Commands of one transaction, grouped by record kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSet {
    /// Relationship type tokens
    pub relationship_types: Vec<TokenRecord>,
    /// Property key tokens
    pub property_keys: Vec<TokenRecord>,
    /// Node records
    pub nodes: Vec<NodeRecord>,
    /// Relationship records
    pub relationships: Vec<RelationshipRecord>,
    /// Relationship group records
    pub groups: Vec<RelationshipGroupRecord>,
    /// Property records
    pub properties: Vec<PropertyRecord>,
    /// Graph-global record
    pub graph: Option<GraphRecord>,
}

impl CommandSet {
    /// Add a command to its kind
    pub fn push(&mut self, command: Command) {
        match command {
            Command::Node(r) => self.nodes.push(r),
            Command::Relationship(r) => self.relationships.push(r),
            Command::RelationshipGroup(r) => self.groups.push(r),
            Command::Property(r) => self.properties.push(r),
            Command::RelationshipType(r) => self.relationship_types.push(r),
            Command::PropertyKey(r) => self.property_keys.push(r),
            Command::Graph(r) => self.graph = Some(r),
        }
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.relationship_types.len()
            + self.property_keys.len()
            + self.nodes.len()
            + self.relationships.len()
            + self.groups.len()
            + self.properties.len()
            + usize::from(self.graph.is_some())
    }

    /// No commands at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every command, tokens first
    pub fn commands(&self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(self.len());
        commands.extend(self.relationship_types.iter().cloned().map(Command::RelationshipType));
        commands.extend(self.property_keys.iter().cloned().map(Command::PropertyKey));
        commands.extend(self.nodes.iter().cloned().map(Command::Node));
        commands.extend(self.relationships.iter().cloned().map(Command::Relationship));
        commands.extend(self.graph.iter().copied().map(Command::Graph));
        commands.extend(self.properties.iter().cloned().map(Command::Property));
        commands.extend(self.groups.iter().cloned().map(Command::RelationshipGroup));
        commands
    }

    /// Order every kind by id
    pub fn sort(&mut self) {
        self.relationship_types.sort_by_key(|r| r.id);
        self.property_keys.sort_by_key(|r| r.id);
        self.nodes.sort_by_key(|r| r.id);
        self.relationships.sort_by_key(|r| r.id);
        self.groups.sort_by_key(|r| r.id);
        self.properties.sort_by_key(|r| r.id);
    }

    /// Apply a freshly prepared transaction: tokens, then created, modified
    /// and deleted records across all kinds, the graph record between the
    /// last two phases
    pub fn execute(&mut self, store: &GraphStore) -> Result<()> {
        self.sort();
        for token in &self.relationship_types {
            store.relationship_types().update(token)?;
        }
        for token in &self.property_keys {
            store.property_keys().update(token)?;
        }
        self.execute_phase(store, Phase::Created)?;
        self.execute_phase(store, Phase::Modified)?;
        if let Some(graph) = &self.graph {
            store.meta().set_graph_record(graph)?;
        }
        self.execute_phase(store, Phase::Deleted)
    }

    fn execute_phase(&self, store: &GraphStore, phase: Phase) -> Result<()> {
        for record in &self.properties {
            if phase.matches(record.created, !record.in_use) {
                store.properties().update(record)?;
            }
        }
        for record in &self.relationships {
            if phase.matches(record.created, !record.in_use) {
                store.relationships().update(record)?;
            }
        }
        for record in &self.nodes {
            if phase.matches(record.created, !record.in_use) {
                store.nodes().update(record)?;
            }
        }
        for record in &self.groups {
            if phase.matches(record.created, !record.in_use) {
                store.groups().update(record)?;
            }
        }
        Ok(())
    }

    /// Evict what a fresh commit changed. Nodes are left out: their first
    /// ids are republished through `set_first_ids` right after.
    pub fn invalidate_committed(&self, cache: &dyn CacheInvalidation) {
        for token in &self.property_keys {
            cache.remove_property_key(token.id as u32);
        }
        for token in &self.relationship_types {
            cache.remove_relationship_type(token.id as u32);
        }
        for record in &self.relationships {
            cache.remove_relationship(record.id);
        }
        let mut graph_touched = self.graph.is_some();
        for record in &self.properties {
            match record.owner {
                Some(PropertyOwner::Relationship(id)) => cache.remove_relationship(id),
                Some(PropertyOwner::Graph) => graph_touched = true,
                Some(PropertyOwner::Node(_)) | None => {}
            }
        }
        if graph_touched {
            cache.remove_graph_properties();
        }
    }

    /// Replay in recovery mode: no id is freed, every touched entity is
    /// evicted from the cache. Applying the same set twice leaves the stores
    /// as after the first time.
    pub fn execute_recovered(
        &mut self,
        store: &GraphStore,
        cache: &dyn CacheInvalidation,
    ) -> Result<()> {
        self.sort();
        for token in &self.property_keys {
            store.property_keys().update_recovered(token)?;
            cache.remove_property_key(token.id as u32);
        }
        for record in &self.properties {
            store.properties().update_recovered(record)?;
            match record.owner {
                Some(PropertyOwner::Node(id)) => cache.remove_node(id),
                Some(PropertyOwner::Relationship(id)) => cache.remove_relationship(id),
                Some(PropertyOwner::Graph) => cache.remove_graph_properties(),
                None => {}
            }
        }
        for token in &self.relationship_types {
            store.relationship_types().update_recovered(token)?;
            cache.remove_relationship_type(token.id as u32);
        }
        for record in &self.relationships {
            store.relationships().update_recovered(record)?;
            cache.remove_relationship(record.id);
            cache.remove_node(record.start_node);
            cache.remove_node(record.end_node);
        }
        for record in &self.nodes {
            store.nodes().update_recovered(record)?;
            cache.remove_node(record.id);
        }
        for record in &self.groups {
            store.groups().update_recovered(record)?;
        }
        if let Some(graph) = &self.graph {
            store.meta().set_graph_record(graph)?;
            cache.remove_graph_properties();
        }
        Ok(())
    }
}

impl FromIterator<Command> for CommandSet {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        let mut set = CommandSet::default();
        for command in iter {
            set.push(command);
        }
        set
    }
}
