//! Storage layer - record stores for nodes, relationships, groups and properties
//!
//! One directory holds the whole graph:
//! - `nodes.store`: node records
//! - `rels.store`: relationship records
//! - `groups.store`: relationship groups of dense nodes
//! - `props.store` / `props.strings.store`: property records and long strings
//! - `reltypes.store`, `propkeys.store` (+ `.names.store`): tokens
//! - `graph.meta`: identity, last committed transaction, graph property head
//!
//! Every `*.store` file has an `*.id` sidecar with its free id list.

mod dynamic_store;
mod id_generator;
mod mapped;
mod meta;
mod property_store;
mod record_store;
mod token_store;

pub use dynamic_store::{chain_bytes, chain_string, DynamicStore};
pub use id_generator::IdGenerator;
pub use meta::MetaStore;
pub use property_store::PropertyStore;
pub use record_store::RecordStore;
pub use token_store::{NameData, TokenStore};

use crate::config::StoreConfig;
use crate::record::bits::HighBits;
use crate::record::property::MAX_KEY_ID;
use crate::record::relationship::MAX_TYPE_ID;
use crate::record::{NodeRecord, RelationshipGroupRecord, RelationshipRecord};
use crate::Result;
use std::path::{Path, PathBuf};

/// Every store of one graph, opened together
pub struct GraphStore {
    dir: PathBuf,
    config: StoreConfig,
    nodes: RecordStore<NodeRecord>,
    relationships: RecordStore<RelationshipRecord>,
    groups: RecordStore<RelationshipGroupRecord>,
    properties: PropertyStore,
    relationship_types: TokenStore,
    property_keys: TokenStore,
    meta: MetaStore,
}

impl GraphStore {
    /// Open or create all stores inside `dir`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use trellis_core::config::StoreConfig;
    /// use trellis_core::store::GraphStore;
    ///
    /// let store = GraphStore::open("./graph", StoreConfig::default()).unwrap();
    /// assert_eq!(store.meta().last_committed_tx(), 0);
    /// ```
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let size = config.initial_store_size;
        let max = HighBits::Three.max_id();

        let store = Self {
            nodes: RecordStore::open(dir.join("nodes.store"), size, max)?,
            relationships: RecordStore::open(dir.join("rels.store"), size, max)?,
            groups: RecordStore::open(dir.join("groups.store"), size, max)?,
            properties: PropertyStore::open(&dir, size)?,
            relationship_types: TokenStore::open(&dir, "reltypes", size, MAX_TYPE_ID)?,
            property_keys: TokenStore::open(&dir, "propkeys", size, MAX_KEY_ID)?,
            meta: MetaStore::open(dir.join("graph.meta"))?,
            config,
            dir,
        };
        tracing::info!(
            "Opened graph store {:?} at tx {}",
            store.dir,
            store.meta.last_committed_tx()
        );
        Ok(store)
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Node store
    pub fn nodes(&self) -> &RecordStore<NodeRecord> {
        &self.nodes
    }

    /// Relationship store
    pub fn relationships(&self) -> &RecordStore<RelationshipRecord> {
        &self.relationships
    }

    /// Relationship group store
    pub fn groups(&self) -> &RecordStore<RelationshipGroupRecord> {
        &self.groups
    }

    /// Property store
    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// Relationship type tokens
    pub fn relationship_types(&self) -> &TokenStore {
        &self.relationship_types
    }

    /// Property key tokens
    pub fn property_keys(&self) -> &TokenStore {
        &self.property_keys
    }

    /// Metadata
    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// Reconcile every id allocator with the store contents
    pub fn rebuild_id_generators(&self) -> Result<()> {
        self.nodes.rebuild_ids()?;
        self.relationships.rebuild_ids()?;
        self.groups.rebuild_ids()?;
        self.properties.rebuild_ids()?;
        self.relationship_types.rebuild_ids()?;
        self.property_keys.rebuild_ids()?;
        tracing::debug!("Rebuilt id generators of {:?}", self.dir);
        Ok(())
    }

    /// Flush every store
    pub fn flush(&self) -> Result<()> {
        self.nodes.flush()?;
        self.relationships.flush()?;
        self.groups.flush()?;
        self.properties.flush()?;
        self.relationship_types.flush()?;
        self.property_keys.flush()?;
        self.meta.flush()
    }

    /// Flush every store and mark the id files clean
    pub fn close(&self) -> Result<()> {
        self.nodes.close()?;
        self.relationships.close()?;
        self.groups.close()?;
        self.properties.close()?;
        self.relationship_types.close()?;
        self.property_keys.close()?;
        self.meta.flush()?;
        tracing::info!("Closed graph store {:?}", self.dir);
        Ok(())
    }
}
