//! Token stores for relationship types and property keys
//!
//! Names are resolved through a concurrent id → name cache in front of the
//! token records and their name chains.

use super::dynamic_store::{chain_string, DynamicStore};
use super::record_store::RecordStore;
use crate::record::TokenRecord;
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A token id with its name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameData {
    /// Token id
    pub id: u32,
    /// Token name
    pub name: String,
}

/// One token namespace
pub struct TokenStore {
    kind: &'static str,
    tokens: RecordStore<TokenRecord>,
    names: DynamicStore,
    cache: DashMap<u32, String>,
}

impl TokenStore {
    /// Open `<base>.store` and `<base>.names.store` inside `dir`
    pub fn open(
        dir: impl AsRef<Path>,
        base: &'static str,
        initial_size: usize,
        max_id: u32,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            kind: base,
            tokens: RecordStore::open(
                dir.join(format!("{}.store", base)),
                initial_size,
                max_id as u64,
            )?,
            names: DynamicStore::open(dir.join(format!("{}.names.store", base)), initial_size)?,
            cache: DashMap::new(),
        })
    }

    /// Token record store
    pub fn tokens(&self) -> &RecordStore<TokenRecord> {
        &self.tokens
    }

    /// Name record store
    pub fn names(&self) -> &DynamicStore {
        &self.names
    }

    /// Allocate a token id
    pub fn next_id(&self) -> Result<u32> {
        Ok(self.tokens.next_id()? as u32)
    }

    /// Build an unwritten token record with freshly allocated name records
    pub fn create(&self, id: u32, name: &str) -> Result<TokenRecord> {
        let mut record = TokenRecord::new(id as u64);
        record.name_records = self.names.allocate(name.as_bytes())?;
        record.name_id = record.name_records[0].id;
        record.created = true;
        Ok(record)
    }

    /// Name of token `id`
    pub fn name(&self, id: u32) -> Result<String> {
        if let Some(name) = self.cache.get(&id) {
            return Ok(name.clone());
        }
        let record = self.tokens.get_checked(id as u64)?.ok_or_else(|| {
            Error::invalid_record(format!("{} token {} does not exist", self.kind, id))
        })?;
        let name = chain_string(&self.names.read_chain(record.name_id)?)?;
        self.cache.insert(id, name.clone());
        Ok(name)
    }

    /// Every token in use, in id order
    pub fn all(&self) -> Result<Vec<NameData>> {
        let mut tokens = Vec::new();
        for id in 0..self.tokens.high_id() {
            if self.tokens.get_checked(id)?.is_some() {
                let id = id as u32;
                tokens.push(NameData {
                    id,
                    name: self.name(id)?,
                });
            }
        }
        Ok(tokens)
    }

    /// Write a token and its name records
    pub fn update(&self, record: &TokenRecord) -> Result<()> {
        self.names.update_all(&record.name_records)?;
        self.tokens.update(record)?;
        self.cache.remove(&(record.id as u32));
        Ok(())
    }

    /// Recovery variant of [`TokenStore::update`]
    pub fn update_recovered(&self, record: &TokenRecord) -> Result<()> {
        self.names.update_all_recovered(&record.name_records)?;
        self.tokens.update_recovered(record)?;
        self.cache.remove(&(record.id as u32));
        Ok(())
    }

    /// Flush both files
    pub fn flush(&self) -> Result<()> {
        self.tokens.flush()?;
        self.names.records().flush()
    }

    /// Flush and mark both id files clean
    pub fn close(&self) -> Result<()> {
        self.tokens.close()?;
        self.names.records().close()
    }

    /// Rescan both files for free ids
    pub fn rebuild_ids(&self) -> Result<()> {
        self.tokens.rebuild_ids()?;
        self.names.records().rebuild_ids()
    }
}
