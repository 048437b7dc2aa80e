//! Chains of dynamic records holding variable-length byte payloads

use super::record_store::RecordStore;
use crate::record::bits::{HighBits, NO_ID};
use crate::record::dynamic::DYNAMIC_DATA_SIZE;
use crate::record::DynamicRecord;
use crate::{Error, Result};
use std::path::Path;

/// Store of forward-linked overflow records
pub struct DynamicStore {
    records: RecordStore<DynamicRecord>,
}

impl DynamicStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>, initial_size: usize) -> Result<Self> {
        Ok(Self {
            records: RecordStore::open(path, initial_size, HighBits::Four.max_id())?,
        })
    }

    /// Underlying record store
    pub fn records(&self) -> &RecordStore<DynamicRecord> {
        &self.records
    }

    /// Split `data` into freshly allocated, linked records (not yet written)
    pub fn allocate(&self, data: &[u8]) -> Result<Vec<DynamicRecord>> {
        let mut chunks: Vec<&[u8]> = data.chunks(DYNAMIC_DATA_SIZE).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut record = DynamicRecord::new(self.records.next_id()?, chunk.to_vec());
            record.created = true;
            records.push(record);
        }
        for i in 1..records.len() {
            let next = records[i].id;
            records[i - 1].next_block = next;
        }
        Ok(records)
    }

    /// Load the chain starting at `first`
    pub fn read_chain(&self, first: u64) -> Result<Vec<DynamicRecord>> {
        let mut records = Vec::new();
        let mut next = first;
        let limit = self.records.high_id();
        while next != NO_ID {
            if records.len() as u64 > limit {
                return Err(Error::invalid_record(format!(
                    "dynamic chain starting at {} does not terminate",
                    first
                )));
            }
            let record = self.records.get(next)?;
            next = record.next_block;
            records.push(record);
        }
        Ok(records)
    }

    /// Write records of a chain, freeing the ids of those not in use
    pub fn update_all(&self, records: &[DynamicRecord]) -> Result<()> {
        for record in records {
            self.records.update(record)?;
        }
        Ok(())
    }

    /// Recovery variant of [`DynamicStore::update_all`]
    pub fn update_all_recovered(&self, records: &[DynamicRecord]) -> Result<()> {
        for record in records {
            self.records.update_recovered(record)?;
        }
        Ok(())
    }
}

/// Concatenate chain payloads
pub fn chain_bytes(records: &[DynamicRecord]) -> Vec<u8> {
    records.iter().flat_map(|r| r.data.iter().copied()).collect()
}

/// Concatenate chain payloads into a UTF-8 string
pub fn chain_string(records: &[DynamicRecord]) -> Result<String> {
    String::from_utf8(chain_bytes(records))
        .map_err(|e| Error::property(format!("dynamic string is not UTF-8: {}", e)))
}
