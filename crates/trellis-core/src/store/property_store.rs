//! Property records plus the dynamic store for long string values

use super::dynamic_store::{chain_string, DynamicStore};
use super::record_store::RecordStore;
use crate::record::bits::HighBits;
use crate::record::{PropertyBlock, PropertyRecord, PropertyType, PropertyValue};
use crate::{Error, Result};
use std::path::Path;

/// Property record store
pub struct PropertyStore {
    records: RecordStore<PropertyRecord>,
    strings: DynamicStore,
}

impl PropertyStore {
    /// Open `props.store` and `props.strings.store` inside `dir`
    pub fn open(dir: impl AsRef<Path>, initial_size: usize) -> Result<Self> {
        let dir = dir.as_ref();
        Ok(Self {
            records: RecordStore::open(
                dir.join("props.store"),
                initial_size,
                HighBits::Four.max_id(),
            )?,
            strings: DynamicStore::open(dir.join("props.strings.store"), initial_size)?,
        })
    }

    /// Property record store
    pub fn records(&self) -> &RecordStore<PropertyRecord> {
        &self.records
    }

    /// Long string value store
    pub fn strings(&self) -> &DynamicStore {
        &self.strings
    }

    /// Encode `value` for `key_id`, allocating string records when it does
    /// not fit inline
    pub fn encode_value(&self, key_id: u32, value: &PropertyValue) -> Result<PropertyBlock> {
        match value {
            PropertyValue::String(s) if value.needs_dynamic_storage() => {
                let records = self.strings.allocate(s.as_bytes())?;
                PropertyBlock::string_ref(key_id, records)
            }
            _ => PropertyBlock::inline(key_id, value),
        }
    }

    /// Decode the value of a block, reading string records when needed
    pub fn value(&self, block: &PropertyBlock) -> Result<PropertyValue> {
        if let Some(value) = block.inline_value()? {
            return Ok(value);
        }
        if !block.value_records.is_empty() {
            return Ok(PropertyValue::String(chain_string(&block.value_records)?));
        }
        let first = block.string_record_id().ok_or_else(|| {
            Error::invalid_record(format!(
                "property block for key {} has no value",
                block.key_id()
            ))
        })?;
        Ok(PropertyValue::String(chain_string(
            &self.strings.read_chain(first)?,
        )?))
    }

    /// Attach the string records of a long string block, if not yet loaded
    pub fn make_heavy(&self, block: &mut PropertyBlock) -> Result<()> {
        if block.property_type()? != PropertyType::String || !block.value_records.is_empty() {
            return Ok(());
        }
        if let Some(first) = block.string_record_id() {
            block.value_records = self.strings.read_chain(first)?;
        }
        Ok(())
    }

    /// Write a property record together with its live and retired value records
    pub fn update(&self, record: &PropertyRecord) -> Result<()> {
        for block in &record.blocks {
            let fresh: Vec<_> = block
                .value_records
                .iter()
                .filter(|r| r.created)
                .cloned()
                .collect();
            self.strings.update_all(&fresh)?;
        }
        self.strings.update_all(&record.deleted_value_records)?;
        self.records.update(record)
    }

    /// Recovery variant of [`PropertyStore::update`]
    pub fn update_recovered(&self, record: &PropertyRecord) -> Result<()> {
        for block in &record.blocks {
            self.strings.update_all_recovered(&block.value_records)?;
        }
        self.strings
            .update_all_recovered(&record.deleted_value_records)?;
        self.records.update_recovered(record)
    }

    /// Flush both files
    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.strings.records().flush()
    }

    /// Flush and mark both id files clean
    pub fn close(&self) -> Result<()> {
        self.records.close()?;
        self.strings.records().close()
    }

    /// Rescan both files for free ids
    pub fn rebuild_ids(&self) -> Result<()> {
        self.records.rebuild_ids()?;
        self.strings.records().rebuild_ids()
    }
}
