//! Store metadata: identity, last committed transaction and the graph
//! property chain head

use super::mapped::MappedFile;
use crate::record::bits::NO_ID;
use crate::record::GraphRecord;
use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

const META_MAGIC: u64 = 0x5452_454C_4C49_5331; // "TRELLIS1"
const META_VERSION: u64 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MetaHeader {
    magic: u64,
    version: u64,
    creation_time_ms: i64,
    random_id: u64,
    last_committed_tx: u64,
    graph_first_property: u64,
}

const META_SIZE: usize = std::mem::size_of::<MetaHeader>();

/// Metadata file of a graph store
pub struct MetaStore {
    file: Mutex<MappedFile>,
    creation_time_ms: i64,
    random_id: u64,
    last_committed_tx: AtomicU64,
    graph_first_property: AtomicU64,
}

impl MetaStore {
    /// Open the metadata file, initialising it on first use
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = MappedFile::new(path, META_SIZE)?;
        let header: MetaHeader = bytemuck::pod_read_unaligned(file.get_slice(0, META_SIZE)?);

        let header = if header.magic == 0 {
            let fresh = MetaHeader {
                magic: META_MAGIC,
                version: META_VERSION,
                creation_time_ms: chrono::Utc::now().timestamp_millis(),
                random_id: rand::random(),
                last_committed_tx: 0,
                graph_first_property: NO_ID,
            };
            file.get_slice_mut(0, META_SIZE)?
                .copy_from_slice(bytemuck::bytes_of(&fresh));
            file.flush()?;
            tracing::info!("Created store metadata {:?} (store id {:x})", path, fresh.random_id);
            fresh
        } else if header.magic != META_MAGIC || header.version != META_VERSION {
            return Err(Error::storage(format!(
                "{:?} is not a supported metadata file (magic {:x}, version {})",
                path, header.magic, header.version
            )));
        } else {
            header
        };

        Ok(Self {
            file: Mutex::new(file),
            creation_time_ms: header.creation_time_ms,
            random_id: header.random_id,
            last_committed_tx: AtomicU64::new(header.last_committed_tx),
            graph_first_property: AtomicU64::new(header.graph_first_property),
        })
    }

    /// Store creation time, milliseconds since the epoch
    pub fn creation_time_ms(&self) -> i64 {
        self.creation_time_ms
    }

    /// Random identity chosen when the store was created
    pub fn random_id(&self) -> u64 {
        self.random_id
    }

    /// Id of the last committed transaction
    pub fn last_committed_tx(&self) -> u64 {
        self.last_committed_tx.load(Ordering::Acquire)
    }

    /// Fail unless `tx_id` directly follows the last committed transaction
    pub fn check_next_tx(&self, tx_id: u64) -> Result<()> {
        let last = self.last_committed_tx();
        if last.checked_add(1) != Some(tx_id) {
            return Err(Error::OrderingViolation {
                expected: last.wrapping_add(1),
                actual: tx_id,
            });
        }
        Ok(())
    }

    /// Advance the last committed transaction from `tx_id - 1` to `tx_id`
    pub fn compare_and_increment(&self, tx_id: u64) -> Result<()> {
        let expected = tx_id.checked_sub(1).ok_or(Error::OrderingViolation {
            expected: self.last_committed_tx().wrapping_add(1),
            actual: tx_id,
        })?;
        self.last_committed_tx
            .compare_exchange(expected, tx_id, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|last| Error::OrderingViolation {
                expected: last.wrapping_add(1),
                actual: tx_id,
            })?;
        self.persist()
    }

    /// Raise the last committed transaction to at least `tx_id` (recovery)
    pub fn raise_last_committed(&self, tx_id: u64) -> Result<()> {
        self.last_committed_tx.fetch_max(tx_id, Ordering::AcqRel);
        self.persist()
    }

    /// The graph-global record
    pub fn graph_record(&self) -> GraphRecord {
        GraphRecord {
            first_property_id: self.graph_first_property.load(Ordering::Acquire),
        }
    }

    /// Replace the graph-global record
    pub fn set_graph_record(&self, record: &GraphRecord) -> Result<()> {
        self.graph_first_property
            .store(record.first_property_id, Ordering::Release);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let header = MetaHeader {
            magic: META_MAGIC,
            version: META_VERSION,
            creation_time_ms: self.creation_time_ms,
            random_id: self.random_id,
            last_committed_tx: self.last_committed_tx(),
            graph_first_property: self.graph_first_property.load(Ordering::Acquire),
        };
        let mut file = self.file.lock();
        file.get_slice_mut(0, META_SIZE)?
            .copy_from_slice(bytemuck::bytes_of(&header));
        Ok(())
    }

    /// Flush the metadata file
    pub fn flush(&self) -> Result<()> {
        self.file.lock().flush()
    }
}
