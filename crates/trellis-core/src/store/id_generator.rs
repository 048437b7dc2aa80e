//! Id allocation for one record kind
//!
//! Freed ids are kept in a `RoaringTreemap` and handed out lowest first;
//! otherwise the high-water mark grows. The state is persisted to a sidecar
//! `.id` file. The file is marked unclean while the store is open, so a
//! crash leaves a file the next open refuses to trust and the store rebuilds
//! its ids by scanning.

use crate::record::bits::RESERVED_ID;
use crate::{Error, Result};
use parking_lot::Mutex;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
struct IdFile {
    clean: bool,
    high_id: u64,
    free_ids: Vec<u64>,
}

#[derive(Debug)]
struct IdState {
    high_id: u64,
    free: RoaringTreemap,
}

/// Allocator of record ids
#[derive(Debug)]
pub struct IdGenerator {
    path: PathBuf,
    max_id: u64,
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Load a cleanly persisted id file. `Ok(None)` when the file is missing
    /// or was not closed cleanly.
    pub fn open(path: impl AsRef<Path>, max_id: u64) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let file: IdFile = match bincode::deserialize(&bytes) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Ignoring unreadable id file {:?}: {}", path, e);
                return Ok(None);
            }
        };
        if !file.clean {
            tracing::warn!("Id file {:?} was not closed cleanly", path);
            return Ok(None);
        }
        let generator = Self {
            path,
            max_id,
            state: Mutex::new(IdState {
                high_id: file.high_id,
                free: file.free_ids.into_iter().collect(),
            }),
        };
        generator.persist(false)?;
        Ok(Some(generator))
    }

    /// Build an allocator from scanned store contents
    pub fn rebuilt(
        path: impl AsRef<Path>,
        max_id: u64,
        high_id: u64,
        free_ids: impl IntoIterator<Item = u64>,
    ) -> Result<Self> {
        let generator = Self {
            path: path.as_ref().to_path_buf(),
            max_id,
            state: Mutex::new(IdState {
                high_id,
                free: free_ids.into_iter().collect(),
            }),
        };
        generator.persist(false)?;
        Ok(generator)
    }

    /// Hand out the lowest free id, or extend the high-water mark
    pub fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(id) = state.free.min() {
            state.free.remove(id);
            return Ok(id);
        }
        let mut id = state.high_id;
        if id == RESERVED_ID {
            id += 1;
        }
        if id > self.max_id {
            return Err(Error::storage(format!(
                "id space of {:?} exhausted at {}",
                self.path, self.max_id
            )));
        }
        state.high_id = id + 1;
        Ok(id)
    }

    /// Return an id for reuse
    pub fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if id >= state.high_id || id == RESERVED_ID {
            return Err(Error::storage(format!(
                "cannot free id {} of {:?}, high id is {}",
                id, self.path, state.high_id
            )));
        }
        if !state.free.insert(id) {
            return Err(Error::storage(format!(
                "id {} of {:?} freed twice",
                id, self.path
            )));
        }
        Ok(())
    }

    /// Register an id as used, e.g. when recovery writes a record
    pub fn mark_used(&self, id: u64) {
        let mut state = self.state.lock();
        state.free.remove(id);
        if id >= state.high_id {
            state.high_id = id + 1;
        }
    }

    /// One past the highest id ever handed out
    pub fn high_id(&self) -> u64 {
        self.state.lock().high_id
    }

    /// Number of ids waiting for reuse
    pub fn free_count(&self) -> u64 {
        self.state.lock().free.len()
    }

    /// Whether `id` is waiting for reuse
    pub fn is_free(&self, id: u64) -> bool {
        self.state.lock().free.contains(id)
    }

    /// Write the id file, flagged clean or not
    pub fn persist(&self, clean: bool) -> Result<()> {
        let file = {
            let state = self.state.lock();
            IdFile {
                clean,
                high_id: state.high_id,
                free_ids: state.free.iter().collect(),
            }
        };
        let bytes = bincode::serialize(&file)
            .map_err(|e| Error::storage(format!("failed to encode id file: {}", e)))?;
        let tmp = self.path.with_extension("id.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
