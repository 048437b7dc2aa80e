//! Generic fixed-size record store over a memory-mapped file

use super::id_generator::IdGenerator;
use super::mapped::MappedFile;
use crate::record::bits::{NO_ID, RESERVED_ID};
use crate::record::{Record, RecordLoad};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Store of one record kind: slot `id` lives at byte `id * RECORD_SIZE`
pub struct RecordStore<R: Record> {
    path: PathBuf,
    file: RwLock<MappedFile>,
    ids: IdGenerator,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStore<R> {
    /// Open or create the store at `path`, with its id file next to it
    pub fn open(path: impl AsRef<Path>, initial_size: usize, max_id: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let initial_size = initial_size.div_ceil(R::RECORD_SIZE).max(1) * R::RECORD_SIZE;
        let file = MappedFile::new(&path, initial_size)?;
        let id_path = path.with_extension("id");

        let ids = match IdGenerator::open(&id_path, max_id)? {
            Some(ids) => ids,
            None => {
                let (high_id, free) = scan_ids::<R>(&file)?;
                tracing::info!(
                    "Rebuilt {} ids for {:?}: high id {}, {} free",
                    R::TYPE_NAME,
                    path,
                    high_id,
                    free.len()
                );
                IdGenerator::rebuilt(&id_path, max_id, high_id, free)?
            }
        };

        tracing::debug!(
            "Opened {} store {:?} (high id {})",
            R::TYPE_NAME,
            path,
            ids.high_id()
        );

        Ok(Self {
            path,
            file: RwLock::new(file),
            ids,
            _record: PhantomData,
        })
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a record with an explicit policy for slots that are not in use
    pub fn load(&self, id: u64, mode: RecordLoad) -> Result<Option<R>> {
        let decoded = if id == NO_ID {
            None
        } else {
            let offset = id as usize * R::RECORD_SIZE;
            let file = self.file.read();
            if offset + R::RECORD_SIZE > file.len() {
                None
            } else {
                R::decode(id, file.get_slice(offset, R::RECORD_SIZE)?)?
            }
        };
        match (decoded, mode) {
            (Some(record), _) => Ok(Some(record)),
            (None, RecordLoad::Normal) => Err(Error::invalid_record(format!(
                "{}[{}] not in use",
                R::TYPE_NAME,
                id
            ))),
            (None, RecordLoad::Check) => Ok(None),
            (None, RecordLoad::Force) => Ok(Some(R::not_in_use(id))),
        }
    }

    /// Strict load: a slot that is not in use is an `InvalidRecord` error
    pub fn get(&self, id: u64) -> Result<R> {
        self.load(id, RecordLoad::Normal)?
            .ok_or_else(|| Error::invalid_record(format!("{}[{}] not in use", R::TYPE_NAME, id)))
    }

    /// Load, reporting slots that are not in use as absent
    pub fn get_checked(&self, id: u64) -> Result<Option<R>> {
        self.load(id, RecordLoad::Check)
    }

    /// Load, returning a sentinel for slots that are not in use
    pub fn force_get(&self, id: u64) -> Result<R> {
        Ok(self
            .load(id, RecordLoad::Force)?
            .unwrap_or_else(|| R::not_in_use(id)))
    }

    /// Write a record. Writing a record that is not in use frees its id.
    pub fn update(&self, record: &R) -> Result<()> {
        self.write(record)?;
        if record.in_use() {
            self.ids.mark_used(record.id());
        } else if !self.ids.is_free(record.id()) {
            self.ids.free_id(record.id())?;
        }
        Ok(())
    }

    /// Write a record during recovery: ids are registered, never freed
    pub fn update_recovered(&self, record: &R) -> Result<()> {
        self.write(record)?;
        self.ids.mark_used(record.id());
        Ok(())
    }

    fn write(&self, record: &R) -> Result<()> {
        let id = record.id();
        if id == NO_ID || id == RESERVED_ID {
            return Err(Error::invalid_record(format!(
                "cannot write {} with reserved id {}",
                R::TYPE_NAME,
                id
            )));
        }
        let mut encoded = vec![0u8; R::RECORD_SIZE];
        record.encode(&mut encoded)?;

        let offset = id as usize * R::RECORD_SIZE;
        let mut file = self.file.write();
        file.ensure_capacity(offset + R::RECORD_SIZE)?;
        file.get_slice_mut(offset, R::RECORD_SIZE)?
            .copy_from_slice(&encoded);
        Ok(())
    }

    /// Allocate an id
    pub fn next_id(&self) -> Result<u64> {
        self.ids.next_id()
    }

    /// Return an id to the allocator without touching the record
    pub fn free_id(&self, id: u64) -> Result<()> {
        self.ids.free_id(id)
    }

    /// One past the highest id in use or handed out
    pub fn high_id(&self) -> u64 {
        self.ids.high_id()
    }

    /// Id allocator of this store
    pub fn id_generator(&self) -> &IdGenerator {
        &self.ids
    }

    /// Reconcile the id allocator with a full scan of the store. Slots that
    /// are not in use below the highest live record become free.
    pub fn rebuild_ids(&self) -> Result<()> {
        let (high_id, unused) = {
            let file = self.file.read();
            scan_ids::<R>(&file)?
        };
        if high_id > 0 {
            self.ids.mark_used(high_id - 1);
        }
        for id in unused {
            if !self.ids.is_free(id) {
                self.ids.free_id(id)?;
            }
        }
        self.ids.persist(false)
    }

    /// Flush mapped pages and the (still unclean) id file
    pub fn flush(&self) -> Result<()> {
        self.file.write().flush()?;
        self.ids.persist(false)
    }

    /// Flush and mark the id file clean
    pub fn close(&self) -> Result<()> {
        self.file.write().flush()?;
        self.ids.persist(true)
    }
}

/// Highest in-use id + 1 and every unused id below it
fn scan_ids<R: Record>(file: &MappedFile) -> Result<(u64, Vec<u64>)> {
    let slots = (file.len() / R::RECORD_SIZE) as u64;
    let mut high_id = 0;
    let mut unused = Vec::new();
    for id in 0..slots {
        let offset = id as usize * R::RECORD_SIZE;
        let in_use = R::decode(id, file.get_slice(offset, R::RECORD_SIZE)?)?.is_some();
        if in_use {
            high_id = id + 1;
        } else if id != RESERVED_ID {
            unused.push(id);
        }
    }
    unused.retain(|id| *id < high_id);
    Ok((high_id, unused))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeRecord;
    use tempfile::TempDir;

    fn create_test_store() -> (RecordStore<NodeRecord>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("nodes.store"), 64, 1 << 35).unwrap();
        (store, dir)
    }

    #[test]
    fn test_write_and_read_back() {
        let (store, _dir) = create_test_store();
        let id = store.next_id().unwrap();
        let mut node = NodeRecord::new(id);
        node.first_property_id = 12;
        store.update(&node).unwrap();
        assert_eq!(store.get(id).unwrap(), node);
    }

    #[test]
    fn test_load_modes_for_unused_slot() {
        let (store, _dir) = create_test_store();
        assert!(matches!(store.get(3), Err(Error::InvalidRecord(_))));
        assert_eq!(store.get_checked(3).unwrap(), None);
        let forced = store.force_get(3).unwrap();
        assert!(!forced.in_use);
        assert_eq!(forced.id, 3);
    }

    #[test]
    fn test_beyond_file_behaves_as_unused() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.get_checked(1_000_000).unwrap(), None);
        assert!(store.get(1_000_000).is_err());
    }

    #[test]
    fn test_store_grows_on_write() {
        let (store, _dir) = create_test_store();
        let node = NodeRecord::new(500);
        store.update(&node).unwrap();
        assert_eq!(store.get(500).unwrap(), node);
        assert_eq!(store.high_id(), 501);
    }

    #[test]
    fn test_deleting_frees_id() {
        let (store, _dir) = create_test_store();
        let a = store.next_id().unwrap();
        let b = store.next_id().unwrap();
        store.update(&NodeRecord::new(a)).unwrap();
        store.update(&NodeRecord::new(b)).unwrap();
        store.update(&NodeRecord::not_in_use(a)).unwrap();
        assert!(store.get_checked(a).unwrap().is_none());
        assert_eq!(store.next_id().unwrap(), a);
    }

    #[test]
    fn test_recovered_delete_keeps_id_reserved() {
        let (store, _dir) = create_test_store();
        let a = store.next_id().unwrap();
        store.update(&NodeRecord::new(a)).unwrap();
        store.update_recovered(&NodeRecord::not_in_use(a)).unwrap();
        assert!(!store.id_generator().is_free(a));
    }

    #[test]
    fn test_ids_rebuilt_after_unclean_shutdown() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.store");
        {
            let store: RecordStore<NodeRecord> = RecordStore::open(&path, 64, 1 << 35).unwrap();
            for id in 0..4 {
                store.update(&NodeRecord::new(id)).unwrap();
            }
            store.update(&NodeRecord::not_in_use(1)).unwrap();
            store.flush().unwrap();
            // no close: id file stays unclean
        }
        let store: RecordStore<NodeRecord> = RecordStore::open(&path, 64, 1 << 35).unwrap();
        assert_eq!(store.high_id(), 4);
        assert!(store.id_generator().is_free(1));
        assert_eq!(store.next_id().unwrap(), 1);
    }

    #[test]
    fn test_clean_close_keeps_free_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nodes.store");
        {
            let store: RecordStore<NodeRecord> = RecordStore::open(&path, 64, 1 << 35).unwrap();
            let a = store.next_id().unwrap();
            let b = store.next_id().unwrap();
            store.update(&NodeRecord::new(a)).unwrap();
            store.update(&NodeRecord::new(b)).unwrap();
            store.update(&NodeRecord::not_in_use(b)).unwrap();
            store.close().unwrap();
        }
        let store: RecordStore<NodeRecord> = RecordStore::open(&path, 64, 1 << 35).unwrap();
        assert_eq!(store.high_id(), 2);
        assert_eq!(store.next_id().unwrap(), 1);
    }

    #[test]
    fn test_rebuild_ids_after_recovery_writes() {
        let (store, _dir) = create_test_store();
        for id in 0..3 {
            store.update_recovered(&NodeRecord::new(id)).unwrap();
        }
        store.update_recovered(&NodeRecord::not_in_use(1)).unwrap();
        store.rebuild_ids().unwrap();
        assert!(store.id_generator().is_free(1));
        assert_eq!(store.high_id(), 3);
    }
}
