//! Kernel - owns the stores, the command log and the lock manager, hands
//! out transactions and serialises commits
//!
//! Opening a kernel runs recovery: every transaction the command log holds a
//! commit entry for is replayed in transaction-id order, the id allocators
//! are rebuilt from the store contents and the log is truncated.
//!
//! The log is bounded: `flush` and any commit that grows it past
//! `command_log_rotation_bytes` flush the stores and drop finished
//! transactions from it.

use crate::cache::CacheInvalidation;
use crate::config::StoreConfig;
use crate::log::CommandLog;
use crate::store::GraphStore;
use crate::transaction::{
    ReadTransaction, RowLockManager, StoreTransaction, TxState, WriteTransaction,
};
use crate::Result;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const COMMAND_LOG_FILE: &str = "commands.log";

/// Entry point of the record storage
pub struct Kernel {
    store: Arc<GraphStore>,
    cache: Arc<dyn CacheInvalidation>,
    locks: RowLockManager,
    log: Option<Arc<CommandLog>>,
    rotation_bytes: u64,
    next_identifier: AtomicU64,
    commit_lock: Mutex<()>,
}

impl Kernel {
    /// Open the stores in `dir` and recover committed transactions from the
    /// command log
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use trellis_core::cache::NoCache;
    /// use trellis_core::config::StoreConfig;
    /// use trellis_core::kernel::Kernel;
    /// use trellis_core::transaction::StoreTransaction;
    ///
    /// let kernel = Kernel::open("./graph", StoreConfig::default(), Arc::new(NoCache)).unwrap();
    /// let mut tx = kernel.begin_write();
    /// let node = kernel.next_node_id().unwrap();
    /// tx.node_create(node).unwrap();
    /// kernel.commit(&mut tx).unwrap();
    /// ```
    pub fn open(
        dir: impl AsRef<Path>,
        config: StoreConfig,
        cache: Arc<dyn CacheInvalidation>,
    ) -> Result<Self> {
        let locks = RowLockManager::new(config.lock_timeout());
        let log_enabled = config.command_log_enabled;
        let rotation_bytes = config.command_log_rotation_bytes;
        let store = Arc::new(GraphStore::open(dir, config)?);
        let log = if log_enabled {
            Some(Arc::new(CommandLog::open(
                store.dir().join(COMMAND_LOG_FILE),
            )?))
        } else {
            None
        };

        let kernel = Self {
            store,
            cache,
            locks,
            log,
            rotation_bytes,
            next_identifier: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
        };
        kernel.recover()?;
        // Nothing is in flight yet, so leftovers of unfinished transactions go too
        if let Some(log) = &kernel.log {
            if !log.is_empty()? {
                log.truncate()?;
            }
        }
        Ok(kernel)
    }

    /// The stores
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// The lock manager shared by all write transactions
    pub fn locks(&self) -> &RowLockManager {
        &self.locks
    }

    /// The command log, when enabled
    pub fn command_log(&self) -> Option<&Arc<CommandLog>> {
        self.log.as_ref()
    }

    /// Id of the last committed transaction
    pub fn last_committed_tx(&self) -> u64 {
        self.store.meta().last_committed_tx()
    }

    /// Replay every committed transaction found in the command log
    pub fn recover(&self) -> Result<usize> {
        let Some(log) = &self.log else {
            return Ok(0);
        };
        let transactions = log.committed_transactions()?;
        if transactions.is_empty() {
            return Ok(0);
        }

        tracing::info!(
            "Recovering {} transactions from {:?}",
            transactions.len(),
            log.path()
        );
        let count = transactions.len();
        for recovered in transactions {
            self.next_identifier
                .fetch_max(recovered.identifier + 1, Ordering::SeqCst);
            let mut tx = WriteTransaction::recovered(
                recovered.identifier,
                Arc::clone(&self.store),
                Arc::clone(&self.cache),
                self.locks.clone(),
                recovered.commands,
            );
            tx.commit(recovered.tx_id)?;
        }

        self.store.rebuild_id_generators()?;
        self.store.flush()?;
        log.truncate()?;
        tracing::info!(
            "Recovery complete, last committed tx is {}",
            self.last_committed_tx()
        );
        Ok(count)
    }

    fn next_identifier(&self) -> u64 {
        self.next_identifier.fetch_add(1, Ordering::SeqCst)
    }

    /// Start a write transaction
    pub fn begin_write(&self) -> WriteTransaction {
        WriteTransaction::new(
            self.next_identifier(),
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            self.locks.clone(),
            self.log.clone(),
        )
    }

    /// Start a read-only transaction
    pub fn begin_read(&self) -> ReadTransaction {
        ReadTransaction::new(self.next_identifier(), Arc::clone(&self.store))
    }

    /// Prepare (if still active) and commit `tx` under the next transaction
    /// id, returning that id
    pub fn commit(&self, tx: &mut WriteTransaction) -> Result<u64> {
        if tx.state() == TxState::Active {
            tx.prepare()?;
        }
        let _guard = self.commit_lock.lock();
        let tx_id = self.last_committed_tx() + 1;
        tx.commit(tx_id)?;
        if let Some(log) = &self.log {
            if self.rotation_bytes > 0 && log.len()? >= self.rotation_bytes {
                self.checkpoint(log)?;
            }
        }
        Ok(tx_id)
    }

    /// Make the stores durable, then drop what they now hold from the log.
    /// Callers hold `commit_lock`.
    fn checkpoint(&self, log: &CommandLog) -> Result<()> {
        self.store.flush()?;
        let kept = log.rotate()?;
        tracing::debug!(
            "Checkpoint at tx {}, {} log entries of open transactions kept",
            self.last_committed_tx(),
            kept
        );
        Ok(())
    }

    /// Roll back `tx`
    pub fn rollback(&self, tx: &mut WriteTransaction) -> Result<()> {
        tx.rollback()
    }

    /// Allocate a node id
    pub fn next_node_id(&self) -> Result<u64> {
        self.store.nodes().next_id()
    }

    /// Allocate a relationship id
    pub fn next_relationship_id(&self) -> Result<u64> {
        self.store.relationships().next_id()
    }

    /// Allocate a relationship type id
    pub fn next_relationship_type_id(&self) -> Result<u32> {
        self.store.relationship_types().next_id()
    }

    /// Allocate a property key id
    pub fn next_property_key_id(&self) -> Result<u32> {
        self.store.property_keys().next_id()
    }

    /// Flush every store and drop the committed transactions from the
    /// command log
    pub fn flush(&self) -> Result<()> {
        let _guard = self.commit_lock.lock();
        match &self.log {
            Some(log) => self.checkpoint(log),
            None => self.store.flush(),
        }
    }

    /// Flush and close the stores. Everything committed is in the stores
    /// afterwards, so the command log is emptied.
    pub fn close(&self) -> Result<()> {
        let _guard = self.commit_lock.lock();
        self.store.close()?;
        if let Some(log) = &self.log {
            log.truncate()?;
        }
        Ok(())
    }
}
