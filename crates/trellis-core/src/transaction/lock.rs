//! Long-duration write locks on chain records
//!
//! A write transaction locks every node, relationship and group whose chain
//! pointers it is about to rewrite, and keeps the lock until it commits or
//! rolls back. Locks are reentrant per transaction.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Kind of a lockable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    /// Node record
    Node,
    /// Relationship record
    Relationship,
    /// Relationship group record
    RelationshipGroup,
}

/// Lockable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    /// Record kind
    pub resource_type: ResourceType,
    /// Record id
    pub id: u64,
}

impl ResourceId {
    /// Node resource
    pub fn node(id: u64) -> Self {
        Self {
            resource_type: ResourceType::Node,
            id,
        }
    }

    /// Relationship resource
    pub fn relationship(id: u64) -> Self {
        Self {
            resource_type: ResourceType::Relationship,
            id,
        }
    }

    /// Relationship group resource
    pub fn group(id: u64) -> Self {
        Self {
            resource_type: ResourceType::RelationshipGroup,
            id,
        }
    }
}

#[derive(Debug, Clone)]
struct LockHolder {
    tx_id: u64,
    /// Live guards of `tx_id` on the resource
    count: usize,
    acquired_at: Instant,
}

/// Exclusive record lock manager
#[derive(Debug, Clone)]
pub struct RowLockManager {
    locks: Arc<RwLock<HashMap<ResourceId, LockHolder>>>,
    default_timeout: Duration,
}

impl RowLockManager {
    /// Create a lock manager giving up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(RwLock::new(HashMap::new())),
            default_timeout: timeout,
        }
    }

    /// Acquire a write lock with the default timeout
    pub fn acquire_write(&self, tx_id: u64, resource: ResourceId) -> Result<RowLockGuard> {
        self.acquire_write_with_timeout(tx_id, resource, self.default_timeout)
    }

    /// Acquire a write lock, waiting at most `timeout` for another holder
    pub fn acquire_write_with_timeout(
        &self,
        tx_id: u64,
        resource: ResourceId,
        timeout: Duration,
    ) -> Result<RowLockGuard> {
        let start = Instant::now();

        loop {
            {
                let mut locks = self.locks.write();
                let holder = locks.entry(resource).or_insert_with(|| LockHolder {
                    tx_id,
                    count: 0,
                    acquired_at: Instant::now(),
                });
                if holder.tx_id == tx_id {
                    holder.count += 1;
                    return Ok(RowLockGuard {
                        manager: self.clone(),
                        tx_id,
                        resource,
                    });
                }
            }
            if start.elapsed() >= timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        Err(Error::LockTimeout(format!(
            "transaction {} could not lock {:?} within {:?}",
            tx_id, resource, timeout
        )))
    }

    /// Transaction currently holding `resource`
    pub fn holder(&self, resource: ResourceId) -> Option<u64> {
        self.locks.read().get(&resource).map(|h| h.tx_id)
    }

    fn release(&self, tx_id: u64, resource: ResourceId) {
        let mut locks = self.locks.write();
        let released = match locks.get_mut(&resource) {
            Some(holder) if holder.tx_id == tx_id => {
                holder.count -= 1;
                holder.count == 0
            }
            _ => false,
        };
        if released {
            locks.remove(&resource);
        }
    }

    /// Lock statistics
    pub fn stats(&self) -> LockStats {
        let locks = self.locks.read();
        let mut holders: Vec<u64> = locks.values().map(|h| h.tx_id).collect();
        holders.sort_unstable();
        holders.dedup();
        LockStats {
            locked_resources: locks.len(),
            holding_transactions: holders.len(),
            oldest_lock_age: locks.values().map(|h| h.acquired_at.elapsed()).max(),
        }
    }
}

/// Releases its lock when dropped
#[derive(Debug)]
pub struct RowLockGuard {
    manager: RowLockManager,
    tx_id: u64,
    resource: ResourceId,
}

impl RowLockGuard {
    /// Locked resource
    pub fn resource(&self) -> ResourceId {
        self.resource
    }
}

impl Drop for RowLockGuard {
    fn drop(&mut self) {
        self.manager.release(self.tx_id, self.resource);
    }
}

/// Lock statistics
#[derive(Debug, Clone)]
pub struct LockStats {
    /// Resources currently locked
    pub locked_resources: usize,
    /// Distinct transactions holding at least one lock
    pub holding_transactions: usize,
    /// Age of the longest held lock
    pub oldest_lock_age: Option<Duration>,
}
