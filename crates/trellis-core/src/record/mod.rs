//! Fixed-size record formats
//!
//! Every record kind knows its on-disk size and how to encode itself into,
//! and decode itself from, exactly that many bytes:
//!
//! | Kind                 | Size | Id width |
//! |----------------------|------|----------|
//! | Node                 | 10   | 35 bits  |
//! | Relationship         | 34   | 35 bits  |
//! | Relationship group   | 20   | 35 bits  |
//! | Property             | 41   | 36 bits  |
//! | Dynamic (overflow)   | 128  | 36 bits  |
//! | Token                | 5    | 36 bits  |
//!
//! All multi-byte integers are little-endian. An all-zero slot is a record
//! that is not in use, for every kind.

pub mod bits;
pub mod dynamic;
pub mod group;
pub mod node;
pub mod property;
pub mod relationship;
pub mod token;

pub use bits::NO_ID;
pub use dynamic::DynamicRecord;
pub use group::{RelDirection, RelationshipGroupRecord};
pub use node::NodeRecord;
pub use property::{
    PropertyBlock, PropertyOwner, PropertyRecord, PropertyType, PropertyValue,
};
pub use relationship::RelationshipRecord;
pub use token::TokenRecord;

use crate::Result;
use serde::{Deserialize, Serialize};

/// A fixed-size record with a binary codec
pub trait Record: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Size of one encoded record in bytes
    const RECORD_SIZE: usize;
    /// Human readable kind, used in error messages and logs
    const TYPE_NAME: &'static str;

    /// Logical id (slot index in the store file)
    fn id(&self) -> u64;

    /// Whether the slot holds a live record
    fn in_use(&self) -> bool;

    /// Encode into `buf`, which is exactly [`Record::RECORD_SIZE`] bytes.
    /// Records that are not in use encode as all zeroes.
    fn encode(&self, buf: &mut [u8]) -> Result<()>;

    /// Decode from `buf`; `None` when the slot is not in use.
    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>>;

    /// Sentinel returned by forced loads of slots that are not in use
    fn not_in_use(id: u64) -> Self;
}

/// How a store should treat a slot that is not in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLoad {
    /// Fail with `InvalidRecord`
    Normal,
    /// Report the record as absent
    Check,
    /// Return a not-in-use sentinel record
    Force,
}

/// The graph-global primitive that owns a property chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphRecord {
    /// First record of the graph property chain
    pub first_property_id: u64,
}

impl Default for GraphRecord {
    fn default() -> Self {
        Self {
            first_property_id: NO_ID,
        }
    }
}
