//! Node record (10 bytes)
//!
//! ```text
//! [0]     bit0 in use | bits1-3 first_relationship high | bits4-7 first_property high
//! [1..5]  first_relationship low
//! [5..9]  first_property low
//! [9]     bit0 dense
//! ```

use super::bits::{self, HighBits, NO_ID};
use super::Record;
use crate::Result;
use serde::{Deserialize, Serialize};

const IN_USE: u8 = 0x1;
const DENSE: u8 = 0x1;
const REL_HIGH_SHIFT: u32 = 1;
const PROP_HIGH_SHIFT: u32 = 4;

/// A node: heads of its relationship chain (or group chain) and property chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id
    pub id: u64,
    /// Whether the record is live
    pub in_use: bool,
    /// First relationship, or first relationship group when dense
    pub first_relationship_id: u64,
    /// First property record
    pub first_property_id: u64,
    /// Relationships are organised in per-type groups
    pub is_dense: bool,
    /// Created by the transaction currently staging it
    #[serde(default)]
    pub created: bool,
}

impl NodeRecord {
    /// A fresh, in-use node with empty chains
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            first_relationship_id: NO_ID,
            first_property_id: NO_ID,
            is_dense: false,
            created: false,
        }
    }
}

impl Record for NodeRecord {
    const RECORD_SIZE: usize = 10;
    const TYPE_NAME: &'static str = "Node";

    fn id(&self) -> u64 {
        self.id
    }

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        buf.fill(0);
        if !self.in_use {
            return Ok(());
        }
        let (rel_low, rel_high) =
            bits::split(self.first_relationship_id, HighBits::Three, "node first_relationship")?;
        let (prop_low, prop_high) =
            bits::split(self.first_property_id, HighBits::Four, "node first_property")?;

        let header = IN_USE as u32
            | bits::pack(rel_high, REL_HIGH_SHIFT)
            | bits::pack(prop_high, PROP_HIGH_SHIFT);
        buf[0] = header as u8;
        bits::write_u32(buf, 1, rel_low);
        bits::write_u32(buf, 5, prop_low);
        buf[9] = if self.is_dense { DENSE } else { 0 };
        Ok(())
    }

    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>> {
        let header = buf[0] as u32;
        if header & IN_USE as u32 == 0 {
            return Ok(None);
        }
        let first_relationship_id = bits::join(
            bits::read_u32(buf, 1),
            bits::unpack(header, REL_HIGH_SHIFT, HighBits::Three),
        );
        let first_property_id = bits::join(
            bits::read_u32(buf, 5),
            bits::unpack(header, PROP_HIGH_SHIFT, HighBits::Four),
        );
        Ok(Some(Self {
            id,
            in_use: true,
            first_relationship_id,
            first_property_id,
            is_dense: buf[9] & DENSE != 0,
            created: false,
        }))
    }

    fn not_in_use(id: u64) -> Self {
        Self {
            in_use: false,
            ..Self::new(id)
        }
    }
}
