//! Relationship group record (20 bytes)
//!
//! ```text
//! [0]       bit0 in use | bits1-3 next_group high | bits4-6 next_out high
//! [1]       bits1-3 next_in high | bits4-6 next_loop high
//! [2..4]    type
//! [4..8]    next_group low
//! [8..12]   next_out low
//! [12..16]  next_in low
//! [16..20]  next_loop low
//! ```

use super::bits::{self, HighBits, NO_ID};
use super::relationship::MAX_TYPE_ID;
use super::Record;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const IN_USE: u32 = 0x1;
const FIRST_SHIFT: u32 = 1;
const SECOND_SHIFT: u32 = 4;

/// Sub-chain of a relationship group, i.e. the direction of a relationship
/// relative to the node owning the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelDirection {
    /// Node is the start node
    Outgoing,
    /// Node is the end node
    Incoming,
    /// Node is both start and end
    Loop,
}

impl RelDirection {
    /// All sub-chains in traversal order
    pub const ALL: [RelDirection; 3] = [
        RelDirection::Outgoing,
        RelDirection::Incoming,
        RelDirection::Loop,
    ];
}

fn no_id() -> u64 {
    NO_ID
}

/// Per-type relationship group of a dense node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipGroupRecord {
    /// Group id
    pub id: u64,
    /// Whether the record is live
    pub in_use: bool,
    /// Relationship type held by this group
    pub type_id: u32,
    /// Next group of the same node
    pub next_group: u64,
    /// Head of the outgoing sub-chain
    pub next_out: u64,
    /// Head of the incoming sub-chain
    pub next_in: u64,
    /// Head of the loop sub-chain
    pub next_loop: u64,
    /// Previous group; known only while a transaction holds the group chain
    #[serde(skip, default = "no_id")]
    pub prev_group: u64,
    /// Created by the transaction currently staging it
    #[serde(default)]
    pub created: bool,
}

impl RelationshipGroupRecord {
    /// A fresh, in-use group with empty sub-chains
    pub fn new(id: u64, type_id: u32) -> Self {
        Self {
            id,
            in_use: true,
            type_id,
            next_group: NO_ID,
            next_out: NO_ID,
            next_in: NO_ID,
            next_loop: NO_ID,
            prev_group: NO_ID,
            created: false,
        }
    }

    /// Head of the given sub-chain
    pub fn head(&self, direction: RelDirection) -> u64 {
        match direction {
            RelDirection::Outgoing => self.next_out,
            RelDirection::Incoming => self.next_in,
            RelDirection::Loop => self.next_loop,
        }
    }

    /// Replace the head of the given sub-chain
    pub fn set_head(&mut self, direction: RelDirection, id: u64) {
        match direction {
            RelDirection::Outgoing => self.next_out = id,
            RelDirection::Incoming => self.next_in = id,
            RelDirection::Loop => self.next_loop = id,
        }
    }

    /// No sub-chain has any relationship left
    pub fn is_empty(&self) -> bool {
        self.next_out == NO_ID && self.next_in == NO_ID && self.next_loop == NO_ID
    }
}

impl Record for RelationshipGroupRecord {
    const RECORD_SIZE: usize = 20;
    const TYPE_NAME: &'static str = "RelationshipGroup";

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
        if self.type_id > MAX_TYPE_ID {
            return Err(Error::invalid_record(format!(
                "RelationshipGroup[{}] type {} does not fit in 16 bits",
                self.id, self.type_id
            )));
        }
        let (group_low, group_high) =
            bits::split(self.next_group, HighBits::Three, "group next_group")?;
        let (out_low, out_high) = bits::split(self.next_out, HighBits::Three, "group next_out")?;
        let (in_low, in_high) = bits::split(self.next_in, HighBits::Three, "group next_in")?;
        let (loop_low, loop_high) =
            bits::split(self.next_loop, HighBits::Three, "group next_loop")?;

        buf[0] = (IN_USE
            | bits::pack(group_high, FIRST_SHIFT)
            | bits::pack(out_high, SECOND_SHIFT)) as u8;
        buf[1] = (bits::pack(in_high, FIRST_SHIFT) | bits::pack(loop_high, SECOND_SHIFT)) as u8;
        bits::write_u16(buf, 2, self.type_id as u16);
        bits::write_u32(buf, 4, group_low);
        bits::write_u32(buf, 8, out_low);
        bits::write_u32(buf, 12, in_low);
        bits::write_u32(buf, 16, loop_low);
        Ok(())
    }

    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>> {
        let header = buf[0] as u32;
        if header & IN_USE == 0 {
            return Ok(None);
        }
        let high = buf[1] as u32;
        Ok(Some(Self {
            id,
            in_use: true,
            type_id: bits::read_u16(buf, 2) as u32,
            next_group: bits::join(
                bits::read_u32(buf, 4),
                bits::unpack(header, FIRST_SHIFT, HighBits::Three),
            ),
            next_out: bits::join(
                bits::read_u32(buf, 8),
                bits::unpack(header, SECOND_SHIFT, HighBits::Three),
            ),
            next_in: bits::join(
                bits::read_u32(buf, 12),
                bits::unpack(high, FIRST_SHIFT, HighBits::Three),
            ),
            next_loop: bits::join(
                bits::read_u32(buf, 16),
                bits::unpack(high, SECOND_SHIFT, HighBits::Three),
            ),
            prev_group: NO_ID,
            created: false,
        }))
    }

    fn not_in_use(id: u64) -> Self {
        Self {
            in_use: false,
            ..Self::new(id, 0)
        }
    }
}
