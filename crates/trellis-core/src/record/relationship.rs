//! Relationship record (34 bytes)
//!
//! ```text
//! [0]       bit0 in use | bits1-3 start_node high | bits4-7 first_property high
//! [1..5]    start_node low
//! [5..9]    end_node low
//! [9..13]   type word: bits0-15 type, 16-18 end_next high, 19-21 end_prev high,
//!           22-24 start_next high, 25-27 start_prev high, 28-30 end_node high
//! [13..17]  start_prev low
//! [17..21]  start_next low
//! [21..25]  end_prev low
//! [25..29]  end_next low
//! [29..33]  first_property low
//! [33]      bit0 first in start chain | bit1 first in end chain
//! ```
//!
//! The prev field of a chain's first record holds the chain length instead
//! of an id.

use super::bits::{self, HighBits, NO_ID};
use super::group::RelDirection;
use super::Record;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const IN_USE: u32 = 0x1;
const START_NODE_SHIFT: u32 = 1;
const FIRST_PROP_SHIFT: u32 = 4;

const TYPE_MASK: u32 = 0xFFFF;
const END_NEXT_SHIFT: u32 = 16;
const END_PREV_SHIFT: u32 = 19;
const START_NEXT_SHIFT: u32 = 22;
const START_PREV_SHIFT: u32 = 25;
const END_NODE_SHIFT: u32 = 28;

const FIRST_IN_START: u8 = 0x1;
const FIRST_IN_END: u8 = 0x2;

/// Largest relationship type id the type word can hold
pub const MAX_TYPE_ID: u32 = TYPE_MASK;

/// A relationship and its links in both endpoint chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// Relationship id
    pub id: u64,
    /// Whether the record is live
    pub in_use: bool,
    /// Relationship type token
    pub type_id: u32,
    /// Start node
    pub start_node: u64,
    /// End node
    pub end_node: u64,
    /// Previous relationship in the start node's chain, or the chain count when first
    pub start_prev: u64,
    /// Next relationship in the start node's chain
    pub start_next: u64,
    /// Previous relationship in the end node's chain, or the chain count when first
    pub end_prev: u64,
    /// Next relationship in the end node's chain
    pub end_next: u64,
    /// Head of the start node's chain
    pub first_in_start_chain: bool,
    /// Head of the end node's chain
    pub first_in_end_chain: bool,
    /// First property record
    pub first_property_id: u64,
    /// Created by the transaction currently staging it
    #[serde(default)]
    pub created: bool,
}

impl RelationshipRecord {
    /// A fresh, in-use, unlinked relationship
    pub fn new(id: u64, start_node: u64, end_node: u64, type_id: u32) -> Self {
        Self {
            id,
            in_use: true,
            type_id,
            start_node,
            end_node,
            start_prev: 1,
            start_next: NO_ID,
            end_prev: 1,
            end_next: NO_ID,
            first_in_start_chain: true,
            first_in_end_chain: true,
            first_property_id: NO_ID,
            created: false,
        }
    }

    /// Start and end node are the same
    pub fn is_loop(&self) -> bool {
        self.start_node == self.end_node
    }

    /// Direction of this relationship as seen from `node`
    pub fn direction_from(&self, node: u64) -> Option<RelDirection> {
        match (self.start_node == node, self.end_node == node) {
            (true, true) => Some(RelDirection::Loop),
            (true, false) => Some(RelDirection::Outgoing),
            (false, true) => Some(RelDirection::Incoming),
            (false, false) => None,
        }
    }

    /// Next pointer in `node`'s chain
    pub fn next_for(&self, node: u64) -> Result<u64> {
        if self.start_node == node {
            Ok(self.start_next)
        } else if self.end_node == node {
            Ok(self.end_next)
        } else {
            Err(self.not_attached(node))
        }
    }

    /// Prev pointer (or count) in `node`'s chain
    pub fn prev_for(&self, node: u64) -> Result<u64> {
        if self.start_node == node {
            Ok(self.start_prev)
        } else if self.end_node == node {
            Ok(self.end_prev)
        } else {
            Err(self.not_attached(node))
        }
    }

    /// Whether this record heads `node`'s chain
    pub fn first_in_chain_for(&self, node: u64) -> Result<bool> {
        if self.start_node == node {
            Ok(self.first_in_start_chain)
        } else if self.end_node == node {
            Ok(self.first_in_end_chain)
        } else {
            Err(self.not_attached(node))
        }
    }

    /// Set the next pointer on every side that belongs to `node`
    pub fn set_next_for(&mut self, node: u64, next: u64) {
        if self.start_node == node {
            self.start_next = next;
        }
        if self.end_node == node {
            self.end_next = next;
        }
    }

    /// Set prev pointer and head flag on every side that belongs to `node`
    pub fn set_prev_for(&mut self, node: u64, prev: u64, first: bool) {
        if self.start_node == node {
            self.start_prev = prev;
            self.first_in_start_chain = first;
        }
        if self.end_node == node {
            self.end_prev = prev;
            self.first_in_end_chain = first;
        }
    }

    fn not_attached(&self, node: u64) -> Error {
        Error::invalid_record(format!(
            "Relationship[{}] ({} -> {}) is not in the chain of node {}",
            self.id, self.start_node, self.end_node, node
        ))
    }
}

impl Record for RelationshipRecord {
    const RECORD_SIZE: usize = 34;
    const TYPE_NAME: &'static str = "Relationship";

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
                "Relationship[{}] type {} does not fit in 16 bits",
                self.id, self.type_id
            )));
        }
        let (start_low, start_high) =
            bits::split(self.start_node, HighBits::Three, "relationship start_node")?;
        let (end_low, end_high) =
            bits::split(self.end_node, HighBits::Three, "relationship end_node")?;
        let (sp_low, sp_high) =
            bits::split(self.start_prev, HighBits::Three, "relationship start_prev")?;
        let (sn_low, sn_high) =
            bits::split(self.start_next, HighBits::Three, "relationship start_next")?;
        let (ep_low, ep_high) =
            bits::split(self.end_prev, HighBits::Three, "relationship end_prev")?;
        let (en_low, en_high) =
            bits::split(self.end_next, HighBits::Three, "relationship end_next")?;
        let (prop_low, prop_high) =
            bits::split(self.first_property_id, HighBits::Four, "relationship first_property")?;

        let header = IN_USE
            | bits::pack(start_high, START_NODE_SHIFT)
            | bits::pack(prop_high, FIRST_PROP_SHIFT);
        let type_word = self.type_id
            | bits::pack(en_high, END_NEXT_SHIFT)
            | bits::pack(ep_high, END_PREV_SHIFT)
            | bits::pack(sn_high, START_NEXT_SHIFT)
            | bits::pack(sp_high, START_PREV_SHIFT)
            | bits::pack(end_high, END_NODE_SHIFT);

        buf[0] = header as u8;
        bits::write_u32(buf, 1, start_low);
        bits::write_u32(buf, 5, end_low);
        bits::write_u32(buf, 9, type_word);
        bits::write_u32(buf, 13, sp_low);
        bits::write_u32(buf, 17, sn_low);
        bits::write_u32(buf, 21, ep_low);
        bits::write_u32(buf, 25, en_low);
        bits::write_u32(buf, 29, prop_low);
        let mut extra = 0u8;
        if self.first_in_start_chain {
            extra |= FIRST_IN_START;
        }
        if self.first_in_end_chain {
            extra |= FIRST_IN_END;
        }
        buf[33] = extra;
        Ok(())
    }

    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>> {
        let header = buf[0] as u32;
        if header & IN_USE == 0 {
            return Ok(None);
        }
        let type_word = bits::read_u32(buf, 9);
        Ok(Some(Self {
            id,
            in_use: true,
            type_id: type_word & TYPE_MASK,
            start_node: bits::join(
                bits::read_u32(buf, 1),
                bits::unpack(header, START_NODE_SHIFT, HighBits::Three),
            ),
            end_node: bits::join(
                bits::read_u32(buf, 5),
                bits::unpack(type_word, END_NODE_SHIFT, HighBits::Three),
            ),
            start_prev: bits::join(
                bits::read_u32(buf, 13),
                bits::unpack(type_word, START_PREV_SHIFT, HighBits::Three),
            ),
            start_next: bits::join(
                bits::read_u32(buf, 17),
                bits::unpack(type_word, START_NEXT_SHIFT, HighBits::Three),
            ),
            end_prev: bits::join(
                bits::read_u32(buf, 21),
                bits::unpack(type_word, END_PREV_SHIFT, HighBits::Three),
            ),
            end_next: bits::join(
                bits::read_u32(buf, 25),
                bits::unpack(type_word, END_NEXT_SHIFT, HighBits::Three),
            ),
            first_in_start_chain: buf[33] & FIRST_IN_START != 0,
            first_in_end_chain: buf[33] & FIRST_IN_END != 0,
            first_property_id: bits::join(
                bits::read_u32(buf, 29),
                bits::unpack(header, FIRST_PROP_SHIFT, HighBits::Four),
            ),
            created: false,
        }))
    }

    fn not_in_use(id: u64) -> Self {
        Self {
            in_use: false,
            start_node: NO_ID,
            end_node: NO_ID,
            start_prev: NO_ID,
            end_prev: NO_ID,
            first_in_start_chain: false,
            first_in_end_chain: false,
            ..Self::new(id, NO_ID, NO_ID, 0)
        }
    }
}
