//! Property record (41 bytes) and property blocks
//!
//! ```text
//! [0]       bits4-7 prev high | bits0-3 next high
//! [1..5]    prev low
//! [5..9]    next low
//! [9..41]   four 64-bit payload words holding packed blocks
//! ```
//!
//! A block starts with a header word:
//!
//! ```text
//! bits0-23   property key id
//! bits24-27  type tag
//! bits28-63  inline bits (bool value, short string length)
//! ```
//!
//! followed by zero or more data words. A record is in use iff its first
//! payload word is non-zero; the first zero header ends the block list.

use super::bits::{self, HighBits, NO_ID};
use super::dynamic::DynamicRecord;
use super::Record;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Payload words per record
pub const PAYLOAD_WORDS: usize = 4;
/// Payload bytes per record
pub const PAYLOAD_SIZE: usize = PAYLOAD_WORDS * 8;
/// Longest string (in UTF-8 bytes) stored inline in a block
pub const MAX_SHORT_STRING_LEN: usize = 24;
/// Largest property key id a block header can hold
pub const MAX_KEY_ID: u32 = 0xFF_FFFF;

const PREV_SHIFT: u32 = 4;
const NEXT_SHIFT: u32 = 0;
const PAYLOAD_OFFSET: usize = 9;

const KEY_MASK: u64 = 0xFF_FFFF;
const TYPE_SHIFT: u32 = 24;
const TYPE_MASK: u64 = 0xF;
const INLINE_SHIFT: u32 = 28;
const SHORT_LEN_MASK: u64 = 0x3F;

/// Type tag of a property block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    /// Boolean, inline in the header
    Bool,
    /// 64-bit signed integer, one data word
    Int,
    /// 64-bit float, one data word
    Float,
    /// String of at most [`MAX_SHORT_STRING_LEN`] bytes packed into data words
    ShortString,
    /// Longer string held in the dynamic string store
    String,
}

impl PropertyType {
    fn tag(self) -> u64 {
        match self {
            PropertyType::Bool => 1,
            PropertyType::Int => 2,
            PropertyType::Float => 3,
            PropertyType::ShortString => 4,
            PropertyType::String => 5,
        }
    }

    fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            1 => Ok(PropertyType::Bool),
            2 => Ok(PropertyType::Int),
            3 => Ok(PropertyType::Float),
            4 => Ok(PropertyType::ShortString),
            5 => Ok(PropertyType::String),
            other => Err(Error::invalid_record(format!(
                "unknown property type tag {}",
                other
            ))),
        }
    }
}

/// A property value as seen by callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean value
    Bool(bool),
    /// 64-bit integer value
    Int(i64),
    /// 64-bit floating point value
    Float(f64),
    /// UTF-8 string value
    String(String),
}

impl PropertyValue {
    /// Whether encoding this value needs dynamic string records
    pub fn needs_dynamic_storage(&self) -> bool {
        matches!(self, PropertyValue::String(s) if s.len() > MAX_SHORT_STRING_LEN)
    }
}

/// Owner of a property chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyOwner {
    /// A node
    Node(u64),
    /// A relationship
    Relationship(u64),
    /// The graph itself
    Graph,
}

fn header(key_id: u32, kind: PropertyType, inline: u64) -> Result<u64> {
    if key_id > MAX_KEY_ID {
        return Err(Error::property(format!(
            "property key {} does not fit in 24 bits",
            key_id
        )));
    }
    Ok(key_id as u64 | (kind.tag() << TYPE_SHIFT) | (inline << INLINE_SHIFT))
}

fn words_for(header: u64) -> Result<usize> {
    let kind = PropertyType::from_tag((header >> TYPE_SHIFT) & TYPE_MASK)?;
    Ok(match kind {
        PropertyType::Bool => 1,
        PropertyType::Int | PropertyType::Float | PropertyType::String => 2,
        PropertyType::ShortString => {
            let len = ((header >> INLINE_SHIFT) & SHORT_LEN_MASK) as usize;
            if len > MAX_SHORT_STRING_LEN {
                return Err(Error::invalid_record(format!(
                    "short string block declares {} bytes",
                    len
                )));
            }
            1 + len.div_ceil(8)
        }
    })
}

/// One property inside a property record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyBlock {
    /// Header word followed by data words, exactly as stored
    pub words: Vec<u64>,
    /// Dynamic records of a long string value; empty when the block was
    /// loaded without them
    #[serde(default)]
    pub value_records: Vec<DynamicRecord>,
}

impl PropertyBlock {
    /// Encode a value that fits entirely inside the block
    pub fn inline(key_id: u32, value: &PropertyValue) -> Result<Self> {
        let words = match value {
            PropertyValue::Bool(b) => vec![header(key_id, PropertyType::Bool, *b as u64)?],
            PropertyValue::Int(i) => vec![header(key_id, PropertyType::Int, 0)?, *i as u64],
            PropertyValue::Float(f) => {
                vec![header(key_id, PropertyType::Float, 0)?, f.to_bits()]
            }
            PropertyValue::String(s) if s.len() <= MAX_SHORT_STRING_LEN => {
                let bytes = s.as_bytes();
                let mut words = vec![header(key_id, PropertyType::ShortString, bytes.len() as u64)?];
                for chunk in bytes.chunks(8) {
                    let mut raw = [0u8; 8];
                    raw[..chunk.len()].copy_from_slice(chunk);
                    words.push(u64::from_le_bytes(raw));
                }
                words
            }
            PropertyValue::String(s) => {
                return Err(Error::property(format!(
                    "string of {} bytes needs dynamic storage",
                    s.len()
                )));
            }
        };
        Ok(Self {
            words,
            value_records: Vec::new(),
        })
    }

    /// A long string block pointing at its first dynamic record
    pub fn string_ref(key_id: u32, value_records: Vec<DynamicRecord>) -> Result<Self> {
        let first = value_records.first().map(|r| r.id).unwrap_or(NO_ID);
        Ok(Self {
            words: vec![header(key_id, PropertyType::String, 0)?, first],
            value_records,
        })
    }

    /// Property key id
    pub fn key_id(&self) -> u32 {
        (self.words[0] & KEY_MASK) as u32
    }

    /// Type tag of the stored value
    pub fn property_type(&self) -> Result<PropertyType> {
        PropertyType::from_tag((self.words[0] >> TYPE_SHIFT) & TYPE_MASK)
    }

    /// Bytes this block occupies in a record payload
    pub fn size(&self) -> usize {
        self.words.len() * 8
    }

    /// First dynamic record of a long string value
    pub fn string_record_id(&self) -> Option<u64> {
        match self.property_type() {
            Ok(PropertyType::String) => self.words.get(1).copied(),
            _ => None,
        }
    }

    /// Decode the value when it is stored inline; `None` for long strings
    pub fn inline_value(&self) -> Result<Option<PropertyValue>> {
        let header = self.words[0];
        let value = match self.property_type()? {
            PropertyType::Bool => PropertyValue::Bool((header >> INLINE_SHIFT) & 1 == 1),
            PropertyType::Int => PropertyValue::Int(self.data_word(1)? as i64),
            PropertyType::Float => PropertyValue::Float(f64::from_bits(self.data_word(1)?)),
            PropertyType::ShortString => {
                let len = ((header >> INLINE_SHIFT) & SHORT_LEN_MASK) as usize;
                let mut bytes = Vec::with_capacity(len);
                for word in &self.words[1..] {
                    bytes.extend_from_slice(&word.to_le_bytes());
                }
                bytes.truncate(len);
                let s = String::from_utf8(bytes).map_err(|e| {
                    Error::property(format!("short string is not UTF-8: {}", e))
                })?;
                PropertyValue::String(s)
            }
            PropertyType::String => return Ok(None),
        };
        Ok(Some(value))
    }

    fn data_word(&self, index: usize) -> Result<u64> {
        self.words.get(index).copied().ok_or_else(|| {
            Error::invalid_record(format!("property block for key {} is truncated", self.key_id()))
        })
    }
}

/// A record of the property chain of one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    /// Record id
    pub id: u64,
    /// Whether the record is live; persisted implicitly through the blocks
    pub in_use: bool,
    /// Previous record of the owner's chain
    pub prev_property_id: u64,
    /// Next record of the owner's chain
    pub next_property_id: u64,
    /// Packed blocks, in payload order
    pub blocks: Vec<PropertyBlock>,
    /// Value records retired by this transaction, written as not in use on commit
    #[serde(default)]
    pub deleted_value_records: Vec<DynamicRecord>,
    /// Owner of the chain, known while staged in a transaction
    #[serde(default)]
    pub owner: Option<PropertyOwner>,
    /// Created by the transaction currently staging it
    #[serde(default)]
    pub created: bool,
}

impl PropertyRecord {
    /// A fresh, empty, in-use record
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            prev_property_id: NO_ID,
            next_property_id: NO_ID,
            blocks: Vec::new(),
            deleted_value_records: Vec::new(),
            owner: None,
            created: false,
        }
    }

    /// Payload bytes in use
    pub fn size(&self) -> usize {
        self.blocks.iter().map(PropertyBlock::size).sum()
    }

    /// No blocks left
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether `block` fits next to the existing blocks
    pub fn has_room_for(&self, block: &PropertyBlock) -> bool {
        self.size() + block.size() <= PAYLOAD_SIZE
    }

    /// Append a block
    pub fn add_block(&mut self, block: PropertyBlock) -> Result<()> {
        if !self.has_room_for(&block) {
            return Err(Error::property(format!(
                "Property[{}] has no room for a {} byte block",
                self.id,
                block.size()
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Block for `key_id`
    pub fn block(&self, key_id: u32) -> Option<&PropertyBlock> {
        self.blocks.iter().find(|b| b.key_id() == key_id)
    }

    /// Mutable block for `key_id`
    pub fn block_mut(&mut self, key_id: u32) -> Option<&mut PropertyBlock> {
        self.blocks.iter_mut().find(|b| b.key_id() == key_id)
    }

    /// Remove and return the block for `key_id`
    pub fn remove_block(&mut self, key_id: u32) -> Option<PropertyBlock> {
        let index = self.blocks.iter().position(|b| b.key_id() == key_id)?;
        Some(self.blocks.remove(index))
    }
}

impl Record for PropertyRecord {
    const RECORD_SIZE: usize = PAYLOAD_OFFSET + PAYLOAD_SIZE;
    const TYPE_NAME: &'static str = "Property";

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
        if self.blocks.is_empty() {
            return Err(Error::invalid_record(format!(
                "Property[{}] is in use but holds no blocks",
                self.id
            )));
        }
        if self.size() > PAYLOAD_SIZE {
            return Err(Error::invalid_record(format!(
                "Property[{}] payload of {} bytes exceeds {}",
                self.id,
                self.size(),
                PAYLOAD_SIZE
            )));
        }
        let (prev_low, prev_high) =
            bits::split(self.prev_property_id, HighBits::Four, "property prev")?;
        let (next_low, next_high) =
            bits::split(self.next_property_id, HighBits::Four, "property next")?;
        buf[0] = (bits::pack(prev_high, PREV_SHIFT) | bits::pack(next_high, NEXT_SHIFT)) as u8;
        bits::write_u32(buf, 1, prev_low);
        bits::write_u32(buf, 5, next_low);

        let mut offset = PAYLOAD_OFFSET;
        for word in self.blocks.iter().flat_map(|b| b.words.iter()) {
            bits::write_u64(buf, offset, *word);
            offset += 8;
        }
        Ok(())
    }

    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>> {
        let mut words = [0u64; PAYLOAD_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = bits::read_u64(buf, PAYLOAD_OFFSET + i * 8);
        }
        if words[0] == 0 {
            return Ok(None);
        }

        let mut blocks = Vec::new();
        let mut i = 0;
        while i < PAYLOAD_WORDS && words[i] != 0 {
            let count = words_for(words[i])?;
            if i + count > PAYLOAD_WORDS {
                return Err(Error::invalid_record(format!(
                    "Property[{}] block at word {} overruns the payload",
                    id, i
                )));
            }
            blocks.push(PropertyBlock {
                words: words[i..i + count].to_vec(),
                value_records: Vec::new(),
            });
            i += count;
        }

        let header = buf[0] as u32;
        Ok(Some(Self {
            id,
            in_use: true,
            prev_property_id: bits::join(
                bits::read_u32(buf, 1),
                bits::unpack(header, PREV_SHIFT, HighBits::Four),
            ),
            next_property_id: bits::join(
                bits::read_u32(buf, 5),
                bits::unpack(header, NEXT_SHIFT, HighBits::Four),
            ),
            blocks,
            deleted_value_records: Vec::new(),
            owner: None,
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
