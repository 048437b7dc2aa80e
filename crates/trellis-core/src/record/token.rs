//! Token record (5 bytes): relationship types and property keys
//!
//! ```text
//! [0]     bit0 in use | bits4-7 name high
//! [1..5]  name low (first dynamic record of the name)
//! ```

use super::bits::{self, HighBits, NO_ID};
use super::dynamic::DynamicRecord;
use super::Record;
use crate::Result;
use serde::{Deserialize, Serialize};

const IN_USE: u32 = 0x1;
const NAME_SHIFT: u32 = 4;

/// A named token, its name stored in the owning token store's name records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Token id
    pub id: u64,
    /// Whether the record is live
    pub in_use: bool,
    /// First dynamic record of the name
    pub name_id: u64,
    /// Name records staged alongside the token (empty when loaded light)
    #[serde(default)]
    pub name_records: Vec<DynamicRecord>,
    /// Created by the transaction currently staging it
    #[serde(default)]
    pub created: bool,
}

impl TokenRecord {
    /// A fresh in-use token with no name yet
    pub fn new(id: u64) -> Self {
        Self {
            id,
            in_use: true,
            name_id: NO_ID,
            name_records: Vec::new(),
            created: false,
        }
    }
}

impl Record for TokenRecord {
    const RECORD_SIZE: usize = 5;
    const TYPE_NAME: &'static str = "Token";

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
        let (low, high) = bits::split(self.name_id, HighBits::Four, "token name")?;
        buf[0] = (IN_USE | bits::pack(high, NAME_SHIFT)) as u8;
        bits::write_u32(buf, 1, low);
        Ok(())
    }

    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>> {
        let header = buf[0] as u32;
        if header & IN_USE == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            id,
            in_use: true,
            name_id: bits::join(
                bits::read_u32(buf, 1),
                bits::unpack(header, NAME_SHIFT, HighBits::Four),
            ),
            name_records: Vec::new(),
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
