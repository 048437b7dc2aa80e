//! Dynamic (overflow) record (128 bytes)
//!
//! Long string values and token names are split into a forward-linked chain
//! of these records.
//!
//! ```text
//! [0]       bit0 in use | bits4-7 next_block high
//! [1..5]    next_block low
//! [5..7]    data length
//! [7..128]  data
//! ```

use super::bits::{self, HighBits, NO_ID};
use super::Record;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const IN_USE: u32 = 0x1;
const NEXT_SHIFT: u32 = 4;
const HEADER_SIZE: usize = 7;

/// Bytes of payload one dynamic record carries
pub const DYNAMIC_DATA_SIZE: usize = 128 - HEADER_SIZE;

/// One link of an overflow chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRecord {
    /// Record id
    pub id: u64,
    /// Whether the record is live
    pub in_use: bool,
    /// Next record of the chain
    pub next_block: u64,
    /// Payload bytes, at most [`DYNAMIC_DATA_SIZE`]
    pub data: Vec<u8>,
    /// Created by the transaction currently staging it
    #[serde(default)]
    pub created: bool,
}

impl DynamicRecord {
    /// A fresh in-use record holding `data`
    pub fn new(id: u64, data: Vec<u8>) -> Self {
        Self {
            id,
            in_use: true,
            next_block: NO_ID,
            data,
            created: false,
        }
    }
}

impl Record for DynamicRecord {
    const RECORD_SIZE: usize = 128;
    const TYPE_NAME: &'static str = "Dynamic";

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
        if self.data.len() > DYNAMIC_DATA_SIZE {
            return Err(Error::invalid_record(format!(
                "Dynamic[{}] carries {} bytes, at most {} fit",
                self.id,
                self.data.len(),
                DYNAMIC_DATA_SIZE
            )));
        }
        let (next_low, next_high) = bits::split(self.next_block, HighBits::Four, "dynamic next")?;
        buf[0] = (IN_USE | bits::pack(next_high, NEXT_SHIFT)) as u8;
        bits::write_u32(buf, 1, next_low);
        bits::write_u16(buf, 5, self.data.len() as u16);
        buf[HEADER_SIZE..HEADER_SIZE + self.data.len()].copy_from_slice(&self.data);
        Ok(())
    }

    fn decode(id: u64, buf: &[u8]) -> Result<Option<Self>> {
        let header = buf[0] as u32;
        if header & IN_USE == 0 {
            return Ok(None);
        }
        let len = bits::read_u16(buf, 5) as usize;
        if len > DYNAMIC_DATA_SIZE {
            return Err(Error::invalid_record(format!(
                "Dynamic[{}] declares {} bytes of data",
                id, len
            )));
        }
        Ok(Some(Self {
            id,
            in_use: true,
            next_block: bits::join(
                bits::read_u32(buf, 1),
                bits::unpack(header, NEXT_SHIFT, HighBits::Four),
            ),
            data: buf[HEADER_SIZE..HEADER_SIZE + len].to_vec(),
            created: false,
        }))
    }

    fn not_in_use(id: u64) -> Self {
        Self {
            in_use: false,
            ..Self::new(id, Vec::new())
        }
    }
}
