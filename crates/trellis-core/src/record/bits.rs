//! Pack/unpack helpers for ids split across a 32-bit low field and a few
//! high bits stored elsewhere in the record.
//!
//! The "no record" marker is stored as low field `0xFFFF_FFFF` with all high
//! bits zero. Any other combination is a real value, so the allocator must
//! never hand out `0xFFFF_FFFF` itself.

use crate::{Error, Result};

/// Logical "no record" marker used by every pointer field
pub const NO_ID: u64 = u64::MAX;

/// Low-field encoding of [`NO_ID`]
pub const LOW_NONE: u32 = u32::MAX;

/// The only id whose encoding would collide with [`NO_ID`]
pub const RESERVED_ID: u64 = 0xFFFF_FFFF;

/// Number of high bits available for an id field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighBits {
    /// 35-bit ids (node, relationship and group pointers)
    Three,
    /// 36-bit ids (property and dynamic record pointers)
    Four,
}

impl HighBits {
    /// Mask applied to the high bits once shifted down to bit 0
    pub const fn mask(self) -> u32 {
        match self {
            HighBits::Three => 0x7,
            HighBits::Four => 0xF,
        }
    }

    /// Largest id representable with these high bits
    pub const fn max_id(self) -> u64 {
        match self {
            HighBits::Three => (1 << 35) - 1,
            HighBits::Four => (1 << 36) - 1,
        }
    }
}

/// Split an id into its low field and high bits, failing when it is too wide.
pub fn split(id: u64, width: HighBits, field: &str) -> Result<(u32, u32)> {
    if id == NO_ID {
        return Ok((LOW_NONE, 0));
    }
    if id > width.max_id() {
        return Err(Error::invalid_record(format!(
            "{} value {} does not fit in {} bits",
            field,
            id,
            width.max_id().count_ones()
        )));
    }
    Ok((id as u32, (id >> 32) as u32))
}

/// Rebuild an id from its low field and high bits.
pub fn join(low: u32, high: u32) -> u64 {
    if low == LOW_NONE && high == 0 {
        NO_ID
    } else {
        ((high as u64) << 32) | low as u64
    }
}

/// Place `high` at `shift` inside a packed header value.
pub fn pack(high: u32, shift: u32) -> u32 {
    high << shift
}

/// Extract the high bits stored at `shift` inside a packed header value.
pub fn unpack(packed: u32, shift: u32, width: HighBits) -> u32 {
    (packed >> shift) & width.mask()
}

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(crate) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

pub(crate) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

pub(crate) fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
