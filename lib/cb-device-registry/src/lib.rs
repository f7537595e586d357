// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The compile-time logical-device table and the blocking I2C trait shared
//! by the settings DB and the device manager's pre-scheduler blocking
//! fallback path.
//!
//! Every device this board exposes — the EEPROM, serial-number ROM, and
//! EUI-64 ROM — is a row in `REGISTRY`, keyed by `DeviceId`. Lookups are
//! total: every `DeviceId` variant has an entry, so a lookup can never fail
//! at runtime; an out-of-range id is impossible to construct since
//! `DeviceId` is a closed enum, not a raw index.

#![no_std]

use cb_error::CbError;

pub type Signal = u16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusId {
    /// Carries the EEPROM and both ROMs in this rewrite. The board's second
    /// physical I2C bus has no devices in any of this crate's scenarios, so
    /// it is represented only as a second, deviceless
    /// `I2cBusManager`/`I2cDeviceManager` pair at the task-composition
    /// layer — see DESIGN.md.
    Bus0,
    Bus1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemAddrWidth {
    One,
    Two,
}

impl MemAddrWidth {
    pub const fn bytes(self) -> u8 {
        match self {
            MemAddrWidth::One => 1,
            MemAddrWidth::Two => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceId {
    Eeprom,
    SnRom,
    EuiRom,
}

impl DeviceId {
    /// Wire-stable numeric id, for event payloads that cross a crate
    /// boundary and so cannot carry the enum itself.
    pub const fn as_u8(self) -> u8 {
        match self {
            DeviceId::Eeprom => 0,
            DeviceId::SnRom => 1,
            DeviceId::EuiRom => 2,
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DeviceId::Eeprom),
            1 => Some(DeviceId::SnRom),
            2 => Some(DeviceId::EuiRom),
            _ => None,
        }
    }
}

pub const NUM_DEVICES: usize = 3;

#[derive(Clone, Copy, Debug)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub bus: BusId,
    pub device_addr_width: u8,
    pub device_addr: u8,
    pub mem_addr_width: MemAddrWidth,
    pub min_offset: u16,
    pub max_offset: u16,
    pub page_size: u16,
    pub read_only: bool,
}

/// On-the-wire device layout: EEPROM at 0xA0, 1-byte memory address width,
/// 16-byte pages, `[0x00..0xFF]`; SN-ROM and EUI-ROM share device address
/// 0xB0 but occupy disjoint memory ranges within it.
pub const REGISTRY: [DeviceConfig; NUM_DEVICES] = [
    DeviceConfig {
        id: DeviceId::Eeprom,
        bus: BusId::Bus0,
        device_addr_width: 1,
        device_addr: 0xA0,
        mem_addr_width: MemAddrWidth::One,
        min_offset: 0x00,
        max_offset: 0xFF,
        page_size: 16,
        read_only: false,
    },
    DeviceConfig {
        id: DeviceId::SnRom,
        bus: BusId::Bus0,
        device_addr_width: 1,
        device_addr: 0xB0,
        mem_addr_width: MemAddrWidth::One,
        min_offset: 0x80,
        max_offset: 0x8F,
        page_size: 16,
        read_only: true,
    },
    DeviceConfig {
        id: DeviceId::EuiRom,
        bus: BusId::Bus0,
        device_addr_width: 1,
        device_addr: 0xB0,
        mem_addr_width: MemAddrWidth::One,
        min_offset: 0x98,
        max_offset: 0x9F,
        page_size: 8,
        read_only: true,
    },
];

/// Byte offset of the MAC-address field within the EUI-ROM region: the
/// region starts at `0x98`, the MAC occupies `[0x9A..0x9F]` — the first two
/// bytes of the region are skipped.
pub const EUI_MAC_OFFSET: u16 = 0x9A;
pub const EUI_MAC_LEN: usize = 6;

static_assertions::const_assert!(REGISTRY[0].min_offset <= REGISTRY[0].max_offset);
static_assertions::const_assert!(REGISTRY[1].min_offset <= REGISTRY[1].max_offset);
static_assertions::const_assert!(REGISTRY[2].min_offset <= REGISTRY[2].max_offset);
static_assertions::const_assert!(!REGISTRY[0].read_only && REGISTRY[0].page_size > 0);
static_assertions::const_assert!(REGISTRY[1].read_only);
static_assertions::const_assert!(REGISTRY[2].read_only);
static_assertions::const_assert!(EUI_MAC_OFFSET >= REGISTRY[2].min_offset && EUI_MAC_OFFSET + EUI_MAC_LEN as u16 - 1 <= REGISTRY[2].max_offset);

/// Total lookup: every `DeviceId` has a row.
pub const fn config(id: DeviceId) -> &'static DeviceConfig {
    match id {
        DeviceId::Eeprom => &REGISTRY[0],
        DeviceId::SnRom => &REGISTRY[1],
        DeviceId::EuiRom => &REGISTRY[2],
    }
}

/// Validate an `(offset, length)` access against a device's bounds.
///
/// Out of bounds when `o < min_offset` or `o + n > max_offset + 1`.
pub fn validate_bounds(cfg: &DeviceConfig, offset: u16, len: u16) -> Result<(), CbError> {
    if offset < cfg.min_offset {
        return Err(CbError::MemOutOfBounds);
    }
    // Widen to u32 so `max_offset + 1` can never overflow, even when
    // max_offset is u16::MAX.
    let end = offset as u32 + len as u32;
    if end > cfg.max_offset as u32 + 1 {
        return Err(CbError::MemOutOfBounds);
    }
    Ok(())
}

pub fn validate_writable(cfg: &DeviceConfig) -> Result<(), CbError> {
    if cfg.read_only {
        Err(CbError::IsReadOnly)
    } else {
        Ok(())
    }
}

/// A single `(offset, length)` chunk of a larger transfer, used both to
/// describe one bus-primitive `WRITE_MEM` issue and, in tests, to assert
/// that a page split partitions its input with no gap or overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageChunk {
    pub offset: u16,
    pub len: u16,
}

/// Split a `[offset, offset+total)` write into page-aligned chunks.
/// Returned chunks partition the input range exactly: no gap, no overlap,
/// each chunk no larger than one page and never crossing a page boundary.
pub fn split_into_pages(offset: u16, total: u16, page_size: u16) -> heapless::Vec<PageChunk, 32> {
    let mut chunks = heapless::Vec::new();
    if total == 0 {
        return chunks;
    }
    let mut remaining = total;
    let mut cur = offset;
    let first_page_bytes = core::cmp::min(remaining, page_size - (cur % page_size));
    chunks.push(PageChunk { offset: cur, len: first_page_bytes }).ok();
    cur += first_page_bytes;
    remaining -= first_page_bytes;
    while remaining > 0 {
        let len = core::cmp::min(remaining, page_size);
        chunks.push(PageChunk { offset: cur, len }).ok();
        cur += len;
        remaining -= len;
    }
    chunks
}

/// Abstraction over the synchronous, pre-scheduler / post-crash I2C path,
/// shared by the settings DB and anything else that needs device access
/// before the active-object kernel is running. Implemented by
/// `cb-i2c-device`'s blocking module; this crate
/// only defines the seam so the settings DB need not depend on the device
/// manager crate.
pub trait BlockingI2c {
    fn blocking_read(&self, device: DeviceId, offset: u16, buf: &mut [u8]) -> Result<(), CbError>;
    fn blocking_write(&self, device: DeviceId, offset: u16, data: &[u8]) -> Result<(), CbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_total() {
        assert_eq!(config(DeviceId::Eeprom).device_addr, 0xA0);
        assert_eq!(config(DeviceId::SnRom).device_addr, 0xB0);
        assert_eq!(config(DeviceId::EuiRom).device_addr, 0xB0);
    }

    #[test]
    fn bounds_reject_reads_past_max_offset_plus_one() {
        let sn = config(DeviceId::SnRom);
        assert!(validate_bounds(sn, 0x80, 16).is_ok()); // exactly [0x80, 0x90)
        assert!(validate_bounds(sn, 0x90, 1).is_err()); // one byte past the end
        assert!(validate_bounds(sn, 0x7F, 1).is_err()); // below min_offset
    }

    #[test]
    fn write_split_partitions_with_no_gap_or_overlap() {
        // Scenario 3: write 32 bytes to EEPROM starting at 0x0A, page = 16.
        let chunks = split_into_pages(0x0A, 32, 16);
        assert_eq!(
            chunks.as_slice(),
            &[
                PageChunk { offset: 0x0A, len: 6 },
                PageChunk { offset: 0x10, len: 16 },
                PageChunk { offset: 0x20, len: 10 },
            ]
        );
        // No gap/overlap: each chunk starts where the previous ended.
        let mut cursor = 0x0A;
        for c in chunks.iter() {
            assert_eq!(c.offset, cursor);
            cursor += c.len;
        }
        assert_eq!(cursor, 0x0A + 32);
    }

    #[test]
    fn single_page_write_is_not_split() {
        let chunks = split_into_pages(0x00, 10, 16);
        assert_eq!(chunks.as_slice(), &[PageChunk { offset: 0x00, len: 10 }]);
    }

    #[test]
    fn write_only_ro_device_is_rejected_before_touching_bounds() {
        assert!(validate_writable(config(DeviceId::SnRom)).is_err());
        assert!(validate_writable(config(DeviceId::Eeprom)).is_ok());
    }
}
