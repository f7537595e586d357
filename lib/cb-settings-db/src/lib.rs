// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The EEPROM-backed settings database.
//!
//! A small record at the head of the EEPROM's RW region, gated by a magic
//! word and version so firmware can tell "initialized" from "blank/corrupt"
//! memory. Elements also live outside the EEPROM proper — `MAC_ADDRESS` in
//! the EUI-ROM, `SERIAL_NUMBER` in the SN-ROM — both read-only and never
//! defaulted by this crate.
//!
//! This module talks to hardware only through [`cb_device_registry::BlockingI2c`];
//! it has no event-kernel dependency of its own; an event-based facade
//! belongs to whatever AO a future comm/menu layer posts to (out of scope
//! here).

#![no_std]

use cb_device_registry::{BlockingI2c, DeviceId};
use cb_error::CbError;

/// Fixed 32-bit constant marking an initialized EEPROM record.
pub const MAGIC_WORD: u32 = 0xdefe_c8db;
pub const CURRENT_VERSION: u16 = 0x0001;

/// Default IP address baked into firmware: `169.254.2.3`.
pub const DEFAULT_IP_ADDRESS: [u8; 4] = [169, 254, 2, 3];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Element {
    MagicWord,
    Version,
    MacAddress,
    IpAddress,
    SerialNumber,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StorageKind {
    MainEepromRw,
    SnRom,
    EuiRom,
}

struct ElementRow {
    element: Element,
    storage: StorageKind,
    offset: u16,
    size: usize,
}

/// Layout within the EEPROM's RW region: `[0..3] magic, [4..5] version,
/// [6..9] IP address` (all little-endian).
const EEPROM_MAGIC_OFFSET: u16 = 0;
const EEPROM_VERSION_OFFSET: u16 = 4;
const EEPROM_IP_OFFSET: u16 = 6;

const TABLE: [ElementRow; 5] = [
    ElementRow { element: Element::MagicWord, storage: StorageKind::MainEepromRw, offset: EEPROM_MAGIC_OFFSET, size: 4 },
    ElementRow { element: Element::Version, storage: StorageKind::MainEepromRw, offset: EEPROM_VERSION_OFFSET, size: 2 },
    ElementRow { element: Element::IpAddress, storage: StorageKind::MainEepromRw, offset: EEPROM_IP_OFFSET, size: 4 },
    ElementRow { element: Element::MacAddress, storage: StorageKind::EuiRom, offset: cb_device_registry::EUI_MAC_OFFSET, size: cb_device_registry::EUI_MAC_LEN },
    // The SN-ROM region starts at the device's min_offset; the serial
    // number occupies the whole 16-byte region.
    ElementRow { element: Element::SerialNumber, storage: StorageKind::SnRom, offset: cb_device_registry::config(DeviceId::SnRom).min_offset, size: 16 },
];

fn row(element: Element) -> &'static ElementRow {
    TABLE.iter().find(|r| r.element == element).expect("Element is a closed enum; every variant has a row")
}

fn device_for(storage: StorageKind) -> DeviceId {
    match storage {
        StorageKind::MainEepromRw => DeviceId::Eeprom,
        StorageKind::SnRom => DeviceId::SnRom,
        StorageKind::EuiRom => DeviceId::EuiRom,
    }
}

fn is_read_only(storage: StorageKind) -> bool {
    !matches!(storage, StorageKind::MainEepromRw)
}

pub struct SettingsDb<'a> {
    i2c: &'a dyn BlockingI2c,
}

impl<'a> SettingsDb<'a> {
    pub const fn new(i2c: &'a dyn BlockingI2c) -> Self {
        Self { i2c }
    }

    /// Read `MAGIC_WORD` and `VERSION` from EEPROM and classify the result.
    pub fn is_valid(&self) -> Result<(), CbError> {
        let mut magic_buf = [0u8; 4];
        self.i2c.blocking_read(DeviceId::Eeprom, EEPROM_MAGIC_OFFSET, &mut magic_buf)?;
        let magic = u32::from_le_bytes(magic_buf);
        if magic != MAGIC_WORD {
            return Err(CbError::NotInit);
        }
        let mut ver_buf = [0u8; 2];
        self.i2c.blocking_read(DeviceId::Eeprom, EEPROM_VERSION_OFFSET, &mut ver_buf)?;
        let version = u16::from_le_bytes(ver_buf);
        if version != CURRENT_VERSION {
            return Err(CbError::VerMismatch);
        }
        Ok(())
    }

    /// Write the compiled-in default record to the EEPROM's RW region.
    /// Never touches the read-only ROM regions backing `MAC_ADDRESS` /
    /// `SERIAL_NUMBER`, which are programmed at manufacturing time.
    pub fn init_to_default(&self) -> Result<(), CbError> {
        self.i2c.blocking_write(DeviceId::Eeprom, EEPROM_MAGIC_OFFSET, &MAGIC_WORD.to_le_bytes())?;
        self.i2c.blocking_write(DeviceId::Eeprom, EEPROM_VERSION_OFFSET, &CURRENT_VERSION.to_le_bytes())?;
        self.i2c.blocking_write(DeviceId::Eeprom, EEPROM_IP_OFFSET, &DEFAULT_IP_ADDRESS)?;
        Ok(())
    }

    /// Read `element` into `buf`. Reads of read-only regions bypass the
    /// magic-word/version validation `is_valid` performs (it would never
    /// apply to them); `buf`'s length must match the element's compiled
    /// size exactly.
    pub fn get_element(&self, element: Element, buf: &mut [u8]) -> Result<(), CbError> {
        let r = row(element);
        if buf.len() != r.size {
            return Err(CbError::BufferLen);
        }
        self.i2c.blocking_read(device_for(r.storage), r.offset, buf)
    }

    /// Write `buf` into `element`. Refuses to touch a read-only region.
    pub fn set_element(&self, element: Element, buf: &[u8]) -> Result<(), CbError> {
        let r = row(element);
        if is_read_only(r.storage) {
            return Err(CbError::IsReadOnly);
        }
        if buf.len() != r.size {
            return Err(CbError::BufferLen);
        }
        self.i2c.blocking_write(device_for(r.storage), r.offset, buf)
    }
}
