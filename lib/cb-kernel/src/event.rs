// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The universal event type and its payload variants.

use cb_error::CbError;

use crate::signal::Signal;

/// Largest raw byte payload any event on this board needs to carry.
///
/// Sized to the largest single I2C transaction this board performs (one
/// EEPROM page, 16 bytes, plus a few bytes of header room), with headroom
/// to 32 bytes. The original firmware's comm-stack message buffer is
/// variously specified as 300 or 512 bytes in different headers; since the
/// comm stack itself is out of scope here, this crate does not inherit
/// either number.
pub const MAX_RAW_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
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
pub enum AccessMode {
    Byte,
    Dma,
}

/// A fixed-capacity byte buffer carried inline in an event payload.
#[derive(Clone, Copy, Debug)]
pub struct RawBuf {
    buf: [u8; MAX_RAW_BYTES],
    len: u8,
}

impl RawBuf {
    pub const fn empty() -> Self {
        Self { buf: [0; MAX_RAW_BYTES], len: 0 }
    }

    pub fn from_slice(data: &[u8]) -> Option<Self> {
        if data.len() > MAX_RAW_BYTES {
            return None;
        }
        let mut buf = [0u8; MAX_RAW_BYTES];
        buf[..data.len()].copy_from_slice(data);
        Some(Self { buf, len: data.len() as u8 })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for RawBuf {
    fn default() -> Self {
        Self::empty()
    }
}

/// Every payload shape an event on this board can carry.
///
/// This is a closed, statically-sized tagged union rather than a dynamically
/// sized or boxed payload: every variant is `Copy`, so an event can be
/// handed to more than one subscriber's mailbox without shared mutable
/// state, which is what lets [`crate::pool::EventPool`] track "number of
/// outstanding holders" as a plain reference count instead of needing to
/// arbitrate writers.
#[derive(Clone, Copy, Debug)]
pub enum Payload {
    Empty,
    Status(CbError),
    Raw(RawBuf),
    /// Addressing phase of an I2C bus primitive: which device, which
    /// direction.
    I2cAddr {
        bus: u8,
        device_addr: u8,
        addr_width: MemAddrWidth,
        direction: Direction,
    },
    /// A memory-offset or byte-count carrying bus primitive
    /// (`SEND_DEV_ADDR`, `READ_MEM`, `WRITE_MEM`). `addr_width` only matters
    /// to `SEND_DEV_ADDR`; `READ_MEM`/`WRITE_MEM` ignore it since the memory
    /// address was already shifted out by the time those primitives run.
    I2cMemReq {
        bus: u8,
        offset: u16,
        addr_width: MemAddrWidth,
        len: u8,
        access: AccessMode,
        data: RawBuf,
    },
    /// `BUS_DONE` payload.
    I2cBusDone {
        status: CbError,
        data: RawBuf,
    },
    /// A high-level device-manager request.
    DeviceMemReq {
        device: u8,
        offset: u16,
        len: u8,
        data: RawBuf,
    },
    /// `DEV_READ_DONE` payload.
    DeviceReadDone {
        status: CbError,
        data: RawBuf,
    },
    /// `DEV_WRITE_DONE` payload.
    DeviceWriteDone {
        status: CbError,
        len: u8,
    },
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Empty
    }
}

/// A message in flight between active objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct Event {
    pub signal: Signal,
    pub payload: Payload,
}

impl Event {
    pub const fn new(signal: Signal, payload: Payload) -> Self {
        Self { signal, payload }
    }

    pub const fn status(signal: Signal, status: CbError) -> Self {
        Self::new(signal, Payload::Status(status))
    }
}
