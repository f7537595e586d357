// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The closed error taxonomy shared by every subsystem on the coupler board.
//!
//! Every code is a 32-bit value whose upper 16 bits identify a category and
//! whose lower 16 bits identify a specific condition within that category.
//! The category/code split lets a completion event carry a single `u32`
//! while still being legible against the reference table field engineers
//! already use for this board.

#![no_std]

use num_derive::FromPrimitive;

const fn code(category: u32, specific: u32) -> u32 {
    (category << 16) | specific
}

const CAT_HW: u32 = 0x0000;
const CAT_MEMORY: u32 = 0x0001;
const CAT_COMM: u32 = 0x0004;
const CAT_I2C_BUS: u32 = 0x0006;
const CAT_I2C_DEV: u32 = 0x0007;
const CAT_SETTINGS_DB: u32 = 0x0008;

/// A closed set of error conditions this firmware can report.
///
/// `#[repr(u32)]` values match the category/code layout above so that
/// `CbError as u32` is the wire-compatible status carried in completion
/// events; `FromPrimitive` lets the reverse conversion be attempted where a
/// status arrives as a raw `u32` (e.g. from a settings-DB record written by
/// an older firmware revision).
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum CbError {
    None = 0,

    // HW / reset category. Reset-cause detection itself is board bring-up
    // and out of scope for this crate; these variants exist so a status
    // logged here stays diagnosable against the same reference table.
    SerialHwTimeout = code(CAT_HW, 1),
    SerialMsgTooLong = code(CAT_HW, 2),
    SerialMsgBase64EncFailed = code(CAT_HW, 3),
    Stm32HwCryptoFailed = code(CAT_HW, 4),
    LowPowerReset = code(CAT_HW, 5),
    WindowWatchdogReset = code(CAT_HW, 6),
    IndependentWatchdogReset = code(CAT_HW, 7),
    SoftwareReset = code(CAT_HW, 8),
    PorPdrReset = code(CAT_HW, 9),
    PinReset = code(CAT_HW, 10),
    BorReset = code(CAT_HW, 11),

    NullValue = code(CAT_MEMORY, 0),
    BufferLen = code(CAT_MEMORY, 1),

    UnknownMsgSource = code(CAT_COMM, 0),
    InvalidMsgLen = code(CAT_COMM, 1),
    UnimplementedMsg = code(CAT_COMM, 2),

    Busy = code(CAT_I2C_BUS, 0),
    RcvrySdaStuckLow = code(CAT_I2C_BUS, 1),
    RcvryEv5NotRec = code(CAT_I2C_BUS, 2),
    RcvryEv6NotRec = code(CAT_I2C_BUS, 3),
    BusEv5Timeout = code(CAT_I2C_BUS, 4),
    BusEv5NotRec = code(CAT_I2C_BUS, 5),
    InvalidParamsFor7BitAddr = code(CAT_I2C_BUS, 6),
    InvalidParamsForSendData = code(CAT_I2C_BUS, 7),
    BusEv6Timeout = code(CAT_I2C_BUS, 8),
    BusEv6NotRec = code(CAT_I2C_BUS, 9),
    BusEv8Timeout = code(CAT_I2C_BUS, 10),
    BusEv8NotRec = code(CAT_I2C_BUS, 11),
    InvalidParamsForBusCheckFree = code(CAT_I2C_BUS, 12),
    RxneFlagTimeout = code(CAT_I2C_BUS, 13),
    StopBitTimeout = code(CAT_I2C_BUS, 14),
    WriteByteTimeout = code(CAT_I2C_BUS, 15),

    DevCheckBusTimeout = code(CAT_I2C_DEV, 0),
    DevEv5Timeout = code(CAT_I2C_DEV, 1),
    DevEv6Timeout = code(CAT_I2C_DEV, 2),
    DevEv8Timeout = code(CAT_I2C_DEV, 3),
    DevReadMemTimeout = code(CAT_I2C_DEV, 4),
    DevWriteMemTimeout = code(CAT_I2C_DEV, 5),
    DevReadRegTimeout = code(CAT_I2C_DEV, 6),
    DevWriteRegTimeout = code(CAT_I2C_DEV, 7),
    DevAckDisTimeout = code(CAT_I2C_DEV, 8),
    DevAckEnTimeout = code(CAT_I2C_DEV, 9),
    MemOutOfBounds = code(CAT_I2C_DEV, 10),
    // This rewrite's additions. The original header had no separate code
    // for read-only violations or the outer device watchdog; it either
    // reused `MemOutOfBounds`-adjacent codes loosely or never had to, since
    // the register-level IOExp path was unfinished. Keeping them distinct
    // here keeps completion-event status unambiguous.
    IsReadOnly = code(CAT_I2C_DEV, 11),
    InvalidDevice = code(CAT_I2C_DEV, 12),
    DevTimeout = code(CAT_I2C_DEV, 13),
    Unimplemented = code(CAT_I2C_DEV, 14),

    NotInit = code(CAT_SETTINGS_DB, 0),
    VerMismatch = code(CAT_SETTINGS_DB, 1),

    UnimplementedGlobal = 0xFFFF_FFFE,
    Unknown = 0xFFFF_FFFF,
}

impl CbError {
    /// The category this error belongs to (upper 16 bits of its code).
    pub const fn category(self) -> u32 {
        (self as u32) >> 16
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, CbError::None)
    }
}

impl Default for CbError {
    fn default() -> Self {
        CbError::None
    }
}

impl core::fmt::Display for CbError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            CbError::None => "no error",
            CbError::SerialHwTimeout => "serial hardware timeout",
            CbError::SerialMsgTooLong => "serial message too long",
            CbError::SerialMsgBase64EncFailed => "serial base64 encode failed",
            CbError::Stm32HwCryptoFailed => "hardware crypto failed",
            CbError::LowPowerReset => "low power reset",
            CbError::WindowWatchdogReset => "window watchdog reset",
            CbError::IndependentWatchdogReset => "independent watchdog reset",
            CbError::SoftwareReset => "software reset",
            CbError::PorPdrReset => "power-on/power-down reset",
            CbError::PinReset => "pin reset",
            CbError::BorReset => "brownout reset",
            CbError::NullValue => "null value",
            CbError::BufferLen => "buffer length mismatch",
            CbError::UnknownMsgSource => "unknown message source",
            CbError::InvalidMsgLen => "invalid message length",
            CbError::UnimplementedMsg => "unimplemented message",
            CbError::Busy => "bus busy",
            CbError::RcvrySdaStuckLow => "bus recovery: SDA stuck low",
            CbError::RcvryEv5NotRec => "bus recovery: EV5 not recognized",
            CbError::RcvryEv6NotRec => "bus recovery: EV6 not recognized",
            CbError::BusEv5Timeout => "bus EV5 timeout",
            CbError::BusEv5NotRec => "bus EV5 not recognized",
            CbError::InvalidParamsFor7BitAddr => "invalid params for 7-bit address",
            CbError::InvalidParamsForSendData => "invalid params for send data",
            CbError::BusEv6Timeout => "bus EV6 timeout",
            CbError::BusEv6NotRec => "bus EV6 not recognized",
            CbError::BusEv8Timeout => "bus EV8 timeout",
            CbError::BusEv8NotRec => "bus EV8 not recognized",
            CbError::InvalidParamsForBusCheckFree => "invalid params for bus-check-free",
            CbError::RxneFlagTimeout => "RXNE flag timeout",
            CbError::StopBitTimeout => "stop bit timeout",
            CbError::WriteByteTimeout => "write byte timeout",
            CbError::DevCheckBusTimeout => "device: check-bus timeout",
            CbError::DevEv5Timeout => "device: EV5 timeout",
            CbError::DevEv6Timeout => "device: EV6 timeout",
            CbError::DevEv8Timeout => "device: EV8 timeout",
            CbError::DevReadMemTimeout => "device: read-memory timeout",
            CbError::DevWriteMemTimeout => "device: write-memory timeout",
            CbError::DevReadRegTimeout => "device: read-register timeout",
            CbError::DevWriteRegTimeout => "device: write-register timeout",
            CbError::DevAckDisTimeout => "device: ack-disable timeout",
            CbError::DevAckEnTimeout => "device: ack-enable timeout",
            CbError::MemOutOfBounds => "memory access out of bounds",
            CbError::IsReadOnly => "device is read-only",
            CbError::InvalidDevice => "invalid device id",
            CbError::DevTimeout => "device watchdog timeout",
            CbError::Unimplemented => "unimplemented operation",
            CbError::NotInit => "settings DB not initialized",
            CbError::VerMismatch => "settings DB version mismatch",
            CbError::UnimplementedGlobal => "unimplemented",
            CbError::Unknown => "unknown error",
        };
        f.write_str(name)
    }
}
