// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The flat, statically partitioned signal space.
//!
//! Signals are grouped into contiguous per-subsystem blocks; each block
//! exports its own first/last boundary so subsystems can assert at compile
//! time that their ranges do not overlap. `comm_stack` and `serial_mgr`
//! reserve the same ranges the original firmware's unimplemented comm/debug
//! layers would occupy, so that range is stable if those layers are ever
//! added to this crate; only `i2c_bus` and `i2c_device` are dispatched on
//! here.

pub type Signal = u16;

/// The first signal available for application use (signals below this are
/// conventionally reserved for kernel-internal bookkeeping, mirroring
/// `Q_USER_SIG` in the original firmware's signal header).
pub const FIRST_SIG: Signal = 4;

pub mod comm_stack {
    use super::Signal;

    pub const FIRST: Signal = super::FIRST_SIG;
    pub const MSG_RECEIVED: Signal = FIRST;
    pub const MSG_SEND: Signal = FIRST + 1;
    pub const LAST: Signal = MSG_SEND;
}

pub mod serial_mgr {
    use super::Signal;

    pub const FIRST: Signal = super::comm_stack::LAST + 1;
    pub const SERIAL_RX: Signal = FIRST;
    pub const SERIAL_TX_DONE: Signal = FIRST + 1;
    pub const LAST: Signal = SERIAL_TX_DONE;
}

/// Bus-primitive signals accepted and emitted by an I2C bus manager.
pub mod i2c_bus {
    use super::Signal;

    pub const FIRST: Signal = super::serial_mgr::LAST + 1;
    pub const CHECK_FREE: Signal = FIRST;
    pub const START_BIT: Signal = FIRST + 1;
    pub const SEND_7BIT_ADDR: Signal = FIRST + 2;
    pub const SEND_DEV_ADDR: Signal = FIRST + 3;
    pub const READ_MEM: Signal = FIRST + 4;
    pub const WRITE_MEM: Signal = FIRST + 5;
    pub const BUS_DONE: Signal = FIRST + 6;
    pub const BUS_PRIMITIVE_TIMER: Signal = FIRST + 7;
    pub const LAST: Signal = BUS_PRIMITIVE_TIMER;
}

/// High-level device-request signals accepted and emitted by an I2C device
/// manager.
pub mod i2c_device {
    use super::Signal;

    pub const FIRST: Signal = super::i2c_bus::LAST + 1;
    pub const EEPROM_RAW_MEM_READ: Signal = FIRST;
    pub const EEPROM_RAW_MEM_WRITE: Signal = FIRST + 1;
    pub const EEPROM_SN_READ: Signal = FIRST + 2;
    pub const EEPROM_EUI64_READ: Signal = FIRST + 3;
    /// Reserved: register-level IOExp access is unimplemented (see
    /// `Non-goals`/Open Questions). Kept so the signal space is stable if
    /// it is added later.
    pub const IOEXP_REG_READ: Signal = FIRST + 4;
    pub const IOEXP_REG_WRITE: Signal = FIRST + 5;
    pub const DEV_READ_DONE: Signal = FIRST + 6;
    pub const DEV_WRITE_DONE: Signal = FIRST + 7;
    pub const DEV_TIMEOUT: Signal = FIRST + 8;
    pub const DEV_WATCHDOG_TIMER: Signal = FIRST + 9;
    /// Sent back to a requester in place of `DEV_*_DONE` when its request
    /// was dropped because the deferred queue was full while busy (see
    /// §4.4's busy-state deferral).
    pub const IGNORED: Signal = FIRST + 10;
    pub const LAST: Signal = IGNORED;
}

/// One past the last signal assigned to any subsystem above; a crate adding
/// a new signal block should start numbering at this value.
pub const MAX_SHARED_SIG: Signal = i2c_device::LAST;

static_assertions::const_assert!(comm_stack::FIRST <= comm_stack::LAST);
static_assertions::const_assert!(serial_mgr::FIRST > comm_stack::LAST);
static_assertions::const_assert!(i2c_bus::FIRST > serial_mgr::LAST);
static_assertions::const_assert!(i2c_device::FIRST > i2c_bus::LAST);
