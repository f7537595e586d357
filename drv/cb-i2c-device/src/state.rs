// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The device manager's state set.
//!
//! `Busy` is never the manager's *current* state; it exists purely as the
//! shared ancestor of every in-flight transaction state, so the dispatcher's
//! entry/exit actions (`enter`/`exit` in [`crate::manager`]) fire exactly
//! once per transaction no matter which leaf state it runs through — that is
//! where the device-level watchdog is armed and disarmed, and where a
//! completed transaction's deferred-queue replay is triggered.

use cb_kernel::timer::seconds_to_ticks;

/// One step of a multi-primitive I2C transaction. Read and write sequences
/// share the first four steps (check bus, start, address in transmit mode,
/// internal memory address); they diverge at `GenerateStart1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    /// Virtual super-state; see module docs.
    Busy,
    CheckingBus,
    GenerateStart,
    Send7BitAddrTxMode,
    SendInternalAddr,
    GenerateStart1,
    Send7BitAddrRxMode,
    ReadMem,
    WriteMem,
}

impl DeviceState {
    pub fn parent(self) -> Option<DeviceState> {
        match self {
            DeviceState::Idle => None,
            DeviceState::Busy => None,
            _ => Some(DeviceState::Busy),
        }
    }
}

/// Device-level watchdog budget: seconds-scale, deliberately generous
/// relative to any single bus primitive's millisecond-scale timeout, so it
/// only fires when a bus-primitive timeout itself was somehow lost.
pub fn watchdog_ticks() -> u32 {
    seconds_to_ticks(2)
}
