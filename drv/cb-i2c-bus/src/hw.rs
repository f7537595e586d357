// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The peripheral-facing seam the bus manager drives through, and a host
//! test double for it.
//!
//! Every method here is a "kick off and return" call: the real
//! implementation configures registers/DMA and returns immediately, and the
//! peripheral's event/error/DMA interrupt later posts [`HW_COMPLETE`] into
//! the owning [`crate::manager::I2cBusManager`]'s mailbox, never from inside
//! one of these calls. [`MockI2cBusHw`] honors that contract by
//! deferring its own callback until `complete()` runs, so host tests that
//! script a dropped completion (to exercise the timeout path) see exactly
//! what real silicon would: nothing arrives, and the primitive timer fires
//! instead.

use core::cell::RefCell;

use cb_error::CbError;
use cb_kernel::ao::ActiveObject;
use cb_kernel::event::{AccessMode, Direction, Event, MemAddrWidth, Payload, RawBuf};
use cb_kernel::pool::AnyEvent;
use heapless::Vec as HVec;

use crate::signal::HW_COMPLETE;

/// One I²C peripheral, as far as the bus manager's state machine is
/// concerned.
pub trait I2cBusHw: Sync {
    /// Recover a stuck bus: bit-bang SCL, re-init the peripheral.
    fn check_free(&self);
    fn start_bit(&self);
    fn send_7bit_addr(&self, addr: u8, direction: Direction);
    fn send_mem_addr(&self, offset: u16, width: MemAddrWidth);
    fn read_mem(&self, len: u8, access: AccessMode);
    fn write_mem(&self, data: &[u8], access: AccessMode);
}

/// What a scripted or default mock completion reports.
#[derive(Clone, Copy, Debug)]
pub struct HwOutcome {
    pub status: CbError,
    pub data: RawBuf,
}

impl HwOutcome {
    pub const fn ok() -> Self {
        Self { status: CbError::None, data: RawBuf::empty() }
    }

    pub fn ok_with(data: &[u8]) -> Self {
        Self { status: CbError::None, data: RawBuf::from_slice(data).expect("mock read fixture fits MAX_RAW_BYTES") }
    }

    pub const fn err(status: CbError) -> Self {
        Self { status, data: RawBuf::empty() }
    }
}

/// One recorded hardware call, for tests to assert the exact primitive
/// sequence the device manager drove the bus through.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HwCall {
    CheckFree,
    StartBit,
    SendAddr { addr: u8, direction: Direction },
    SendMemAddr { offset: u16, width: MemAddrWidth },
    ReadMem { len: u8 },
    WriteMem { len: u8 },
}

const MAX_RECORDED_CALLS: usize = 32;

/// A scriptable stand-in for silicon, in the spirit of
/// `openprot-i2c-server`'s `MockI2cDriver`: canned responses plus a call
/// log, with no real timing behavior of its own.
pub struct MockI2cBusHw {
    target: RefCell<Option<&'static dyn ActiveObject>>,
    next: RefCell<Option<HwOutcome>>,
    suppress_next: RefCell<bool>,
    calls: RefCell<HVec<HwCall, MAX_RECORDED_CALLS>>,
}

impl MockI2cBusHw {
    pub const fn new() -> Self {
        Self {
            target: RefCell::new(None),
            next: RefCell::new(None),
            suppress_next: RefCell::new(false),
            calls: RefCell::new(HVec::new()),
        }
    }

    /// Wire the mock up to the manager it drives. Must happen before any
    /// primitive is started; mirrors bringing up the real peripheral's
    /// interrupt vector after the manager singleton it targets exists.
    pub fn attach(&self, target: &'static dyn ActiveObject) {
        *self.target.borrow_mut() = Some(target);
    }

    /// Script the next call's outcome. Consumed after one call; calls made
    /// without a scripted outcome default to immediate success.
    pub fn set_next_outcome(&self, outcome: HwOutcome) {
        *self.next.borrow_mut() = Some(outcome);
    }

    /// Drop the next call's completion entirely, simulating a wedged bus:
    /// the manager's own primitive timer is what ends the wait.
    pub fn suppress_next(&self) {
        *self.suppress_next.borrow_mut() = true;
    }

    pub fn calls(&self) -> HVec<HwCall, MAX_RECORDED_CALLS> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: HwCall) {
        self.calls.borrow_mut().push(call).ok();
    }

    fn complete(&self) {
        if core::mem::take(&mut *self.suppress_next.borrow_mut()) {
            return;
        }
        let outcome = self.next.borrow_mut().take().unwrap_or(HwOutcome::ok());
        if let Some(target) = *self.target.borrow() {
            let event = Event::new(HW_COMPLETE, Payload::I2cBusDone { status: outcome.status, data: outcome.data });
            let _ = target.post_from_isr(AnyEvent::Static(event));
        }
    }
}

impl Default for MockI2cBusHw {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cBusHw for MockI2cBusHw {
    fn check_free(&self) {
        self.record(HwCall::CheckFree);
        self.complete();
    }

    fn start_bit(&self) {
        self.record(HwCall::StartBit);
        self.complete();
    }

    fn send_7bit_addr(&self, addr: u8, direction: Direction) {
        self.record(HwCall::SendAddr { addr, direction });
        self.complete();
    }

    fn send_mem_addr(&self, offset: u16, width: MemAddrWidth) {
        self.record(HwCall::SendMemAddr { offset, width });
        self.complete();
    }

    fn read_mem(&self, len: u8, _access: AccessMode) {
        self.record(HwCall::ReadMem { len });
        self.complete();
    }

    fn write_mem(&self, data: &[u8], _access: AccessMode) {
        self.record(HwCall::WriteMem { len: data.len() as u8 });
        self.complete();
    }
}
