// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Real hardware backend for [`crate::hw::I2cBusHw`], targeting an
//! STM32F407-class MCU's on-chip I2C peripheral.
//!
//! Every "kick off" method here only touches CR1/CR2/DR and returns; the
//! rest of each primitive's work happens on the peripheral's event and
//! error interrupt lines, which this module also owns
//! ([`Stm32F4I2cHw::on_event_interrupt`]/[`Stm32F4I2cHw::on_error_interrupt`]).
//! That split matches the bus manager's concurrency contract: only an
//! interrupt may complete a primitive, and only by posting
//! [`HW_COMPLETE`] — never by calling back synchronously, unlike
//! [`crate::hw::MockI2cBusHw`].
//!
//! This backend moves data byte-at-a-time through `TXE`/`RXNE`, not
//! through the DMA controller the original firmware used; the device and
//! bus managers above only observe "one `HW_COMPLETE` per primitive", so
//! this substitution is invisible above this module (recorded as a
//! deliberate simplification, not a silent one, in DESIGN.md).

use core::cell::Cell;

use critical_section::Mutex;
use stm32f4::stm32f407::{GPIOB, I2C1};

use cb_error::CbError;
use cb_kernel::ao::ActiveObject;
use cb_kernel::event::{AccessMode, Direction, Event, MemAddrWidth, Payload, RawBuf, MAX_RAW_BYTES};
use cb_kernel::pool::AnyEvent;

use crate::hw::I2cBusHw;
use crate::signal::HW_COMPLETE;

/// What the next event/error interrupt should do to finish the primitive
/// a "kick off" method just started. Cleared back to `Idle` once that
/// primitive's `HW_COMPLETE` has been posted.
#[derive(Clone, Copy)]
enum Phase {
    Idle,
    AwaitingStart,
    AwaitingAddr { direction: Direction },
    /// Shifting out the 1- or 2-byte internal memory address. `remaining`
    /// counts down from `width.bytes()`.
    AwaitingMemAddr { offset: u16, width: MemAddrWidth, remaining: u8 },
    Reading { remaining: u8, filled: u8, buf: [u8; MAX_RAW_BYTES] },
    Writing { remaining: u8, sent: u8, buf: [u8; MAX_RAW_BYTES] },
}

struct PhaseCell {
    phase: Mutex<Cell<Phase>>,
}

impl PhaseCell {
    const fn new() -> Self {
        Self { phase: Mutex::new(Cell::new(Phase::Idle)) }
    }

    fn get(&self) -> Phase {
        critical_section::with(|cs| self.phase.borrow(cs).get())
    }

    fn set(&self, phase: Phase) {
        critical_section::with(|cs| self.phase.borrow(cs).set(phase));
    }
}

/// Recovery GPIO pins used by `check_free` while the peripheral is
/// temporarily de-initialized. Both pins live on the same port for this
/// board's two I2C buses.
pub struct RecoveryPins {
    pub scl_pin: u8,
    pub sda_pin: u8,
}

/// One STM32F4 I2C peripheral plus the GPIO pins its `CheckingFree`
/// recovery path bit-bangs directly, bypassing the peripheral.
pub struct Stm32F4I2cHw {
    i2c: I2C1,
    gpio: GPIOB,
    pins: RecoveryPins,
    target: Mutex<Cell<Option<&'static dyn ActiveObject>>>,
    phase: PhaseCell,
}

// SAFETY: `I2C1`/`GPIOB` are svd2rust singleton register blocks; all
// access to the registers they own is serialized by the bus manager's own
// concurrency contract (task context only calls through `I2cBusHw`, ISR
// context only calls `on_event_interrupt`/`on_error_interrupt`, and both
// are mutually exclusive on a single Cortex-M4 core at the priority this
// peripheral's interrupt is configured at).
unsafe impl Sync for Stm32F4I2cHw {}

impl Stm32F4I2cHw {
    pub const fn new(i2c: I2C1, gpio: GPIOB, pins: RecoveryPins) -> Self {
        Self { i2c, gpio, pins, target: Mutex::new(Cell::new(None)), phase: PhaseCell::new() }
    }

    /// Wire this driver to the bus manager it completes primitives into.
    /// Must happen before the peripheral's interrupt lines are unmasked.
    pub fn attach(&self, target: &'static dyn ActiveObject) {
        critical_section::with(|cs| self.target.borrow(cs).set(Some(target)));
    }

    fn complete(&self, status: CbError, data: RawBuf) {
        self.phase.set(Phase::Idle);
        let target = critical_section::with(|cs| self.target.borrow(cs).get());
        if let Some(target) = target {
            let event = Event::new(HW_COMPLETE, Payload::I2cBusDone { status, data });
            let _ = target.post_from_isr(AnyEvent::Static(event));
        }
    }

    /// `CheckingFree`'s SDA-stuck-low recovery: reconfigure SCL/SDA as
    /// open-drain GPIO outputs, clock SCL up to nine times while sampling
    /// SDA, then restore the peripheral. Runs to completion inline —
    /// unlike every other primitive here, recovery has no natural
    /// interrupt to resume from, since the peripheral is de-initialized
    /// for its duration.
    fn recover_stuck_bus(&self) -> CbError {
        self.i2c.cr1.modify(|_, w| w.pe().clear_bit());

        let scl = self.pins.scl_pin;
        let sda = self.pins.sda_pin;
        self.gpio.moder.modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << (scl * 2))) | (0b01 << (scl * 2))) });
        self.gpio.otyper.modify(|r, w| unsafe { w.bits(r.bits() | (1 << scl) | (1 << sda)) });

        let mut freed = false;
        for _ in 0..9 {
            self.gpio.bsrr.write(|w| unsafe { w.bits(1 << (scl + 16)) }); // SCL low
            for _ in 0..1000 {
                cortex_m::asm::nop();
            }
            self.gpio.bsrr.write(|w| unsafe { w.bits(1 << scl) }); // SCL high
            for _ in 0..1000 {
                cortex_m::asm::nop();
            }
            if self.gpio.idr.read().bits() & (1 << sda) != 0 {
                freed = true;
                break;
            }
        }

        self.i2c.cr1.modify(|_, w| w.pe().set_bit());
        if freed {
            CbError::None
        } else {
            CbError::RcvrySdaStuckLow
        }
    }
}

impl I2cBusHw for Stm32F4I2cHw {
    fn check_free(&self) {
        let status = self.recover_stuck_bus();
        self.complete(status, RawBuf::empty());
    }

    fn start_bit(&self) {
        self.i2c.cr2.modify(|_, w| w.itevten().set_bit().iterren().set_bit());
        self.phase.set(Phase::AwaitingStart);
        self.i2c.cr1.modify(|_, w| w.start().set_bit());
    }

    fn send_7bit_addr(&self, addr: u8, direction: Direction) {
        self.phase.set(Phase::AwaitingAddr { direction });
        let rw_bit = matches!(direction, Direction::Receive) as u8;
        let byte = (addr << 1) | rw_bit;
        self.i2c.dr.write(|w| unsafe { w.dr().bits(byte) });
    }

    fn send_mem_addr(&self, offset: u16, width: MemAddrWidth) {
        match width {
            MemAddrWidth::One => {
                self.phase.set(Phase::AwaitingMemAddr { offset, width, remaining: 0 });
                self.i2c.dr.write(|w| unsafe { w.dr().bits(offset as u8) });
            }
            MemAddrWidth::Two => {
                self.phase.set(Phase::AwaitingMemAddr { offset, width, remaining: 1 });
                self.i2c.dr.write(|w| unsafe { w.dr().bits((offset >> 8) as u8) });
            }
        }
    }

    fn read_mem(&self, len: u8, _access: AccessMode) {
        self.phase.set(Phase::Reading { remaining: len, filled: 0, buf: [0u8; MAX_RAW_BYTES] });
        self.i2c.cr1.modify(|_, w| w.ack().set_bit());
        if len == 1 {
            self.i2c.cr1.modify(|_, w| w.ack().clear_bit());
        }
        self.i2c.cr2.modify(|_, w| w.itbufen().set_bit());
    }

    fn write_mem(&self, data: &[u8], _access: AccessMode) {
        let mut buf = [0u8; MAX_RAW_BYTES];
        let len = data.len().min(MAX_RAW_BYTES) as u8;
        buf[..len as usize].copy_from_slice(&data[..len as usize]);
        self.phase.set(Phase::Writing { remaining: len, sent: 0, buf });
        self.i2c.cr2.modify(|_, w| w.itbufen().set_bit());
        // Kick the first byte; TXE is already set after an address ACK.
        self.i2c.dr.write(|w| unsafe { w.dr().bits(buf[0]) });
    }
}

impl Stm32F4I2cHw {
    /// Drive one step of whatever primitive is in flight. Called from the
    /// peripheral's event interrupt (`I2C1_EV`); reads `SR1`/`SR2` to learn
    /// which condition fired, reading `SR2` where the reference manual
    /// requires it to clear the flag (`ADDR`).
    pub fn on_event_interrupt(&self) {
        let sr1 = self.i2c.sr1.read();

        match self.phase.get() {
            Phase::AwaitingStart if sr1.sb().bit_is_set() => {
                self.complete(CbError::None, RawBuf::empty());
            }
            Phase::AwaitingAddr { .. } if sr1.addr().bit_is_set() => {
                let _ = self.i2c.sr2.read(); // clears ADDR per reference manual
                self.complete(CbError::None, RawBuf::empty());
            }
            Phase::AwaitingMemAddr { offset, width, remaining } if sr1.btf().bit_is_set() || sr1.txe().bit_is_set() => {
                if remaining > 0 {
                    self.phase.set(Phase::AwaitingMemAddr { offset, width, remaining: remaining - 1 });
                    self.i2c.dr.write(|w| unsafe { w.dr().bits(offset as u8) });
                } else {
                    self.complete(CbError::None, RawBuf::empty());
                }
            }
            Phase::Reading { remaining, filled, mut buf } if sr1.rxne().bit_is_set() => {
                let byte = self.i2c.dr.read().dr().bits();
                if (filled as usize) < buf.len() {
                    buf[filled as usize] = byte;
                }
                let filled = filled + 1;
                if filled >= remaining {
                    self.i2c.cr1.modify(|_, w| w.stop().set_bit());
                    let data = RawBuf::from_slice(&buf[..remaining as usize]).unwrap_or_else(RawBuf::empty);
                    self.complete(CbError::None, data);
                } else {
                    if filled + 1 == remaining {
                        self.i2c.cr1.modify(|_, w| w.ack().clear_bit());
                    }
                    self.phase.set(Phase::Reading { remaining, filled, buf });
                }
            }
            Phase::Writing { remaining, sent, buf } if sr1.btf().bit_is_set() || sr1.txe().bit_is_set() => {
                let sent = sent + 1;
                if sent >= remaining {
                    self.i2c.cr1.modify(|_, w| w.stop().set_bit());
                    self.complete(CbError::None, RawBuf::empty());
                } else {
                    self.i2c.dr.write(|w| unsafe { w.dr().bits(buf[sent as usize]) });
                    self.phase.set(Phase::Writing { remaining, sent, buf });
                }
            }
            _ => {}
        }
    }

    /// Called from the peripheral's error interrupt (`I2C1_ER`). Every
    /// error bit maps to the same outcome here: the owning bus manager's
    /// own per-primitive timer is what distinguishes phases for timeout
    /// reporting, so a hardware-detected error is reported generically and
    /// the manager's timeout path never fires for it.
    pub fn on_error_interrupt(&self) {
        let sr1 = self.i2c.sr1.read();
        if sr1.af().bit_is_set() || sr1.berr().bit_is_set() || sr1.arlo().bit_is_set() || sr1.ovr().bit_is_set() {
            self.i2c.sr1.modify(|_, w| w.af().clear_bit().berr().clear_bit().arlo().clear_bit().ovr().clear_bit());
            self.i2c.cr1.modify(|_, w| w.stop().set_bit());
            match self.phase.get() {
                Phase::Reading { .. } => self.complete(CbError::RxneFlagTimeout, RawBuf::empty()),
                Phase::Writing { .. } => self.complete(CbError::WriteByteTimeout, RawBuf::empty()),
                _ => self.complete(CbError::BusEv6Timeout, RawBuf::empty()),
            }
        }
    }
}
