// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronous STM32F4 register glue backing [`crate::blocking::BlockingI2cHw`].
//!
//! Drives the same EV5/EV6/EV8/RXNE sequence `cb_i2c_bus::Stm32F4I2cHw`
//! drives from interrupt context, but by spin-waiting on `SR1` directly.
//! Appropriate only before the active-object kernel's interrupts are
//! unmasked — early boot, while the settings DB is deciding whether this
//! board has ever been provisioned — since every method here blocks the
//! calling context until its primitive completes or times out.
//!
//! Borrows the peripheral rather than owning it: the same `I2C1` singleton
//! is driven blocking-style here during boot, then handed by value into
//! [`cb_i2c_bus::Stm32F4I2cHw`] once the scheduler takes over.

use stm32f4::stm32f407::I2C1;

use cb_error::CbError;
use cb_kernel::event::{AccessMode, Direction, MemAddrWidth};

use crate::blocking::BlockingI2cHw;

/// Iterations to spin on a status flag before giving up. There is no tick
/// source this early in boot, so this is a busy-wait bound rather than a
/// real time budget.
const SPIN_LIMIT: u32 = 100_000;

pub struct Stm32F4BlockingI2cHw<'a> {
    i2c: &'a I2C1,
}

impl<'a> Stm32F4BlockingI2cHw<'a> {
    pub const fn new(i2c: &'a I2C1) -> Self {
        Self { i2c }
    }

    fn spin_until(&self, mut ready: impl FnMut(&I2C1) -> bool, timeout: CbError) -> Result<(), CbError> {
        for _ in 0..SPIN_LIMIT {
            if ready(self.i2c) {
                return Ok(());
            }
        }
        Err(timeout)
    }
}

impl<'a> BlockingI2cHw for Stm32F4BlockingI2cHw<'a> {
    fn check_free(&self) -> Result<(), CbError> {
        if self.i2c.sr2.read().busy().bit_is_clear() {
            Ok(())
        } else {
            Err(CbError::Busy)
        }
    }

    fn start_bit(&self) -> Result<(), CbError> {
        self.i2c.cr1.modify(|_, w| w.start().set_bit());
        self.spin_until(|i2c| i2c.sr1.read().sb().bit_is_set(), CbError::BusEv5Timeout)
    }

    fn send_7bit_addr(&self, addr: u8, direction: Direction) -> Result<(), CbError> {
        let rw_bit = matches!(direction, Direction::Receive) as u8;
        self.i2c.dr.write(|w| unsafe { w.dr().bits((addr << 1) | rw_bit) });
        self.spin_until(|i2c| i2c.sr1.read().addr().bit_is_set(), CbError::BusEv6Timeout)?;
        let _ = self.i2c.sr2.read(); // clears ADDR per reference manual
        Ok(())
    }

    fn send_mem_addr(&self, offset: u16, width: MemAddrWidth) -> Result<(), CbError> {
        if let MemAddrWidth::Two = width {
            self.i2c.dr.write(|w| unsafe { w.dr().bits((offset >> 8) as u8) });
            self.spin_until(|i2c| i2c.sr1.read().btf().bit_is_set() || i2c.sr1.read().txe().bit_is_set(), CbError::BusEv8Timeout)?;
        }
        self.i2c.dr.write(|w| unsafe { w.dr().bits(offset as u8) });
        self.spin_until(|i2c| i2c.sr1.read().btf().bit_is_set() || i2c.sr1.read().txe().bit_is_set(), CbError::BusEv8Timeout)
    }

    fn read_mem(&self, buf: &mut [u8]) -> Result<(), CbError> {
        if buf.is_empty() {
            return Ok(());
        }
        self.i2c.cr1.modify(|_, w| w.ack().set_bit());
        for (i, byte) in buf.iter_mut().enumerate() {
            if i + 1 == buf.len() {
                self.i2c.cr1.modify(|_, w| w.ack().clear_bit());
            }
            self.spin_until(|i2c| i2c.sr1.read().rxne().bit_is_set(), CbError::RxneFlagTimeout)?;
            *byte = self.i2c.dr.read().dr().bits();
        }
        Ok(())
    }

    fn write_mem(&self, data: &[u8], _access: AccessMode) -> Result<(), CbError> {
        for byte in data {
            self.i2c.dr.write(|w| unsafe { w.dr().bits(*byte) });
            self.spin_until(|i2c| i2c.sr1.read().btf().bit_is_set() || i2c.sr1.read().txe().bit_is_set(), CbError::WriteByteTimeout)?;
        }
        Ok(())
    }

    fn stop_bit(&self) {
        self.i2c.cr1.modify(|_, w| w.stop().set_bit());
    }
}
