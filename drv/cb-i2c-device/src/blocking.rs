// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The synchronous, pre-scheduler blocking I2C path.
//!
//! Before the cooperative kernel's `Scheduler` is running — during early
//! boot, while the settings DB decides whether this board has ever been
//! provisioned — nothing is polling mailboxes yet. [`BlockingDeviceManager`]
//! drives the same bus-primitive sequence the event-driven
//! [`crate::manager::I2cDeviceManager`] does, but through [`BlockingI2cHw`],
//! whose methods spin on the peripheral's status flags directly instead of
//! returning immediately and completing later from an interrupt. It exists
//! only to back [`cb_device_registry::BlockingI2c`] for the settings DB;
//! nothing here runs once the kernel starts.

use cb_device_registry::{self as registry, BlockingI2c, DeviceConfig, DeviceId};
use cb_error::CbError;
use cb_kernel::event::{AccessMode, Direction, MemAddrWidth as KMemAddrWidth};

fn conv_width(w: registry::MemAddrWidth) -> KMemAddrWidth {
    match w {
        registry::MemAddrWidth::One => KMemAddrWidth::One,
        registry::MemAddrWidth::Two => KMemAddrWidth::Two,
    }
}

/// The peripheral-facing seam the blocking path drives through. Unlike
/// [`cb_i2c_bus::I2cBusHw`], every method here runs to completion
/// synchronously — a real implementation spins on EV5/EV6/EV8/RXNE/BTF
/// exactly as the event-driven path's state machine does, just without a
/// state machine, since there is no mailbox to return control to.
pub trait BlockingI2cHw: Sync {
    fn check_free(&self) -> Result<(), CbError>;
    fn start_bit(&self) -> Result<(), CbError>;
    fn send_7bit_addr(&self, addr: u8, direction: Direction) -> Result<(), CbError>;
    fn send_mem_addr(&self, offset: u16, width: KMemAddrWidth) -> Result<(), CbError>;
    fn read_mem(&self, buf: &mut [u8]) -> Result<(), CbError>;
    fn write_mem(&self, data: &[u8], access: AccessMode) -> Result<(), CbError>;
    fn stop_bit(&self);
}

/// Drives one `HW` through the same enforced address/bounds/page-split
/// rules as the event-driven manager, entirely synchronously. One instance
/// wraps one physical bus; the board's two buses each get their own.
pub struct BlockingDeviceManager<'a, HW> {
    hw: &'a HW,
}

impl<'a, HW: BlockingI2cHw> BlockingDeviceManager<'a, HW> {
    pub const fn new(hw: &'a HW) -> Self {
        Self { hw }
    }

    fn addr_phase(&self, cfg: &DeviceConfig, offset: u16, direction: Direction) -> Result<(), CbError> {
        self.hw.check_free()?;
        self.hw.start_bit()?;
        self.hw.send_7bit_addr(cfg.device_addr, Direction::Transmit)?;
        self.hw.send_mem_addr(offset, conv_width(cfg.mem_addr_width))?;
        if let Direction::Receive = direction {
            self.hw.start_bit()?;
            self.hw.send_7bit_addr(cfg.device_addr, Direction::Receive)?;
        }
        Ok(())
    }

    fn read_one(&self, cfg: &DeviceConfig, offset: u16, buf: &mut [u8]) -> Result<(), CbError> {
        self.addr_phase(cfg, offset, Direction::Receive)?;
        let result = self.hw.read_mem(buf);
        self.hw.stop_bit();
        result
    }

    /// Write one page-bounded chunk. The caller has already split the
    /// overall request at page boundaries: only writes are page-limited.
    fn write_one(&self, cfg: &DeviceConfig, offset: u16, data: &[u8]) -> Result<(), CbError> {
        self.addr_phase(cfg, offset, Direction::Transmit)?;
        let result = self.hw.write_mem(data, AccessMode::Byte);
        self.hw.stop_bit();
        result
    }
}

impl<'a, HW: BlockingI2cHw> BlockingI2c for BlockingDeviceManager<'a, HW> {
    fn blocking_read(&self, device: DeviceId, offset: u16, buf: &mut [u8]) -> Result<(), CbError> {
        let cfg = registry::config(device);
        registry::validate_bounds(cfg, offset, buf.len() as u16)?;
        // Reads are issued whole, regardless of page boundaries — the same
        // asymmetry the event-driven path enforces.
        self.read_one(cfg, offset, buf)
    }

    fn blocking_write(&self, device: DeviceId, offset: u16, data: &[u8]) -> Result<(), CbError> {
        let cfg = registry::config(device);
        registry::validate_bounds(cfg, offset, data.len() as u16)?;
        registry::validate_writable(cfg)?;
        let chunks = registry::split_into_pages(offset, data.len() as u16, cfg.page_size);
        let mut done = 0usize;
        for chunk in chunks.iter() {
            let len = chunk.len as usize;
            self.write_one(cfg, chunk.offset, &data[done..done + len])?;
            done += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use heapless::Vec as HVec;

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Call {
        CheckFree,
        StartBit,
        SendAddr(u8, Direction),
        SendMemAddr(u16, KMemAddrWidth),
        ReadMem(u8),
        WriteMem(u8),
        StopBit,
    }

    /// An in-memory backing store plus a call log, so tests can assert both
    /// the exact primitive sequence and the resulting device contents.
    struct MemHw {
        eeprom: RefCell<[u8; 256]>,
        fail_next: RefCell<Option<CbError>>,
        calls: RefCell<HVec<Call, 64>>,
    }

    impl MemHw {
        fn new() -> Self {
            Self { eeprom: RefCell::new([0u8; 256]), fail_next: RefCell::new(None), calls: RefCell::new(HVec::new()) }
        }

        fn fail_next_call(&self, status: CbError) {
            *self.fail_next.borrow_mut() = Some(status);
        }

        fn maybe_fail(&self) -> Result<(), CbError> {
            match self.fail_next.borrow_mut().take() {
                Some(status) => Err(status),
                None => Ok(()),
            }
        }

        fn record(&self, call: Call) {
            self.calls.borrow_mut().push(call).ok();
        }

        fn calls(&self) -> HVec<Call, 64> {
            self.calls.borrow().clone()
        }
    }

    // Only `DeviceId::Eeprom` actually reads/writes `eeprom`; the `SnRom`
    // cases below are rejected before any primitive touches this double.
    impl BlockingI2cHw for MemHw {
        fn check_free(&self) -> Result<(), CbError> {
            self.record(Call::CheckFree);
            self.maybe_fail()
        }

        fn start_bit(&self) -> Result<(), CbError> {
            self.record(Call::StartBit);
            self.maybe_fail()
        }

        fn send_7bit_addr(&self, addr: u8, direction: Direction) -> Result<(), CbError> {
            self.record(Call::SendAddr(addr, direction));
            self.maybe_fail()
        }

        fn send_mem_addr(&self, offset: u16, width: KMemAddrWidth) -> Result<(), CbError> {
            self.record(Call::SendMemAddr(offset, width));
            self.maybe_fail()
        }

        fn read_mem(&self, buf: &mut [u8]) -> Result<(), CbError> {
            self.record(Call::ReadMem(buf.len() as u8));
            self.maybe_fail()?;
            let eeprom = self.eeprom.borrow();
            let last = self.calls.borrow();
            let offset = match last.iter().rev().find_map(|c| match c {
                Call::SendMemAddr(o, _) => Some(*o),
                _ => None,
            }) {
                Some(o) => o,
                None => return Ok(()),
            };
            drop(last);
            buf.copy_from_slice(&eeprom[offset as usize..offset as usize + buf.len()]);
            Ok(())
        }

        fn write_mem(&self, data: &[u8], _access: AccessMode) -> Result<(), CbError> {
            self.record(Call::WriteMem(data.len() as u8));
            self.maybe_fail()?;
            let last = self.calls.borrow();
            let offset = last
                .iter()
                .rev()
                .find_map(|c| match c {
                    Call::SendMemAddr(o, _) => Some(*o),
                    _ => None,
                })
                .expect("write_mem always follows send_mem_addr");
            drop(last);
            let mut eeprom = self.eeprom.borrow_mut();
            eeprom[offset as usize..offset as usize + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn stop_bit(&self) {
            self.record(Call::StopBit);
        }
    }

    #[test]
    fn write_then_read_back_round_trips_through_the_same_backing_store() {
        let hw = MemHw::new();
        let dm: BlockingDeviceManager<'_, MemHw> = BlockingDeviceManager::new(&hw);
        dm.blocking_write(DeviceId::Eeprom, 0x00, &[0xAA, 0xBB, 0xCC]).unwrap();
        let mut buf = [0u8; 3];
        dm.blocking_read(DeviceId::Eeprom, 0x00, &mut buf).unwrap();
        assert_eq!(buf, [0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn a_32_byte_write_is_split_into_page_bounded_primitive_calls() {
        let hw = MemHw::new();
        let dm: BlockingDeviceManager<'_, MemHw> = BlockingDeviceManager::new(&hw);
        dm.blocking_write(DeviceId::Eeprom, 0x0A, &[0x11u8; 32]).unwrap();

        let mut lens: HVec<u8, 8> = HVec::new();
        for call in hw.calls().iter() {
            if let Call::WriteMem(l) = call {
                lens.push(*l).ok();
            }
        }
        assert_eq!(lens.as_slice(), &[6, 16, 10]);
    }

    #[test]
    fn a_17_byte_read_crossing_a_page_boundary_is_one_call() {
        let hw = MemHw::new();
        {
            let mut e = hw.eeprom.borrow_mut();
            for (i, b) in e.iter_mut().enumerate().take(17) {
                *b = i as u8;
            }
        }
        let dm: BlockingDeviceManager<'_, MemHw> = BlockingDeviceManager::new(&hw);
        let mut buf = [0u8; 17];
        dm.blocking_read(DeviceId::Eeprom, 0x00, &mut buf).unwrap();
        let mut expected = [0u8; 17];
        for (i, b) in expected.iter_mut().enumerate() {
            *b = i as u8;
        }
        assert_eq!(buf, expected);

        let read_calls = hw.calls().iter().filter(|c| matches!(c, Call::ReadMem(_))).count();
        assert_eq!(read_calls, 1);
    }

    #[test]
    fn out_of_bounds_read_is_rejected_before_touching_hardware() {
        let hw = MemHw::new();
        let dm: BlockingDeviceManager<'_, MemHw> = BlockingDeviceManager::new(&hw);
        let mut buf = [0u8; 2];
        let err = dm.blocking_read(DeviceId::SnRom, 0x8F, &mut buf).unwrap_err();
        assert_eq!(err, CbError::MemOutOfBounds);
        assert!(hw.calls().is_empty());
    }

    #[test]
    fn write_to_a_read_only_device_is_rejected_before_touching_hardware() {
        let hw = MemHw::new();
        let dm: BlockingDeviceManager<'_, MemHw> = BlockingDeviceManager::new(&hw);
        let err = dm.blocking_write(DeviceId::SnRom, 0x80, &[0u8; 4]).unwrap_err();
        assert_eq!(err, CbError::IsReadOnly);
        assert!(hw.calls().is_empty());
    }

    #[test]
    fn a_failed_primitive_aborts_the_read_with_its_status() {
        let hw = MemHw::new();
        hw.fail_next_call(CbError::RcvrySdaStuckLow);
        let dm: BlockingDeviceManager<'_, MemHw> = BlockingDeviceManager::new(&hw);
        let mut buf = [0u8; 1];
        let err = dm.blocking_read(DeviceId::Eeprom, 0x00, &mut buf).unwrap_err();
        assert_eq!(err, CbError::RcvrySdaStuckLow);
    }
}
