// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The I²C device manager: sequences a logical device's multi-primitive
//! transaction through the bus manager it drives, enforcing the device
//! registry's address/size/page constraints and deferring requests that
//! arrive while a transaction is already in flight.

#![cfg_attr(not(test), no_std)]

mod blocking;
mod manager;
mod state;
#[cfg(feature = "hw-stm32f4")]
mod stm32f4_hw;

pub use blocking::{BlockingDeviceManager, BlockingI2cHw};
pub use manager::I2cDeviceManager;
pub use state::{watchdog_ticks, DeviceState};
#[cfg(feature = "hw-stm32f4")]
pub use stm32f4_hw::Stm32F4BlockingI2cHw;

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    use cb_error::CbError;
    use cb_kernel::ao::{ActiveObject, Mailbox, Priority};
    use cb_kernel::event::{Event, Payload, RawBuf};
    use cb_kernel::pool::{AnyEvent, EventPool};
    use cb_kernel::sched::Scheduler;
    use cb_kernel::signal::i2c_bus::BUS_DONE;
    use cb_kernel::signal::i2c_device::*;
    use heapless::Vec as HVec;

    /// A requester double: just a mailbox the test can drain, one event at a
    /// time, in the order the device manager posted them.
    struct Requester {
        mailbox: Mailbox<8>,
    }

    impl Requester {
        const fn new() -> Self {
            Self { mailbox: Mailbox::new() }
        }

        fn take(&self) -> Option<Event> {
            self.mailbox.pop().map(|a| a.event())
        }
    }

    impl ActiveObject for Requester {
        fn priority(&self) -> Priority {
            1
        }
        fn name(&self) -> &'static str {
            "requester"
        }
        fn post(&self, event: AnyEvent) -> Result<(), CbError> {
            self.mailbox.push(event);
            Ok(())
        }
        fn poll_once(&self) -> bool {
            false
        }
    }

    /// A bus-manager double: every posted bus primitive completes
    /// immediately and synchronously with a scripted (default: success,
    /// empty data) outcome, letting these tests exercise the device
    /// manager's sequencing without a real `I2cBusManager`/`I2cBusHw` pair.
    struct StubBus {
        target: RefCell<Option<&'static dyn ActiveObject>>,
        read_data: RefCell<RawBuf>,
        fail_on: RefCell<Option<(u16, CbError)>>,
        calls: RefCell<HVec<(u16, Option<u8>), 32>>,
    }

    impl StubBus {
        const fn new() -> Self {
            Self { target: RefCell::new(None), read_data: RefCell::new(RawBuf::empty()), fail_on: RefCell::new(None), calls: RefCell::new(HVec::new()) }
        }

        fn attach(&self, target: &'static dyn ActiveObject) {
            *self.target.borrow_mut() = Some(target);
        }

        /// Bytes returned on every `READ_MEM` this stub completes.
        fn set_read_data(&self, data: &[u8]) {
            *self.read_data.borrow_mut() = RawBuf::from_slice(data).unwrap();
        }

        /// Fail the `n`th primitive (0-indexed, across the whole stub's
        /// lifetime) with `status` instead of completing it successfully.
        fn fail_call(&self, n: u16, status: CbError) {
            *self.fail_on.borrow_mut() = Some((n, status));
        }

        fn calls(&self) -> HVec<(u16, Option<u8>), 32> {
            self.calls.borrow().clone()
        }

        fn write_lens(&self) -> HVec<u8, 32> {
            let mut out = HVec::new();
            for (sig, len) in self.calls().iter() {
                if *sig == cb_kernel::signal::i2c_bus::WRITE_MEM {
                    if let Some(len) = len {
                        out.push(*len).ok();
                    }
                }
            }
            out
        }
    }

    impl ActiveObject for StubBus {
        fn priority(&self) -> Priority {
            9
        }
        fn name(&self) -> &'static str {
            "stub-bus"
        }
        fn post(&self, event: AnyEvent) -> Result<(), CbError> {
            let ev = event.event();
            let len = match ev.payload {
                Payload::I2cMemReq { len, .. } => Some(len),
                _ => None,
            };
            let call_index = {
                let mut calls = self.calls.borrow_mut();
                let idx = calls.len() as u16;
                calls.push((ev.signal, len)).ok();
                idx
            };

            let status = match *self.fail_on.borrow() {
                Some((n, status)) if n == call_index => status,
                _ => CbError::None,
            };
            let data = if status == CbError::None && ev.signal == cb_kernel::signal::i2c_bus::READ_MEM {
                *self.read_data.borrow()
            } else {
                RawBuf::empty()
            };

            if let Some(target) = *self.target.borrow() {
                let done = Event::new(BUS_DONE, Payload::I2cBusDone { status, data });
                let _ = target.post(AnyEvent::Static(done));
            }
            Ok(())
        }
        fn poll_once(&self) -> bool {
            false
        }
    }

    #[test]
    fn scenario1_read_crossing_a_page_boundary_is_not_split() {
        static BUS: StubBus = StubBus::new();
        static REQ: Requester = Requester::new();
        static POOL: EventPool = EventPool::new();
        static DM: I2cDeviceManager = I2cDeviceManager::new(&BUS, &REQ, &POOL, 5, "i2c-dev-0");
        BUS.attach(&DM);
        let sched: Scheduler<1> = Scheduler::new([&DM]);

        let data = [0x5Au8; 17];
        BUS.set_read_data(&data);
        DM.post(AnyEvent::Static(Event::new(
            EEPROM_RAW_MEM_READ,
            Payload::DeviceMemReq { device: 0, offset: 0x00, len: 17, data: RawBuf::empty() },
        )))
        .unwrap();

        sched.run_to_quiescence(32);

        // One READ_MEM call, never split by the 16-byte page size: only
        // writes are page-limited.
        let mut reads: HVec<u8, 32> = HVec::new();
        for (sig, len) in BUS.calls().iter() {
            if *sig == cb_kernel::signal::i2c_bus::READ_MEM {
                if let Some(len) = len {
                    reads.push(*len).ok();
                }
            }
        }
        assert_eq!(reads.as_slice(), &[17]);

        match REQ.take().unwrap().payload {
            Payload::DeviceReadDone { status, data } => {
                assert_eq!(status, CbError::None);
                assert_eq!(data.as_slice(), &[0x5Au8; 17]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn scenario3_write_spanning_two_pages_is_split_with_no_gap_or_overlap() {
        static BUS: StubBus = StubBus::new();
        static REQ: Requester = Requester::new();
        static POOL: EventPool = EventPool::new();
        static DM: I2cDeviceManager = I2cDeviceManager::new(&BUS, &REQ, &POOL, 5, "i2c-dev-0");
        BUS.attach(&DM);
        let sched: Scheduler<1> = Scheduler::new([&DM]);

        let data = [0x11u8; 32];
        DM.post(AnyEvent::Static(Event::new(
            EEPROM_RAW_MEM_WRITE,
            Payload::DeviceMemReq { device: 0, offset: 0x0A, len: 32, data: RawBuf::from_slice(&data).unwrap() },
        )))
        .unwrap();

        sched.run_to_quiescence(64);

        assert_eq!(BUS.write_lens().as_slice(), &[6, 16, 10]);
        match REQ.take().unwrap().payload {
            Payload::DeviceWriteDone { status, len } => {
                assert_eq!(status, CbError::None);
                assert_eq!(len, 32);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn scenario4_out_of_bounds_request_is_rejected_without_touching_the_bus() {
        static BUS: StubBus = StubBus::new();
        static REQ: Requester = Requester::new();
        static POOL: EventPool = EventPool::new();
        static DM: I2cDeviceManager = I2cDeviceManager::new(&BUS, &REQ, &POOL, 5, "i2c-dev-0");
        BUS.attach(&DM);
        let sched: Scheduler<1> = Scheduler::new([&DM]);

        // SN-ROM spans [0x80, 0x90); two bytes starting at 0x8F run one byte
        // past the end.
        DM.post(AnyEvent::Static(Event::new(
            EEPROM_SN_READ,
            Payload::DeviceMemReq { device: 0, offset: 0x8F, len: 2, data: RawBuf::empty() },
        )))
        .unwrap();

        sched.run_to_quiescence(8);

        assert!(BUS.calls().is_empty());
        match REQ.take().unwrap().payload {
            Payload::DeviceReadDone { status, .. } => assert_eq!(status, CbError::MemOutOfBounds),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn scenario5_requests_arriving_while_busy_are_deferred_and_replayed_in_order() {
        static BUS: StubBus = StubBus::new();
        static REQ: Requester = Requester::new();
        static POOL: EventPool = EventPool::new();
        static DM: I2cDeviceManager = I2cDeviceManager::new(&BUS, &REQ, &POOL, 5, "i2c-dev-0");
        BUS.attach(&DM);
        let sched: Scheduler<1> = Scheduler::new([&DM]);

        let req = |offset: u16| Event::new(EEPROM_RAW_MEM_READ, Payload::DeviceMemReq { device: 0, offset, len: 1, data: RawBuf::empty() });

        DM.post(AnyEvent::Static(req(0x00))).unwrap(); // A
        assert!(sched.run_once()); // accept A; now busy

        DM.post(AnyEvent::Static(req(0x01))).unwrap(); // B, arrives while busy
        DM.post(AnyEvent::Static(req(0x02))).unwrap(); // C, arrives while busy

        sched.run_to_quiescence(128);

        // All three eventually complete, in the order they were accepted.
        for _ in 0..3 {
            match REQ.take().unwrap().payload {
                Payload::DeviceReadDone { status, .. } => assert_eq!(status, CbError::None),
                other => panic!("unexpected payload: {other:?}"),
            }
        }
        assert!(REQ.take().is_none());
    }

    #[test]
    fn a_failed_bus_primitive_aborts_the_transaction_with_its_status() {
        static BUS: StubBus = StubBus::new();
        static REQ: Requester = Requester::new();
        static POOL: EventPool = EventPool::new();
        static DM: I2cDeviceManager = I2cDeviceManager::new(&BUS, &REQ, &POOL, 5, "i2c-dev-0");
        BUS.attach(&DM);
        let sched: Scheduler<1> = Scheduler::new([&DM]);

        // Fail the very first primitive (CHECK_FREE) of the transaction.
        BUS.fail_call(0, CbError::RcvrySdaStuckLow);
        DM.post(AnyEvent::Static(Event::new(
            EEPROM_RAW_MEM_READ,
            Payload::DeviceMemReq { device: 0, offset: 0x00, len: 4, data: RawBuf::empty() },
        )))
        .unwrap();

        sched.run_to_quiescence(16);

        match REQ.take().unwrap().payload {
            Payload::DeviceReadDone { status, data } => {
                assert_eq!(status, CbError::RcvrySdaStuckLow);
                assert!(data.is_empty());
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn ioexp_register_access_is_answered_unimplemented_without_touching_the_bus() {
        static BUS: StubBus = StubBus::new();
        static REQ: Requester = Requester::new();
        static POOL: EventPool = EventPool::new();
        static DM: I2cDeviceManager = I2cDeviceManager::new(&BUS, &REQ, &POOL, 5, "i2c-dev-0");
        BUS.attach(&DM);
        let sched: Scheduler<1> = Scheduler::new([&DM]);

        DM.post(AnyEvent::Static(Event::new(IOEXP_REG_READ, Payload::Empty))).unwrap();
        sched.run_to_quiescence(4);

        assert!(BUS.calls().is_empty());
        match REQ.take().unwrap().payload {
            Payload::DeviceReadDone { status, .. } => assert_eq!(status, CbError::Unimplemented),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
