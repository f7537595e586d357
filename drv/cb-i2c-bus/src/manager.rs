// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The I²C bus manager active object.
//!
//! `handle()` below is the only place hardware primitives are kicked off,
//! and it only ever runs on the scheduler's own thread — the concurrency
//! contract is that ISRs may only post events, never execute state logic.
//! Because of that, the [`Logic`] the dispatcher drives carries no interior
//! mutability of its own: it is built fresh, on the stack, for each
//! `poll_once` call from the two `'static` references the manager owns for
//! its whole life. Only the things an ISR genuinely touches — the mailbox
//! and the per-primitive tick counter — need cross-context synchronization,
//! which keeps every `critical_section::with` call in this crate short and
//! un-nested (the `critical-section/std` backend used for host tests
//! deadlocks on nested acquisition from one thread, unlike the
//! interrupt-masking backend real hardware uses).

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;

use cb_error::CbError;
use cb_kernel::ao::{ActiveObject, Hsm, Priority, Trans};
use cb_kernel::event::{Event, Payload};
use cb_kernel::pool::{AnyEvent, EventPool, PoolTag};
use cb_kernel::signal::i2c_bus::*;
use counters::Count;
use ringbuf::*;

use crate::hw::I2cBusHw;
use crate::signal::HW_COMPLETE;
use crate::state::{timeout_ticks, BusState};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Count)]
enum Trace {
    #[count(skip)]
    None,
    Accepted { state: BusState, signal: u16 },
    Completed { from: BusState },
    TimedOut { from: BusState },
}

counted_ringbuf!(Trace, 32, Trace::None);

/// The transition function alone, held by value for the duration of one
/// `poll_once` call. `hw`/`requester` never change after construction, so
/// this needs no locking of its own.
struct Logic<HW: I2cBusHw + 'static> {
    hw: &'static HW,
    requester: &'static dyn ActiveObject,
    pool: &'static EventPool,
}

impl<HW: I2cBusHw + 'static> Logic<HW> {
    /// `BUS_DONE` is the one signal on this board's wire that actually
    /// carries a completion buffer out to another active object, so it is
    /// the one event here worth routing through the pool rather than
    /// `AnyEvent::Static` — see the "Event allocation" note in DESIGN.md.
    fn post_done(&self, status: CbError, data: cb_kernel::event::RawBuf) {
        let payload = Payload::I2cBusDone { status, data };
        let event_ref = self.pool.allocate(PoolTag::Medium, BUS_DONE, payload);
        let _ = self.requester.post(AnyEvent::Pooled(event_ref));
    }

    fn reject(&self, status: CbError) -> Trans<BusState> {
        self.post_done(status, cb_kernel::event::RawBuf::empty());
        Trans::Handled
    }

    fn finish_from_hw(&self, event: &Event) -> Trans<BusState> {
        match event.payload {
            Payload::I2cBusDone { status, data } => self.post_done(status, data),
            _ => self.post_done(CbError::Unknown, cb_kernel::event::RawBuf::empty()),
        }
        Trans::Transition(BusState::Idle)
    }

    fn finish_timeout(&self, status: CbError) -> Trans<BusState> {
        self.post_done(status, cb_kernel::event::RawBuf::empty());
        Trans::Transition(BusState::Idle)
    }
}

impl<HW: I2cBusHw + 'static> Hsm for Logic<HW> {
    type State = BusState;

    fn parent(&self, _state: BusState) -> Option<BusState> {
        None
    }

    fn handle(&mut self, state: BusState, event: &Event) -> Trans<BusState> {
        match state {
            BusState::Idle => match event.signal {
                CHECK_FREE => {
                    self.hw.check_free();
                    Trans::Transition(BusState::CheckingFree)
                }
                START_BIT => {
                    self.hw.start_bit();
                    Trans::Transition(BusState::GenStart)
                }
                SEND_7BIT_ADDR => match event.payload {
                    Payload::I2cAddr { device_addr, direction, .. } => {
                        if device_addr == 0 {
                            self.reject(CbError::InvalidParamsFor7BitAddr)
                        } else {
                            self.hw.send_7bit_addr(device_addr, direction);
                            Trans::Transition(BusState::SendAddr)
                        }
                    }
                    _ => self.reject(CbError::InvalidParamsFor7BitAddr),
                },
                SEND_DEV_ADDR => match event.payload {
                    Payload::I2cMemReq { offset, addr_width, .. } => {
                        self.hw.send_mem_addr(offset, addr_width);
                        Trans::Transition(BusState::SendMemAddr)
                    }
                    _ => self.reject(CbError::InvalidParamsForSendData),
                },
                READ_MEM => match event.payload {
                    Payload::I2cMemReq { len, access, .. } if len > 0 => {
                        self.hw.read_mem(len, access);
                        Trans::Transition(BusState::ReadingMem)
                    }
                    _ => self.reject(CbError::InvalidParamsForSendData),
                },
                WRITE_MEM => match event.payload {
                    Payload::I2cMemReq { len, access, data, .. } if len > 0 && data.len() >= len as usize => {
                        self.hw.write_mem(&data.as_slice()[..len as usize], access);
                        Trans::Transition(BusState::WritingMem)
                    }
                    _ => self.reject(CbError::InvalidParamsForSendData),
                },
                _ => Trans::Unhandled,
            },
            BusState::CheckingFree => match event.signal {
                HW_COMPLETE => self.finish_from_hw(event),
                BUS_PRIMITIVE_TIMER => self.finish_timeout(CbError::RcvrySdaStuckLow),
                _ => Trans::Unhandled,
            },
            BusState::GenStart => match event.signal {
                HW_COMPLETE => self.finish_from_hw(event),
                BUS_PRIMITIVE_TIMER => self.finish_timeout(CbError::BusEv5Timeout),
                _ => Trans::Unhandled,
            },
            BusState::SendAddr => match event.signal {
                HW_COMPLETE => self.finish_from_hw(event),
                BUS_PRIMITIVE_TIMER => self.finish_timeout(CbError::BusEv6Timeout),
                _ => Trans::Unhandled,
            },
            BusState::SendMemAddr => match event.signal {
                HW_COMPLETE => self.finish_from_hw(event),
                BUS_PRIMITIVE_TIMER => self.finish_timeout(CbError::BusEv8Timeout),
                _ => Trans::Unhandled,
            },
            BusState::ReadingMem => match event.signal {
                HW_COMPLETE => self.finish_from_hw(event),
                BUS_PRIMITIVE_TIMER => self.finish_timeout(CbError::RxneFlagTimeout),
                _ => Trans::Unhandled,
            },
            BusState::WritingMem => match event.signal {
                HW_COMPLETE => self.finish_from_hw(event),
                BUS_PRIMITIVE_TIMER => self.finish_timeout(CbError::WriteByteTimeout),
                _ => Trans::Unhandled,
            },
        }
    }
}

/// One I²C peripheral's bus manager. Paired 1:1, for this board's lifetime,
/// with the device manager that is its sole requester — fixed at
/// construction rather than threaded through every request, since this
/// board never shares a bus manager between two device managers.
pub struct I2cBusManager<HW: I2cBusHw + 'static> {
    mailbox: cb_kernel::ao::Mailbox<8>,
    state: Mutex<Cell<BusState>>,
    ticks_remaining: AtomicU32,
    hw: &'static HW,
    requester: &'static dyn ActiveObject,
    pool: &'static EventPool,
    priority: Priority,
    name: &'static str,
}

impl<HW: I2cBusHw + 'static> I2cBusManager<HW> {
    pub const fn new(
        hw: &'static HW,
        requester: &'static dyn ActiveObject,
        pool: &'static EventPool,
        priority: Priority,
        name: &'static str,
    ) -> Self {
        Self {
            mailbox: cb_kernel::ao::Mailbox::new(),
            state: Mutex::new(Cell::new(BusState::Idle)),
            ticks_remaining: AtomicU32::new(0),
            hw,
            requester,
            pool,
            priority,
            name,
        }
    }

    fn arm(&self, state: BusState) {
        self.ticks_remaining.store(timeout_ticks(state), Ordering::SeqCst);
    }
}

impl<HW: I2cBusHw + 'static> ActiveObject for I2cBusManager<HW> {
    fn priority(&self) -> Priority {
        self.priority
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn post(&self, event: AnyEvent) -> Result<(), CbError> {
        self.mailbox.push(event);
        Ok(())
    }

    fn poll_once(&self) -> bool {
        let any = match self.mailbox.pop() {
            Some(a) => a,
            None => return false,
        };
        let event = any.event();
        let mut current = critical_section::with(|cs| self.state.borrow(cs).get());
        let from = current;
        ringbuf_entry!(Trace::Accepted { state: from, signal: event.signal });

        let mut logic = Logic { hw: self.hw, requester: self.requester, pool: self.pool };
        cb_kernel::ao::dispatch(&mut logic, &mut current, &event);

        critical_section::with(|cs| self.state.borrow(cs).set(current));
        self.arm(current);

        if current == BusState::Idle && from != BusState::Idle {
            if event.signal == BUS_PRIMITIVE_TIMER {
                ringbuf_entry!(Trace::TimedOut { from });
            } else {
                ringbuf_entry!(Trace::Completed { from });
            }
        }
        true
    }

    fn tick(&self) {
        let prev = self.ticks_remaining.load(Ordering::SeqCst);
        if prev == 0 {
            return;
        }
        let next = prev - 1;
        self.ticks_remaining.store(next, Ordering::SeqCst);
        if next == 0 {
            let _ = self.post_from_isr(AnyEvent::Static(Event::new(BUS_PRIMITIVE_TIMER, Payload::Empty)));
        }
    }
}
