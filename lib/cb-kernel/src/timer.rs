// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One-shot timer events owned by an active object.
//!
//! Time is measured in kernel ticks (10 000/s by default). A `Timer` is
//! armed with a tick count; a SysTick-driven
//! `tick_from_isr` call counts it down and, on reaching zero, posts its
//! owning AO's configured signal — from interrupt context, using the
//! `post_from_isr` path, never running state-machine code itself.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::ao::ActiveObject;
use crate::event::{Event, Payload};
use crate::pool::AnyEvent;
use crate::signal::Signal;

/// Kernel tick rate, ticks per second.
pub const TICKS_PER_SECOND: u32 = 10_000;

pub const fn ms_to_ticks(ms: u32) -> u32 {
    (ms * (TICKS_PER_SECOND / 1000)).max(1)
}

pub const fn seconds_to_ticks(s: u32) -> u32 {
    s * TICKS_PER_SECOND
}

/// A one-shot timer event. `remaining == 0` means disarmed.
pub struct Timer {
    ao: &'static dyn ActiveObject,
    signal: Signal,
    remaining: AtomicU32,
}

impl Timer {
    pub const fn new(ao: &'static dyn ActiveObject, signal: Signal) -> Self {
        Self { ao, signal, remaining: AtomicU32::new(0) }
    }

    pub fn arm(&self, ticks: u32) {
        self.remaining.store(ticks.max(1), Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.remaining.store(0, Ordering::SeqCst);
    }

    pub fn rearm(&self, ticks: u32) {
        self.arm(ticks);
    }

    pub fn is_armed(&self) -> bool {
        self.remaining.load(Ordering::SeqCst) != 0
    }

    /// Called once per kernel tick, from the SysTick ISR. ISR-safe: only
    /// touches an atomic counter and, on expiry, posts via `post_from_isr`.
    pub fn tick_from_isr(&self) {
        let prev = self.remaining.load(Ordering::SeqCst);
        if prev == 0 {
            return;
        }
        let next = prev - 1;
        self.remaining.store(next, Ordering::SeqCst);
        if next == 0 {
            let _ = self.ao.post_from_isr(AnyEvent::Static(Event::new(self.signal, Payload::Empty)));
        }
    }
}

/// A fixed set of timers the SysTick handler drives on every tick. Built
/// once at startup from the timers each AO registers.
pub struct TimerWheel {
    timers: &'static [&'static Timer],
}

impl TimerWheel {
    pub const fn new(timers: &'static [&'static Timer]) -> Self {
        Self { timers }
    }

    pub fn tick_from_isr(&self) {
        for t in self.timers {
            t.tick_from_isr();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;
    use cb_error::CbError;

    struct CountingAo {
        posts: AtomicUsize,
    }

    impl ActiveObject for CountingAo {
        fn priority(&self) -> crate::ao::Priority {
            1
        }
        fn name(&self) -> &'static str {
            "counting"
        }
        fn post(&self, _event: AnyEvent) -> Result<(), CbError> {
            self.posts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn poll_once(&self) -> bool {
            false
        }
    }

    #[test]
    fn fires_exactly_once_at_zero() {
        static AO: CountingAo = CountingAo { posts: AtomicUsize::new(0) };
        let timer = Timer::new(&AO, 5);
        timer.arm(3);
        timer.tick_from_isr();
        timer.tick_from_isr();
        assert_eq!(AO.posts.load(Ordering::SeqCst), 0);
        timer.tick_from_isr();
        assert_eq!(AO.posts.load(Ordering::SeqCst), 1);
        // Further ticks with the timer disarmed do nothing.
        timer.tick_from_isr();
        assert_eq!(AO.posts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rearm_restarts_the_countdown() {
        static AO: CountingAo = CountingAo { posts: AtomicUsize::new(0) };
        let timer = Timer::new(&AO, 5);
        timer.arm(2);
        timer.tick_from_isr();
        timer.rearm(2);
        timer.tick_from_isr();
        assert_eq!(AO.posts.load(Ordering::SeqCst), 0);
        timer.tick_from_isr();
        assert_eq!(AO.posts.load(Ordering::SeqCst), 1);
    }
}
