// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative priority scheduling between active objects.
//!
//! A single-core interpreter loop: scan the AO list, highest priority
//! first, and run the first one with a pending event to completion (one
//! event, run-to-completion, never blocking). Then start the scan over —
//! this is what gives a newly-arrived high-priority event preemption over a
//! lower-priority AO that still has work queued, without needing real
//! thread preemption.

use crate::ao::ActiveObject;

pub struct Scheduler<const N: usize> {
    /// Active objects, in descending-priority order. Construction order is
    /// the caller's responsibility (typically a `const` array built once at
    /// board bring-up); `start` debug-asserts the ordering and uniqueness.
    aos: [&'static dyn ActiveObject; N],
}

impl<const N: usize> Scheduler<N> {
    pub fn new(aos: [&'static dyn ActiveObject; N]) -> Self {
        for w in aos.windows(2) {
            debug_assert!(w[0].priority() > w[1].priority(), "Scheduler::new expects AOs in descending-priority order");
        }
        for ao in aos.iter() {
            debug_assert_ne!(ao.priority(), crate::ao::INVALID_PRIORITY, "priority 0 is reserved");
        }
        Self { aos }
    }

    /// Run one scheduling pass: find the highest-priority AO with a pending
    /// event and let it process exactly one. Returns `true` if any AO did
    /// work.
    pub fn run_once(&self) -> bool {
        for ao in self.aos.iter() {
            if ao.poll_once() {
                return true;
            }
        }
        false
    }

    /// Drive the scheduler until every mailbox is empty. Used by host-side
    /// tests to run a scenario to quiescence without a hardware idle loop.
    #[cfg(any(test, feature = "test-util"))]
    pub fn run_to_quiescence(&self, max_iterations: usize) {
        for _ in 0..max_iterations {
            if !self.run_once() {
                return;
            }
        }
        panic!("scheduler did not reach quiescence within {} iterations", max_iterations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ao::{AnyEvent, Mailbox, Priority};
    use crate::event::{Event, Payload};
    use cb_error::CbError;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        priority: Priority,
        mailbox: Mailbox<4>,
        processed: AtomicUsize,
    }

    impl ActiveObject for Echo {
        fn priority(&self) -> Priority {
            self.priority
        }
        fn name(&self) -> &'static str {
            "echo"
        }
        fn post(&self, event: AnyEvent) -> Result<(), CbError> {
            self.mailbox.push(event);
            Ok(())
        }
        fn poll_once(&self) -> bool {
            match self.mailbox.pop() {
                Some(_) => {
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        }
    }

    #[test]
    fn higher_priority_ao_runs_first() {
        static HI: Echo = Echo { priority: 2, mailbox: Mailbox::new(), processed: AtomicUsize::new(0) };
        static LO: Echo = Echo { priority: 1, mailbox: Mailbox::new(), processed: AtomicUsize::new(0) };

        HI.post(AnyEvent::Static(Event::new(1, Payload::Empty))).unwrap();
        LO.post(AnyEvent::Static(Event::new(1, Payload::Empty))).unwrap();

        let sched: Scheduler<2> = Scheduler::new([&HI, &LO]);
        // First pass services HI (higher priority scanned first).
        assert!(sched.run_once());
        assert_eq!(HI.processed.load(Ordering::SeqCst), 1);
        assert_eq!(LO.processed.load(Ordering::SeqCst), 0);
        // Second pass services LO, since HI's mailbox is now empty.
        assert!(sched.run_once());
        assert_eq!(LO.processed.load(Ordering::SeqCst), 1);
        // Nothing left to do.
        assert!(!sched.run_once());
    }
}
