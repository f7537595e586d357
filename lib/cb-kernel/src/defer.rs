// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-AO deferred event queues.
//!
//! A busy active object defers events it cannot handle right now instead of
//! dropping them; `recall` moves the oldest deferred event back onto the
//! owning AO's mailbox. The default capacity is 100 outstanding deferred
//! events; this is a `const` generic here so each AO can size its own queue
//! (the device manager uses the default 100; smaller AOs can use less).

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;

use crate::ao::ActiveObject;
use crate::pool::AnyEvent;

/// The default deferred-queue capacity.
pub const DEFAULT_CAPACITY: usize = 100;

pub struct DeferredQueue<const N: usize> {
    queue: Mutex<RefCell<Deque<AnyEvent, N>>>,
}

impl<const N: usize> DeferredQueue<N> {
    pub const fn new() -> Self {
        Self { queue: Mutex::new(RefCell::new(Deque::new())) }
    }

    /// Defer `event`. Returns the event back to the caller if the queue is
    /// full, so the caller can report the overflow to the original sender
    /// (e.g. by publishing an `IGNORED` event) instead of silently dropping
    /// it.
    pub fn defer(&self, event: AnyEvent) -> Result<(), AnyEvent> {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().push_back(event))
    }

    /// Re-post the oldest deferred event onto `ao`'s mailbox. Returns
    /// `true` if there was one to recall. Called exactly once per
    /// transition back to `Idle`.
    pub fn recall(&self, ao: &dyn ActiveObject) -> bool {
        let oldest = critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().pop_front());
        match oldest {
            Some(event) => {
                let _ = ao.post(event);
                true
            }
            None => false,
        }
    }

    pub fn is_full(&self) -> bool {
        critical_section::with(|cs| self.queue.borrow(cs).borrow().is_full())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow(cs).borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<const N: usize> Default for DeferredQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ao::Priority;
    use crate::event::{Event, Payload};
    use cb_error::CbError;
    use core::cell::Cell;

    struct RecordingAo {
        last_signal: Cell<Option<u16>>,
    }

    impl ActiveObject for RecordingAo {
        fn priority(&self) -> Priority {
            1
        }
        fn name(&self) -> &'static str {
            "recording"
        }
        fn post(&self, event: AnyEvent) -> Result<(), CbError> {
            self.last_signal.set(Some(event.signal()));
            Ok(())
        }
        fn poll_once(&self) -> bool {
            false
        }
    }

    #[test]
    fn recall_is_fifo() {
        let q: DeferredQueue<4> = DeferredQueue::new();
        q.defer(AnyEvent::Static(Event::new(1, Payload::Empty))).ok().unwrap();
        q.defer(AnyEvent::Static(Event::new(2, Payload::Empty))).ok().unwrap();

        let ao = RecordingAo { last_signal: Cell::new(None) };
        assert!(q.recall(&ao));
        assert_eq!(ao.last_signal.get(), Some(1));
        assert!(q.recall(&ao));
        assert_eq!(ao.last_signal.get(), Some(2));
        assert!(!q.recall(&ao));
    }

    #[test]
    fn overflow_returns_the_event_instead_of_dropping_it() {
        let q: DeferredQueue<1> = DeferredQueue::new();
        q.defer(AnyEvent::Static(Event::new(1, Payload::Empty))).ok().unwrap();
        let rejected = q.defer(AnyEvent::Static(Event::new(2, Payload::Empty)));
        assert!(rejected.is_err());
        assert_eq!(rejected.err().unwrap().signal(), 2);
    }
}
