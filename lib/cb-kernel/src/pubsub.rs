// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The process-wide publish/subscribe fabric.
//!
//! A signal-indexed table of subscriber lists. `publish` allocates one
//! event from the given pool, clones an [`EventRef`] for each subscriber
//! (incrementing the refcount once per subscriber), and posts it to every
//! subscriber's mailbox. Direct `post` to a single AO is publish with one
//! subscriber and needs no table lookup.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec as HVec;

use cb_error::CbError;

use crate::ao::ActiveObject;
use crate::event::Payload;
use crate::pool::{AnyEvent, EventPool, PoolTag};
use crate::signal::{Signal, MAX_SHARED_SIG};

/// Maximum number of active objects that may subscribe to a single signal.
pub const MAX_SUBSCRIBERS_PER_SIGNAL: usize = 4;

/// One row of the subscriber table. `Option<&dyn ActiveObject>` is `Copy`
/// (it's just a fat pointer), which is what lets the whole table be built
/// with a `const` array-repeat expression instead of needing a heap or a
/// lazily-initialized collection.
type Row = [Option<&'static dyn ActiveObject>; MAX_SUBSCRIBERS_PER_SIGNAL];

const EMPTY_ROW: Row = [None; MAX_SUBSCRIBERS_PER_SIGNAL];

/// Number of rows: one per signal in the shared signal space.
const NUM_ROWS: usize = MAX_SHARED_SIG as usize + 1;

pub struct PubSub {
    table: Mutex<RefCell<[Row; NUM_ROWS]>>,
}

impl PubSub {
    pub const fn new() -> Self {
        Self { table: Mutex::new(RefCell::new([EMPTY_ROW; NUM_ROWS])) }
    }

    /// Register `ao` as a subscriber to `signal`. Subscriptions happen once
    /// at startup, never at runtime, so overflow of a row is a programming
    /// error rather than a condition the caller needs to recover from.
    pub fn subscribe(&self, signal: Signal, ao: &'static dyn ActiveObject) {
        critical_section::with(|cs| {
            let mut table = self.table.borrow(cs).borrow_mut();
            let row = &mut table[signal as usize];
            for slot in row.iter_mut() {
                if slot.is_none() {
                    *slot = Some(ao);
                    return;
                }
            }
            panic!("subscriber table full for signal {}", signal);
        });
    }

    fn subscribers(&self, signal: Signal) -> HVec<&'static dyn ActiveObject, MAX_SUBSCRIBERS_PER_SIGNAL> {
        critical_section::with(|cs| {
            self.table.borrow(cs).borrow()[signal as usize]
                .iter()
                .filter_map(|s| *s)
                .collect()
        })
    }

    /// Publish `signal`/`payload`, allocated from `tag`, to every
    /// subscriber. A signal with zero subscribers is a no-op: nothing is
    /// allocated, so there is nothing to reclaim.
    pub fn publish(&self, pool: &'static EventPool, tag: PoolTag, signal: Signal, payload: Payload) {
        let subs = self.subscribers(signal);
        if subs.is_empty() {
            return;
        }
        let first = pool.allocate(tag, signal, payload);
        for ao in subs.iter() {
            ao.post(AnyEvent::Pooled(first.clone())).unwrap_or_else(|e| {
                panic!("publish to {} failed: {:?}", ao.name(), e);
            });
        }
        // `first`'s own reference is released now that every subscriber
        // holds its own clone; the refcount set by the loop above is
        // exactly the subscriber count.
        drop(first);
    }

    /// Allocate and post directly to one AO, bypassing the subscriber
    /// table. Equivalent to `publish` with exactly one (implicit)
    /// subscriber.
    pub fn post(&self, pool: &'static EventPool, tag: PoolTag, ao: &'static dyn ActiveObject, signal: Signal, payload: Payload) -> Result<(), CbError> {
        let ev = pool.allocate(tag, signal, payload);
        ao.post(AnyEvent::Pooled(ev))
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ao::Priority;
    use core::cell::RefCell as StdRefCell;

    struct RecordingAo {
        received: StdRefCell<HVec<Signal, 8>>,
    }

    impl ActiveObject for RecordingAo {
        fn priority(&self) -> Priority {
            1
        }
        fn name(&self) -> &'static str {
            "recording"
        }
        fn post(&self, event: AnyEvent) -> Result<(), CbError> {
            self.received.borrow_mut().push(event.signal()).ok();
            Ok(())
        }
        fn poll_once(&self) -> bool {
            false
        }
    }

    #[test]
    fn publish_reaches_every_subscriber_in_order() {
        static POOL: EventPool = EventPool::new();
        static PUBSUB: PubSub = PubSub::new();
        static AO_A: RecordingAo = RecordingAo { received: StdRefCell::new(HVec::new()) };
        static AO_B: RecordingAo = RecordingAo { received: StdRefCell::new(HVec::new()) };

        PUBSUB.subscribe(20, &AO_A);
        PUBSUB.subscribe(20, &AO_B);
        PUBSUB.publish(&POOL, PoolTag::Small, 20, Payload::Empty);

        assert_eq!(AO_A.received.borrow().as_slice(), &[20]);
        assert_eq!(AO_B.received.borrow().as_slice(), &[20]);
    }

    #[test]
    fn publish_with_no_subscribers_allocates_nothing() {
        static POOL: EventPool = EventPool::new();
        static PUBSUB: PubSub = PubSub::new();
        // A signal nobody subscribed to: should simply return without
        // touching the pool (and therefore without ever needing GC).
        PUBSUB.publish(&POOL, PoolTag::Small, 21, Payload::Empty);
    }
}
