// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reference-counted event pools.
//!
//! The original firmware's event pools are tiered by *payload struct size*
//! (one C union member per signal). Here every [`Event`](crate::event::Event)
//! is a single fixed-size `Copy` enum, so the three tiers below differ only
//! in *capacity*, not in slot size — a deliberate simplification recorded in
//! `DESIGN.md`. Allocation still picks the requested tier first and spills
//! into the next larger tier on exhaustion.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::event::{Event, Payload};
use crate::signal::Signal;

pub const SMALL_CAP: usize = 8;
pub const MEDIUM_CAP: usize = 8;
pub const LARGE_CAP: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolTag {
    Small,
    Medium,
    Large,
}

#[derive(Clone, Copy)]
struct Slot {
    event: Event,
    refcount: u8,
}

impl Slot {
    const fn empty() -> Self {
        Self { event: Event { signal: 0, payload: Payload::Empty }, refcount: 0 }
    }
}

/// Operations common to every tier, erased so [`EventPool`] can address its
/// three differently-sized tiers through a single reference.
trait TierOps: Sync {
    fn alloc(&self, event: Event) -> Option<u8>;
    fn inc(&self, index: u8);
    /// Decrement the slot's refcount; returns `true` if it just reached zero.
    fn dec(&self, index: u8) -> bool;
    fn get(&self, index: u8) -> Event;
}

struct Tier<const N: usize> {
    slots: Mutex<RefCell<[Slot; N]>>,
}

impl<const N: usize> Tier<N> {
    const fn new() -> Self {
        Self { slots: Mutex::new(RefCell::new([Slot::empty(); N])) }
    }
}

impl<const N: usize> TierOps for Tier<N> {
    fn alloc(&self, event: Event) -> Option<u8> {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow(cs).borrow_mut();
            for (i, slot) in slots.iter_mut().enumerate() {
                if slot.refcount == 0 {
                    slot.event = event;
                    slot.refcount = 1;
                    return Some(i as u8);
                }
            }
            None
        })
    }

    fn inc(&self, index: u8) {
        critical_section::with(|cs| {
            self.slots.borrow(cs).borrow_mut()[index as usize].refcount += 1;
        });
    }

    fn dec(&self, index: u8) -> bool {
        critical_section::with(|cs| {
            let mut slots = self.slots.borrow(cs).borrow_mut();
            let slot = &mut slots[index as usize];
            debug_assert!(slot.refcount > 0, "garbage-collect of an unreferenced event slot");
            slot.refcount -= 1;
            slot.refcount == 0
        })
    }

    fn get(&self, index: u8) -> Event {
        critical_section::with(|cs| self.slots.borrow(cs).borrow()[index as usize].event)
    }
}

/// The process-wide small/medium/large event pools.
///
/// One instance lives for the lifetime of the program, as a `'static`; every
/// [`EventRef`] it hands out carries a pointer back to it so `Clone`/`Drop`
/// can manage the refcount without a global lookup.
pub struct EventPool {
    small: Tier<SMALL_CAP>,
    medium: Tier<MEDIUM_CAP>,
    large: Tier<LARGE_CAP>,
}

impl EventPool {
    pub const fn new() -> Self {
        Self { small: Tier::new(), medium: Tier::new(), large: Tier::new() }
    }

    fn tier(&self, tag: PoolTag) -> &dyn TierOps {
        match tag {
            PoolTag::Small => &self.small,
            PoolTag::Medium => &self.medium,
            PoolTag::Large => &self.large,
        }
    }

    fn spill_order(tag: PoolTag) -> &'static [PoolTag] {
        match tag {
            PoolTag::Small => &[PoolTag::Small, PoolTag::Medium, PoolTag::Large],
            PoolTag::Medium => &[PoolTag::Medium, PoolTag::Large],
            PoolTag::Large => &[PoolTag::Large],
        }
    }

    fn try_allocate(&'static self, tag: PoolTag, event: Event) -> Option<EventRef> {
        for &t in Self::spill_order(tag) {
            if let Some(index) = self.tier(t).alloc(event) {
                return Some(EventRef { pool: self, tag: t, index });
            }
        }
        None
    }

    /// Allocate from `tag`, spilling into larger tiers on exhaustion.
    ///
    /// Fails only when `tag` and every larger tier are also full, which is a
    /// fatal condition equivalent to the original firmware's `Q_ASSERT`.
    pub fn allocate(&'static self, tag: PoolTag, signal: Signal, payload: Payload) -> EventRef {
        self.try_allocate(tag, Event::new(signal, payload))
            .unwrap_or_else(|| panic!("event pool exhausted: {:?} and all larger pools are full", tag))
    }

    /// Allocate, returning `None` on exhaustion instead of panicking.
    ///
    /// Used by paths (debug-print) that must tolerate pool pressure rather
    /// than bring the board down over a lost diagnostic message.
    pub fn allocate_with_margin(&'static self, tag: PoolTag, signal: Signal, payload: Payload) -> Option<EventRef> {
        self.try_allocate(tag, Event::new(signal, payload))
    }
}

impl Default for EventPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A reference-counted handle to a pool-allocated event.
///
/// `Clone` increments the slot's refcount (this is what "publish to N
/// subscribers" does under the hood); `Drop` decrements it and the slot
/// returns to its pool when the count reaches zero. This is the Rust
/// expression of an explicit `allocate`/`garbage-collect` pair: the pair is
/// just `EventRef`'s constructor and destructor.
pub struct EventRef {
    pool: &'static EventPool,
    tag: PoolTag,
    index: u8,
}

impl EventRef {
    pub fn event(&self) -> Event {
        self.pool.tier(self.tag).get(self.index)
    }

    pub fn signal(&self) -> Signal {
        self.event().signal
    }

    pub fn payload(&self) -> Payload {
        self.event().payload
    }

    pub fn tag(&self) -> PoolTag {
        self.tag
    }
}

impl Clone for EventRef {
    fn clone(&self) -> Self {
        self.pool.tier(self.tag).inc(self.index);
        Self { pool: self.pool, tag: self.tag, index: self.index }
    }
}

impl Drop for EventRef {
    fn drop(&mut self) {
        self.pool.tier(self.tag).dec(self.index);
    }
}

/// Explicit `garbage_collect(event)`; equivalent to dropping the handle.
pub fn garbage_collect(event: EventRef) {
    drop(event);
}

/// An event traveling through a mailbox: either a pool-allocated,
/// reference-counted [`EventRef`], or a statically allocated event whose
/// refcount is not tracked (e.g. a recurring timer tick, which is re-sent
/// without ever touching a pool).
pub enum AnyEvent {
    Pooled(EventRef),
    Static(Event),
}

impl AnyEvent {
    pub fn event(&self) -> Event {
        match self {
            AnyEvent::Pooled(r) => r.event(),
            AnyEvent::Static(e) => *e,
        }
    }

    pub fn signal(&self) -> Signal {
        self.event().signal
    }
}
