// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hierarchical state dispatch and the active-object mailbox.
//!
//! The original firmware models each active object as hand-written C
//! dispatch tables mixed with generated glue. Here a state is a plain value
//! (`H::State`, typically a field-less enum) and the transition function is
//! `(AO, Event) -> Transition`. Entry/exit actions are driven by this
//! module's dispatcher along the least-common-ancestor path, never
//! hand-written per transition.

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Deque;
use heapless::Vec as HVec;

use cb_error::CbError;

use crate::event::Event;
use crate::pool::AnyEvent;

pub type Priority = u8;

/// Priority zero is reserved/invalid.
pub const INVALID_PRIORITY: Priority = 0;

/// The outcome of handling one event in one state.
#[derive(Debug)]
pub enum Trans<S> {
    /// The event was consumed; no state change.
    Handled,
    /// This state does not handle the event; try the parent state.
    Unhandled,
    /// Take a state transition, running exit/entry actions along the way.
    Transition(S),
}

/// The hierarchical state machine owned by one active object.
///
/// `State` is usually a small `Copy` enum. `parent` encodes the state
/// hierarchy as a tree (`None` at the root); `handle` is the per-state
/// transition function; `enter`/`exit` are the actions the dispatcher fires
/// while crossing state boundaries.
pub trait Hsm {
    type State: Copy + PartialEq;

    fn handle(&mut self, state: Self::State, event: &Event) -> Trans<Self::State>;
    fn parent(&self, state: Self::State) -> Option<Self::State>;
    fn enter(&mut self, _state: Self::State) {}
    fn exit(&mut self, _state: Self::State) {}
}

/// Maximum state-nesting depth the LCA walk supports. Four levels covers
/// every hierarchy in this crate (e.g. `Busy > SendingPage > SendMemAddr`).
const MAX_STATE_DEPTH: usize = 8;

fn ancestor_chain<H: Hsm>(logic: &H, start: H::State) -> HVec<H::State, MAX_STATE_DEPTH> {
    let mut chain = HVec::new();
    let mut s = start;
    loop {
        // An unwrap here would only fail if a hierarchy were deeper than
        // MAX_STATE_DEPTH, which is a programming error in the HSM's shape,
        // not a runtime condition; the original firmware has the same
        // implicit depth bound via its fixed dispatch tables.
        chain.push(s).ok();
        match logic.parent(s) {
            Some(p) => s = p,
            None => break,
        }
    }
    chain
}

fn run_transition<H: Hsm>(logic: &mut H, from: H::State, to: H::State) {
    let from_chain = ancestor_chain(logic, from);
    let to_chain = ancestor_chain(logic, to); // leaf-to-root order

    let lca = from_chain.iter().find(|s| to_chain.contains(s)).copied();

    for &s in from_chain.iter() {
        if Some(s) == lca {
            break;
        }
        logic.exit(s);
    }

    let mut skipping = lca.is_some();
    for &s in to_chain.iter().rev() {
        if skipping {
            if Some(s) == lca {
                skipping = false;
            }
            continue;
        }
        logic.enter(s);
    }
}

/// Dispatch one event against `logic`'s current state, delegating to parent
/// states on `Unhandled` and firing entry/exit actions on `Transition`.
///
/// An event that reaches the root state still `Unhandled` is silently
/// dropped, matching the QHsm convention: a state must either handle an
/// event, ignore it (delegate to parent), or emit a transition — delegating
/// all the way to the root *is* ignoring it.
pub fn dispatch<H: Hsm>(logic: &mut H, current: &mut H::State, event: &Event) {
    let mut state = *current;
    loop {
        match logic.handle(state, event) {
            Trans::Handled => return,
            Trans::Unhandled => match logic.parent(state) {
                Some(parent) => state = parent,
                None => return,
            },
            Trans::Transition(target) => {
                run_transition(logic, *current, target);
                *current = target;
                return;
            }
        }
    }
}

/// A fixed-capacity, multi-producer/single-consumer mailbox.
///
/// Guarded by a critical section rather than an `spsc` queue because both
/// task code and ISRs post into the same AO's mailbox (the `post`/
/// `post_from_isr` pair).
pub struct Mailbox<const N: usize> {
    queue: Mutex<RefCell<Deque<AnyEvent, N>>>,
}

impl<const N: usize> Mailbox<N> {
    pub const fn new() -> Self {
        Self { queue: Mutex::new(RefCell::new(Deque::new())) }
    }

    /// Enqueue an event. A full mailbox is a fatal condition: mailboxes
    /// must be sized for the measured worst case rather than degrade
    /// silently.
    pub fn push(&self, event: AnyEvent) {
        let overflowed = critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().push_back(event));
        if overflowed.is_err() {
            panic!("active object mailbox full");
        }
    }

    pub fn pop(&self) -> Option<AnyEvent> {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().pop_front())
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.queue.borrow(cs).borrow().is_empty())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow(cs).borrow().len())
    }
}

impl<const N: usize> Default for Mailbox<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// The object-safe face every active object presents to the scheduler,
/// publish/subscribe fabric, and timer subsystem.
///
/// Concrete AOs (bus manager, device manager, settings DB) own a `Mailbox`
/// and an `Hsm` impl internally (behind a `StaticCell`, per the "static
/// singletons" design note) and implement this trait by delegating to them.
pub trait ActiveObject: Sync {
    fn priority(&self) -> Priority;

    fn name(&self) -> &'static str;

    /// Enqueue an event from task context.
    fn post(&self, event: AnyEvent) -> Result<(), CbError>;

    /// Enqueue an event from interrupt context. Implementations must not
    /// allocate, take a lock that task code can hold across a yield point,
    /// or run state-machine code from this path — only enqueue.
    fn post_from_isr(&self, event: AnyEvent) -> Result<(), CbError> {
        self.post(event)
    }

    /// Process exactly one pending event, if any. Returns `true` if an
    /// event was processed (the scheduler uses this to decide whether to
    /// keep running this AO before moving to a lower-priority one).
    fn poll_once(&self) -> bool;

    /// Signal the device-level watchdog tick; a no-op for AOs that don't
    /// own one. The scheduler or a SysTick handler calls this on every
    /// kernel tick for every AO that registers a timer (see `timer.rs`).
    fn tick(&self) {}
}
