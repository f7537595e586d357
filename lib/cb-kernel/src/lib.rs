// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The publish/subscribe active-object kernel every coupler-board AO runs
//! on: event pools and reference counting, hierarchical state dispatch,
//! mailboxes, the publish/subscribe fabric, one-shot timers, per-AO
//! deferred queues, and the cooperative priority scheduler.
//!
//! This crate has no knowledge of I2C, EEPROMs, or settings — it is a
//! generic substrate, generic over whatever signal space and `Hsm`
//! implementations sit on top of it (`cb-i2c-bus`, `cb-i2c-device`,
//! `cb-settings-db`).

#![cfg_attr(not(test), no_std)]

pub mod ao;
pub mod defer;
pub mod event;
pub mod pool;
pub mod pubsub;
pub mod sched;
pub mod signal;
pub mod timer;

pub use ao::{dispatch, ActiveObject, Hsm, Mailbox, Priority, Trans, INVALID_PRIORITY};
pub use defer::DeferredQueue;
pub use event::{Direction, Event, Payload, RawBuf};
pub use pool::{garbage_collect, AnyEvent, EventPool, EventRef, PoolTag};
pub use pubsub::PubSub;
pub use sched::Scheduler;
pub use signal::Signal;
pub use timer::{ms_to_ticks, seconds_to_ticks, Timer, TimerWheel, TICKS_PER_SECOND};
