// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single signal, private to this crate, carrying the peripheral's
//! event/error/DMA interrupt outcome back into the bus manager's own
//! mailbox. Everything the bus manager's state table calls "EV5", "EV6",
//! "EV8" or "DMA-complete" arrives here generically — which phase just
//! finished is implied by whatever state the manager was already in, since
//! only one primitive is ever in flight at a time.
//!
//! Appended after [`cb_kernel::signal::MAX_SHARED_SIG`], per the signal
//! space's own extension rule.

use cb_kernel::signal::{Signal, MAX_SHARED_SIG};

pub const FIRST: Signal = MAX_SHARED_SIG + 1;
pub const HW_COMPLETE: Signal = FIRST;
pub const LAST: Signal = HW_COMPLETE;
