// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bus manager's state set and the per-state timeout each one arms on
//! entry. The hierarchy is flat — every state is a direct child of the
//! (implicit) root — since the original firmware's bus-primitive states
//! never nest.

use cb_kernel::timer::ms_to_ticks;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusState {
    Idle,
    /// SDA-stuck-low recovery: bit-bang SCL up to nine times while sampling
    /// SDA, then re-initialize the peripheral.
    CheckingFree,
    GenStart,
    SendAddr,
    SendMemAddr,
    ReadingMem,
    WritingMem,
}

/// Bounded timeout armed on entry to each non-idle state, in kernel ticks.
/// Bus recovery gets the longest budget since it may bit-bang up to nine
/// clock pulses; the rest are single-byte-scale peripheral interrupts.
pub fn timeout_ticks(state: BusState) -> u32 {
    match state {
        BusState::Idle => 0,
        BusState::CheckingFree => ms_to_ticks(50),
        BusState::GenStart => ms_to_ticks(5),
        BusState::SendAddr => ms_to_ticks(5),
        BusState::SendMemAddr => ms_to_ticks(5),
        BusState::ReadingMem => ms_to_ticks(20),
        BusState::WritingMem => ms_to_ticks(20),
    }
}
