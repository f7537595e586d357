// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Coupler-board firmware entry point.
//!
//! Wires one STM32F407 I2C peripheral into the event-driven stack: an
//! [`I2cBusManager`] owning the hardware, an [`I2cDeviceManager`] sequencing
//! the EEPROM/SN-ROM/EUI-ROM transactions against it, and a settings DB
//! consulted once at boot through the synchronous blocking path before the
//! scheduler starts. The second physical I2C bus this board carries has no
//! devices on it in the current revision (see `cb_device_registry::BusId`
//! and `DESIGN.md`) and so is not instantiated here.
//!
//! No comm/menu layer exists yet (out of scope); `HOST_LINK` is the handoff
//! point a future such layer would drain completion events from.

#![no_std]
#![no_main]

use core::cell::Cell;
use core::mem::MaybeUninit;

use cortex_m_rt::entry;
use critical_section::Mutex;
use panic_halt as _;
use stm32f4::stm32f407::{interrupt, Peripherals};

use cb_error::CbError;
use cb_i2c_bus::{I2cBusManager, RecoveryPins, Stm32F4I2cHw};
use cb_i2c_device::{BlockingDeviceManager, I2cDeviceManager, Stm32F4BlockingI2cHw};
use cb_kernel::ao::{ActiveObject, Mailbox, Priority};
use cb_kernel::pool::{AnyEvent, EventPool};
use cb_kernel::sched::Scheduler;
use cb_settings_db::{Element, SettingsDb};

/// Forwards completion events from the bus manager to the device manager
/// that issued the primitive. Breaks the construction-order cycle between
/// the two real singletons below: `I2cBusManager::new` needs its requester
/// up front, but the device manager's own constructor needs `&'static
/// BUS0` — so neither can be built first naming the other directly. Wired
/// once in [`main`], before either manager is ever posted to; the same
/// `Mutex<Cell<Option<_>>>` shape `Stm32F4I2cHw` uses for its own `attach`.
struct ReplyRelay {
    target: Mutex<Cell<Option<&'static dyn ActiveObject>>>,
}

impl ReplyRelay {
    const fn new() -> Self {
        Self { target: Mutex::new(Cell::new(None)) }
    }

    fn attach(&self, target: &'static dyn ActiveObject) {
        critical_section::with(|cs| self.target.borrow(cs).set(Some(target)));
    }
}

impl ActiveObject for ReplyRelay {
    // Never scheduled directly — only exists to satisfy the trait.
    fn priority(&self) -> Priority {
        1
    }

    fn name(&self) -> &'static str {
        "bus0-to-dev0-relay"
    }

    fn post(&self, event: AnyEvent) -> Result<(), CbError> {
        match critical_section::with(|cs| self.target.borrow(cs).get()) {
            Some(target) => target.post(event),
            None => Ok(()),
        }
    }

    fn poll_once(&self) -> bool {
        false
    }
}

/// Where device-manager completions (`DEV_READ_DONE`/`DEV_WRITE_DONE`) land
/// until a comm/menu layer exists to drain them (out of scope here).
struct HostLink {
    mailbox: Mailbox<16>,
}

impl HostLink {
    const fn new() -> Self {
        Self { mailbox: Mailbox::new() }
    }
}

impl ActiveObject for HostLink {
    fn priority(&self) -> Priority {
        1
    }

    fn name(&self) -> &'static str {
        "host-link"
    }

    fn post(&self, event: AnyEvent) -> Result<(), CbError> {
        self.mailbox.push(event);
        Ok(())
    }

    fn poll_once(&self) -> bool {
        false
    }
}

static RELAY: ReplyRelay = ReplyRelay::new();
static HOST_LINK: HostLink = HostLink::new();

/// The one event pool this board's two active objects share. A single bus
/// and a single device manager never have more than a handful of requests
/// in flight, so there is no need for a pool per manager.
static EVENT_POOL: EventPool = EventPool::new();

// `Stm32F4I2cHw`/`I2cBusManager`/`I2cDeviceManager` all need a peripheral
// singleton only `Peripherals::take()` hands out at runtime, so unlike
// `RELAY`/`HOST_LINK` above they cannot be plain `static` items with a
// `const` initializer. Each gets fixed storage here and is written exactly
// once in `main`, before interrupts are unmasked; every access after that,
// from `main` or from an ISR, is a shared `&'static` reference into
// already-initialized storage.
static mut BUS0_HW_STORAGE: MaybeUninit<Stm32F4I2cHw> = MaybeUninit::uninit();
static mut BUS0_STORAGE: MaybeUninit<I2cBusManager<Stm32F4I2cHw>> = MaybeUninit::uninit();
static mut DEV0_STORAGE: MaybeUninit<I2cDeviceManager> = MaybeUninit::uninit();

fn bus0_hw() -> &'static Stm32F4I2cHw {
    unsafe { BUS0_HW_STORAGE.assume_init_ref() }
}

fn bus0() -> &'static I2cBusManager<Stm32F4I2cHw> {
    unsafe { BUS0_STORAGE.assume_init_ref() }
}

fn dev0() -> &'static I2cDeviceManager {
    unsafe { DEV0_STORAGE.assume_init_ref() }
}

const I2C1_CLOCK_HZ: u32 = 42_000_000; // assumed APB1 clock; board clock-tree bring-up is out of scope

fn configure_i2c1_pins_and_clock(rcc: &stm32f4::stm32f407::RCC, gpiob: &stm32f4::stm32f407::GPIOB, i2c1: &stm32f4::stm32f407::I2C1) {
    rcc.ahb1enr.modify(|_, w| w.gpioben().set_bit());
    rcc.apb1enr.modify(|_, w| w.i2c1en().set_bit());

    // PB6 = SCL, PB7 = SDA: alternate function, open-drain, pull-up, AF4.
    gpiob.moder.modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << 12) & !(0b11 << 14)) | (0b10 << 12) | (0b10 << 14)) });
    gpiob.otyper.modify(|r, w| unsafe { w.bits(r.bits() | (1 << 6) | (1 << 7)) });
    gpiob.ospeedr.modify(|r, w| unsafe { w.bits(r.bits() | (0b11 << 12) | (0b11 << 14)) });
    gpiob.pupdr.modify(|r, w| unsafe { w.bits((r.bits() & !(0b11 << 12) & !(0b11 << 14)) | (0b01 << 12) | (0b01 << 14)) });
    gpiob.afrl.modify(|r, w| unsafe { w.bits((r.bits() & !(0xF << 24) & !(0xF << 28)) | (4 << 24) | (4 << 28)) });

    i2c1.cr1.modify(|_, w| w.pe().clear_bit());
    i2c1.cr2.modify(|_, w| unsafe { w.freq().bits((I2C1_CLOCK_HZ / 1_000_000) as u8) });
    // Standard mode, 400 kHz target per the device on-the-wire protocol.
    let ccr = (I2C1_CLOCK_HZ / (2 * 400_000)).max(4) as u16;
    i2c1.ccr.modify(|_, w| unsafe { w.ccr().bits(ccr) });
    i2c1.trise.modify(|_, w| w.trise().bits(((I2C1_CLOCK_HZ / 1_000_000) + 1) as u8));
    i2c1.cr1.modify(|_, w| w.pe().set_bit());
}

#[entry]
fn main() -> ! {
    let dp = Peripherals::take().expect("Peripherals::take must succeed exactly once at boot");

    configure_i2c1_pins_and_clock(&dp.RCC, &dp.GPIOB, &dp.I2C1);

    // Settle the settings DB before the scheduler exists, through the
    // synchronous blocking path driven directly off the same I2C1
    // register block (the boot-time half of the settings DB's job).
    {
        let blocking_hw = Stm32F4BlockingI2cHw::new(&dp.I2C1);
        let blocking_dm = BlockingDeviceManager::new(&blocking_hw);
        let settings = SettingsDb::new(&blocking_dm);
        if settings.is_valid().is_err() {
            settings.init_to_default().expect("EEPROM must accept the default record on first boot");
        }
        let mut ip = [0u8; 4];
        settings.get_element(Element::IpAddress, &mut ip).ok();
    }

    // SAFETY: single-threaded, pre-interrupt-unmask context; nothing else
    // can observe this storage until the `attach`/`NVIC::unmask` calls
    // below, which happen after every write here.
    unsafe {
        BUS0_HW_STORAGE.write(Stm32F4I2cHw::new(dp.I2C1, dp.GPIOB, RecoveryPins { scl_pin: 6, sda_pin: 7 }));
    }
    let hw = bus0_hw();

    unsafe {
        BUS0_STORAGE.write(I2cBusManager::new(hw, &RELAY, &EVENT_POOL, 9, "i2c-bus-0"));
    }
    let bus0 = bus0();

    unsafe {
        DEV0_STORAGE.write(I2cDeviceManager::new(bus0, &HOST_LINK, &EVENT_POOL, 8, "i2c-dev-0"));
    }
    let dev0 = dev0();

    hw.attach(bus0);
    RELAY.attach(dev0);

    let scheduler: Scheduler<2> = Scheduler::new([bus0, dev0]);

    unsafe {
        cortex_m::peripheral::NVIC::unmask(interrupt::I2C1_EV);
        cortex_m::peripheral::NVIC::unmask(interrupt::I2C1_ER);
    }

    loop {
        if !scheduler.run_once() {
            cortex_m::asm::wfi();
        }
    }
}

#[interrupt]
fn I2C1_EV() {
    bus0_hw().on_event_interrupt();
}

#[interrupt]
fn I2C1_ER() {
    bus0_hw().on_error_interrupt();
}

/// SysTick drives both AOs' watchdog/primitive-timeout countdowns
/// (`ActiveObject::tick`, the kernel tick at 10 000/s).
#[cortex_m_rt::exception]
fn SysTick() {
    bus0().tick();
    dev0().tick();
}
