//! Interrupt callbacks and the fatal error policy: dispatching the button
//! event without a registered callback ends in the installed handler.
#![no_std]
#![no_main]

use bsp_nucleo_f446::{
    exti,
    fatal::{self, Fatal},
};
use core::sync::atomic::{AtomicU32, Ordering};
use panic_semihosting as _;
use testsuite::{entry, exit_failure, exit_success};

static PRESSES: AtomicU32 = AtomicU32::new(0);

fn on_press() {
    PRESSES.fetch_add(1, Ordering::Relaxed);
}

fn handler(reason: Fatal) -> ! {
    defmt::info!("handler got {}", reason);
    if reason == Fatal::MissingCallback(fatal::Source::Button) {
        exit_success();
    }
    exit_failure();
}

#[entry]
fn main() -> ! {
    fatal::set_handler(handler);

    exti::BUTTON.set(on_press);
    exti::BUTTON.dispatch();
    exti::BUTTON.dispatch();
    defmt::info!("presses {=u32}", PRESSES.load(Ordering::Relaxed));

    exti::BUTTON.clear();
    defmt::info!("callback set {=bool}", exti::BUTTON.is_set());
    exti::BUTTON.dispatch();

    defmt::error!("dispatch returned");
    exit_failure();
}
