//! User button interrupt on EXTI line 13.

use super::{enable_irq, gpio, pac, rcc};
use crate::{
    config,
    fatal::{Fatal, Source, fatal},
};

/// EXTI line of [`gpio::BUTTON`].
const LINE: u32 = 13;

fn exti() -> &'static pac::exti::RegisterBlock {
    // SAFETY: Fixed EXTI address. Line 13 is only configured in `init` and
    // its pending bit only cleared in `on_exti15_10`.
    unsafe { &*pac::EXTI::ptr() }
}

/// Routes the button pin to its EXTI line, triggering on the falling edge
/// (button pressed), and enables the interrupt.
///
/// Install the action with [`crate::exti::BUTTON`] first, an interrupt
/// without a callback is fatal.
pub fn init() {
    rcc().apb2enr.modify(|_, w| w.syscfgen().enabled());
    let _ = rcc().apb2enr.read();

    // SAFETY: Fixed SYSCFG address, nothing else routes EXTI lines.
    let syscfg = unsafe { &*pac::SYSCFG::ptr() };
    // SAFETY: Port numbers 0 to 7 are valid EXTICR selections.
    syscfg
        .exticr4
        .modify(|_, w| unsafe { w.exti13().bits(gpio::BUTTON.port() as u8) });

    let exti = exti();
    exti.rtsr.modify(|_, w| w.tr13().clear_bit());
    exti.ftsr.modify(|_, w| w.tr13().set_bit());
    exti.imr.modify(|_, w| w.mr13().set_bit());

    enable_irq(pac::Interrupt::EXTI15_10, config::IRQ_PRIO_EXTI);
    debug!("button on exti line {}", LINE);
}

/// `EXTI15_10` handler.
pub fn on_exti15_10() {
    let exti = exti();
    if exti.pr.read().pr13().bit_is_set() {
        // Write one to clear, zeros leave the other lines pending.
        // SAFETY: Only the bit of line 13 is written.
        exti.pr.write(|w| unsafe { w.bits(1 << LINE) });
        crate::exti::BUTTON.dispatch();
    } else {
        fatal(Fatal::UnexpectedInterrupt(Source::Exti15_10));
    }
}
