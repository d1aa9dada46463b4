//! Stand-ins for the STM32 transmit DMA stream and its interrupt mask.
//!
//! `SoftDma` only records the armed block. The SysTick handler of an example
//! plays the transfer-complete interrupt: it calls [`on_tick`], which pushes
//! the block out of UART0 and reports completion to the link.

use crate::{exit_failure, uart};
use bsp_nucleo_f446::tty::{IrqMask, TransferEvent, TxDma, TxLink};
use core::{
    cell::Cell,
    ptr::with_exposed_provenance,
    sync::atomic::{AtomicUsize, Ordering},
};
use critical_section::Mutex;

/// Address and length of the armed block.
static ACTIVE: Mutex<Cell<Option<(usize, usize)>>> = Mutex::new(Cell::new(None));
static TRANSFERS: AtomicUsize = AtomicUsize::new(0);

pub struct SoftDma;

impl TxDma for SoftDma {
    fn start(&mut self, block: &[u8]) {
        let armed = critical_section::with(|cs| {
            ACTIVE
                .borrow(cs)
                .replace(Some((block.as_ptr().expose_provenance(), block.len())))
        });
        if armed.is_some() || block.is_empty() {
            defmt::error!("bad transfer start");
            exit_failure();
        }
    }

    fn stop(&mut self) {}
}

/// Masks every interrupt with PRIMASK.
///
/// Clearing TICKINT would not drop a SysTick that is already pending, so the
/// examples mask globally.
pub struct IrqOff;

impl IrqMask for IrqOff {
    fn mask(&self) {
        cortex_m::interrupt::disable();
    }

    fn unmask(&self) {
        // SAFETY: The examples never nest masked sections.
        unsafe { cortex_m::interrupt::enable() };
    }
}

/// Completes the armed transfer, if any.
///
/// Must only be called from the SysTick handler.
pub fn on_tick<const N: usize>(link: &TxLink<'_, SoftDma, N>) {
    let Some((addr, len)) = critical_section::with(|cs| ACTIVE.borrow(cs).take()) else {
        return;
    };
    // SAFETY: The block stays reserved in the queue until the completion below.
    let block = unsafe { core::slice::from_raw_parts(with_exposed_provenance::<u8>(addr), len) };
    uart::write_bytes(block);
    TRANSFERS.fetch_add(1, Ordering::Relaxed);

    // SAFETY: We are the transfer-complete interrupt; the writer masks it
    // around every kick.
    if unsafe { link.on_transfer_event(TransferEvent::Complete) }.is_err() {
        exit_failure();
    }
}

/// Returns `true` while a block is armed.
pub fn busy() -> bool {
    critical_section::with(|cs| ACTIVE.borrow(cs).get().is_some())
}

/// Number of completed transfers.
pub fn transfers() -> usize {
    TRANSFERS.load(Ordering::Relaxed)
}
