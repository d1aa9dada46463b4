//! Non-blocking writes into a transmit queue nobody drains yet: the overflow
//! is cut off and counted. Draining starts afterwards.
#![no_std]
#![no_main]

use bsp_nucleo_f446::{
    Fifo,
    tty::{TtyWrite, TtyWriter, TxLink, WriteMode},
};
use core::cell::Cell;
use critical_section::Mutex;
use panic_semihosting as _;
use testsuite::{
    entry, exception, exit_success,
    soft_dma::{self, IrqOff, SoftDma},
    start_systick,
};

type Link = TxLink<'static, SoftDma, 16>;

static mut FIFO: Fifo<16> = Fifo::new();
static mut SLOT: Option<Link> = None;
static LINK: Mutex<Cell<Option<&'static Link>>> = Mutex::new(Cell::new(None));

#[entry]
fn main() -> ! {
    // SAFETY: `main` runs once, these are the only references.
    let fifo = unsafe { &mut *(&raw mut FIFO) };
    let (producer, consumer) = fifo.split();
    // SAFETY: As above.
    let link: &'static Link = unsafe { &mut *(&raw mut SLOT) }.insert(TxLink::new(consumer, SoftDma));
    critical_section::with(|cs| LINK.borrow(cs).set(Some(link)));

    let mut tty = TtyWriter::new(producer, link, IrqOff, WriteMode::NonBlocking);

    defmt::info!("accepted {=usize}", tty.write(b"0123456789"));
    defmt::info!("accepted {=usize}", tty.write(b"ABCDEFGHIJ"));
    defmt::info!("in flight {=usize}", link.in_flight());
    defmt::info!("send_data {}", tty.send_data(b"!"));
    defmt::info!("lost {=u32}", tty.lost());

    start_systick(2_000);
    while link.in_flight() != 0 || soft_dma::busy() {
        cortex_m::asm::nop();
    }
    defmt::info!("free {=usize}", tty.free_space());

    defmt::info!("accepted {=usize}", tty.write(b"\n"));
    while link.in_flight() != 0 || soft_dma::busy() {
        cortex_m::asm::nop();
    }
    exit_success();
}

#[exception]
fn SysTick() {
    if let Some(link) = critical_section::with(|cs| LINK.borrow(cs).get()) {
        soft_dma::on_tick(link);
    }
}
