//! Blocking writes larger than the transmit queue, drained by SysTick playing
//! the DMA transfer-complete interrupt. The wire output ends up on UART0.
#![no_std]
#![no_main]

use bsp_nucleo_f446::{
    Fifo,
    tty::{TtyWrite, TtyWriter, TxLink, WriteMode},
};
use core::{cell::Cell, fmt::Write as _};
use critical_section::Mutex;
use panic_semihosting as _;
use testsuite::{
    entry, exception, exit_failure, exit_success,
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

    let mut tty = TtyWriter::new(producer, link, IrqOff, WriteMode::Blocking);
    start_systick(2_000);

    let accepted = tty.write(b"The quick brown fox jumps over the lazy dog\n");
    defmt::info!("accepted {=usize}", accepted);
    for i in 0..5 {
        if writeln!(tty, "line {} of {}", i, 5).is_err() {
            exit_failure();
        }
    }
    defmt::info!("send_data {}", tty.send_data(b"bye\n"));

    while link.in_flight() != 0 || soft_dma::busy() {
        cortex_m::asm::nop();
    }
    defmt::info!("lost {=u32}", tty.lost());
    defmt::info!("several transfers: {=bool}", soft_dma::transfers() > 2);
    exit_success();
}

#[exception]
fn SysTick() {
    if let Some(link) = critical_section::with(|cs| LINK.borrow(cs).get()) {
        soft_dma::on_tick(link);
    }
}
