//! Receive path with SysTick playing the USART byte-ready interrupt, one byte
//! per tick from a script.
#![no_std]
#![no_main]

use bsp_nucleo_f446::{
    Fifo,
    tty::{RxLink, TtyRead, TtyReader},
};
use core::cell::Cell;
use critical_section::Mutex;
use panic_semihosting as _;
use testsuite::{entry, exception, exit_success, start_systick};

type Link = RxLink<'static, 8>;

static mut FIFO: Fifo<8> = Fifo::new();
static mut SLOT: Option<Link> = None;
static LINK: Mutex<Cell<Option<&'static Link>>> = Mutex::new(Cell::new(None));
/// Bytes still to arrive.
static SCRIPT: Mutex<Cell<&'static [u8]>> = Mutex::new(Cell::new(b""));

fn feed(bytes: &'static [u8]) {
    critical_section::with(|cs| SCRIPT.borrow(cs).set(bytes));
}

fn fed() -> bool {
    critical_section::with(|cs| SCRIPT.borrow(cs).get().is_empty())
}

#[entry]
fn main() -> ! {
    // SAFETY: `main` runs once, these are the only references.
    let fifo = unsafe { &mut *(&raw mut FIFO) };
    let (producer, consumer) = fifo.split();
    // SAFETY: As above.
    let link: &'static Link = unsafe { &mut *(&raw mut SLOT) }.insert(RxLink::new(producer));
    critical_section::with(|cs| LINK.borrow(cs).set(Some(link)));

    let mut tty = TtyReader::new(consumer, link);
    defmt::info!("available {=bool}", tty.data_available());
    start_systick(2_000);

    feed(b"hello\n");
    let mut line = [0u8; 8];
    let mut len = 0;
    loop {
        let byte = tty.get_char();
        if byte == b'\n' || len == line.len() {
            break;
        }
        line[len] = byte;
        len += 1;
    }
    defmt::info!("line {=[u8]:a}", &line[..len]);

    // Nobody reads while these arrive.
    feed(b"0123456789AB");
    while !fed() {
        cortex_m::asm::nop();
    }
    defmt::info!("used {=usize} lost {=u32}", tty.used(), tty.lost());

    let mut buf = [0u8; 16];
    let n = tty.read(&mut buf);
    defmt::info!("read {=[u8]:a}", &buf[..n]);
    defmt::info!("try_get_char {}", tty.try_get_char());
    exit_success();
}

#[exception]
fn SysTick() {
    critical_section::with(|cs| {
        let script = SCRIPT.borrow(cs);
        if let (Some(link), [byte, rest @ ..]) = (LINK.borrow(cs).get(), script.get()) {
            script.set(rest);
            // SAFETY: Only this handler feeds the receive queue.
            unsafe { link.on_byte_received(*byte) };
        }
    });
}
