#![no_std]
#![no_main]

use bsp_nucleo_f446::Fifo;
use panic_semihosting as _;
use testsuite::{entry, exit_success};

#[entry]
fn main() -> ! {
    let mut fifo = Fifo::<8>::new();
    let (mut p, mut c) = fifo.split();

    defmt::info!("capacity {=usize}", p.capacity());
    defmt::info!("put a: {=bool}", p.put(b'a'));
    defmt::info!("get: {=u8:a}", c.get().unwrap_or(0));
    defmt::info!("get empty: {}", c.get());

    defmt::info!("write accepted {=usize}", p.write(b"0123456789"));
    defmt::info!("used {=usize} free {=usize}", c.used(), c.free_space());
    defmt::info!("put full: {=bool}", p.put(b'x'));

    // The first write started at index 1, so the run stops at the end of the storage.
    let block = c.read_block();
    defmt::info!("block {=[u8]:a}", block);
    let len = block.len();
    c.free(len);
    defmt::info!("block {=[u8]:a}", c.read_block());
    c.free(usize::MAX);
    defmt::info!("used after clamped free {=usize}", c.used());

    exit_success();
}
