//! Simple UART driver for LM3S6965 (QEMU testing only).
//!
//! UART0 plays the TTY wire: the soft DMA engine pushes every completed block
//! out here, so the runner can compare what reached the "line" with the
//! expected text.
//!
//! QEMU serial port mapping: `qemu-system-arm ... -serial <uart0>`.

use core::ptr::{with_exposed_provenance, with_exposed_provenance_mut};

const UART0_BASE: usize = 0x4000_C000;

const UART_DR_OFFSET: usize = 0x000; // Data Register
const UART_FR_OFFSET: usize = 0x018; // Flag Register
const UART_FR_TXFF: u32 = 0x20; // Transmit FIFO Full

/// Write a single byte to UART0.
pub fn write_byte(byte: u8) {
    let dr = with_exposed_provenance_mut::<u32>(UART0_BASE + UART_DR_OFFSET);
    let fr = with_exposed_provenance::<u32>(UART0_BASE + UART_FR_OFFSET);
    unsafe {
        while fr.read_volatile() & UART_FR_TXFF != 0 {}
        dr.write_volatile(byte as u32);
    }
}

/// Write a byte slice to UART0.
pub fn write_bytes(bytes: &[u8]) {
    for &byte in bytes {
        write_byte(byte);
    }
}
