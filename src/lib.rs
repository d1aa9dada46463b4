#![no_std]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

// Must come first, the other modules use its macros.
#[macro_use]
mod fmt;

pub mod board;
pub mod config;
pub mod exti;
pub mod fatal;
pub mod fifo;
#[cfg(any(feature = "defmt-tty", feature = "qemu-test"))]
mod logger;
pub mod tty;

pub use board::chip_init;
pub use fifo::{Consumer, Fifo, Producer};

/// Error returned by [`board::tty::init`] and [`chip_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum InitError {
    /// The TTY was already initialized.
    AlreadyInitialized,
    /// The baud rate cannot be generated from the peripheral clock.
    InvalidBaudRate,
}
