//! Board configuration.
//!
//! Behavioural switches are Cargo features (`tty-tx-dma`, `tty-rx-irq`,
//! `tty-blocking`, `systick`), sizes and numbers live here.

/// Baud rate the TTY is brought up with by [`crate::board::chip_init`].
pub const TTY_BAUDRATE: u32 = 115_200;

/// Size of the TTY transmit ring buffer in bytes.
pub const TTY_TX_BUF_SIZE: usize = 256;

/// Size of the TTY receive ring buffer in bytes.
pub const TTY_RX_BUF_SIZE: usize = 64;

/// Frequency of the external clock fed into OSC_IN by the ST-LINK (HSE bypass).
pub const HSE_HZ: u32 = 8_000_000;

/// PLL input divider, HSE / M gives the 1 MHz VCO input.
pub const PLL_M: u8 = 8;

/// PLL multiplier, the VCO runs at 400 MHz.
pub const PLL_N: u16 = 400;

/// PLL divider for the system clock, one of 2, 4, 6 or 8.
pub const PLL_P: u8 = 4;

/// Core clock after [`crate::board::clock_init`]: HSE / M * N / P.
pub const SYSCLK_HZ: u32 = 100_000_000;

/// APB1 peripheral clock (AHB / 2). USART2 is on this bus.
pub const APB1_HZ: u32 = SYSCLK_HZ / 2;

/// APB2 peripheral clock (AHB / 1).
pub const APB2_HZ: u32 = SYSCLK_HZ;

/// SysTick frequency.
pub const SYSTICK_HZ: u32 = 1_000;

/// Longest delay accepted by [`crate::board::delay_ms`]; it is not extended by
/// one tick.
pub const MAX_DELAY: u32 = u32::MAX;

/// NVIC priority of the TTY transmit DMA stream. It must preempt every context
/// that writes to the TTY, otherwise a blocking write never finishes.
pub const IRQ_PRIO_TTY_TX_DMA: u8 = 0;

/// NVIC priority of the USART receive interrupt.
pub const IRQ_PRIO_TTY_USART: u8 = 1;

/// NVIC priority of the external interrupt lines.
pub const IRQ_PRIO_EXTI: u8 = 2;

/// SysTick priority.
pub const IRQ_PRIO_SYSTICK: u8 = 3;
