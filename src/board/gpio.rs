//! GPIO pins of the NUCLEO-F446RE.
//!
//! A [`Pin`] is a port plus a bit mask, so one value can drive several pins of
//! the same port at once.

use super::{pac, rcc};

/// Green user LED LD2.
pub const LED: Pin = Pin::new(Port::A, 5);
/// Blue user button B1, low when pressed.
pub const BUTTON: Pin = Pin::new(Port::C, 13);
/// USART2 TX, routed to the ST-LINK virtual COM port.
pub const TTY_TX: Pin = Pin::new(Port::A, 2);
/// USART2 RX, routed to the ST-LINK virtual COM port.
pub const TTY_RX: Pin = Pin::new(Port::A, 3);

/// Alternate function of USART1 to USART3.
const AF_USART2: u8 = 7;

/// GPIO ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Port {
    A = 0,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

/// One or more pins of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct Pin {
    port: Port,
    mask: u16,
}

impl Pin {
    /// Pin `number` (0 to 15) of `port`.
    pub const fn new(port: Port, number: u8) -> Self {
        assert!(number < 16);
        Pin {
            port,
            mask: 1 << number,
        }
    }

    /// The pins of `port` set in `mask`.
    pub const fn with_mask(port: Port, mask: u16) -> Self {
        Pin { port, mask }
    }

    /// Every pin of `port`.
    pub const fn all(port: Port) -> Self {
        Pin { port, mask: 0xFFFF }
    }

    /// The port.
    pub const fn port(self) -> Port {
        self.port
    }

    /// The pin mask within the port.
    pub const fn mask(self) -> u16 {
        self.mask
    }

    /// The register block of the port. All ports share the GPIOA layout.
    fn regs(self) -> &'static pac::gpioa::RegisterBlock {
        let ptr: *const pac::gpioa::RegisterBlock = match self.port {
            Port::A => pac::GPIOA::ptr(),
            Port::B => pac::GPIOB::ptr().cast(),
            Port::C => pac::GPIOC::ptr().cast(),
            Port::D => pac::GPIOD::ptr().cast(),
            Port::E => pac::GPIOE::ptr().cast(),
            Port::F => pac::GPIOF::ptr().cast(),
            Port::G => pac::GPIOG::ptr().cast(),
            Port::H => pac::GPIOH::ptr().cast(),
        };
        // SAFETY: Fixed peripheral address. Pins are changed with
        // read-modify-write of their own fields or through BSRR.
        unsafe { &*ptr }
    }
}

/// Pin direction and function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[allow(missing_docs)]
pub enum Mode {
    Input = 0,
    Output = 1,
    Alternate = 2,
    Analog = 3,
}

/// Output driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[allow(missing_docs)]
pub enum OutputType {
    PushPull = 0,
    OpenDrain = 1,
}

/// Internal pull resistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[allow(missing_docs)]
pub enum Pull {
    None = 0,
    Up = 1,
    Down = 2,
}

/// Output slew rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[allow(missing_docs)]
pub enum Speed {
    Low = 0,
    Medium = 1,
    Fast = 2,
    High = 3,
}

/// Everything [`pin_init`] sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub struct PinConfig {
    /// Direction and function.
    pub mode: Mode,
    /// Output driver, ignored for inputs.
    pub output_type: OutputType,
    /// Pull resistor.
    pub pull: Pull,
    /// Slew rate, ignored for inputs.
    pub speed: Speed,
    /// Alternate function number, only used in [`Mode::Alternate`].
    pub alternate: u8,
}

impl PinConfig {
    /// Push-pull output.
    pub const fn output(pull: Pull, speed: Speed) -> Self {
        PinConfig {
            mode: Mode::Output,
            output_type: OutputType::PushPull,
            pull,
            speed,
            alternate: 0,
        }
    }

    /// Input.
    pub const fn input(pull: Pull) -> Self {
        PinConfig {
            mode: Mode::Input,
            output_type: OutputType::PushPull,
            pull,
            speed: Speed::Low,
            alternate: 0,
        }
    }

    /// Push-pull alternate function `af`.
    pub const fn alternate(af: u8, pull: Pull, speed: Speed) -> Self {
        PinConfig {
            mode: Mode::Alternate,
            output_type: OutputType::PushPull,
            pull,
            speed,
            alternate: af,
        }
    }
}

/// Configures the board pins: LED, button and the TTY.
pub fn init() {
    pin_init(LED, &PinConfig::output(Pull::Down, Speed::Medium));
    pin_init(BUTTON, &PinConfig::input(Pull::Down));
    pin_init(
        Pin::with_mask(Port::A, TTY_TX.mask | TTY_RX.mask),
        &PinConfig::alternate(AF_USART2, Pull::Up, Speed::High),
    );
}

/// Enables the port clock and applies `cfg` to every pin in `pin`.
pub fn pin_init(pin: Pin, cfg: &PinConfig) {
    enable_port(pin.port);

    let regs = pin.regs();
    let mask = pin.mask;
    // SAFETY (all `bits` below): `fields` only changes the fields of the pins in
    // `mask`, and every value fits its field.
    regs.ospeedr
        .modify(|r, w| unsafe { w.bits(fields(r.bits(), mask, 2, cfg.speed as u32)) });
    regs.otyper
        .modify(|r, w| unsafe { w.bits(fields(r.bits(), mask, 1, cfg.output_type as u32)) });
    regs.pupdr
        .modify(|r, w| unsafe { w.bits(fields(r.bits(), mask, 2, cfg.pull as u32)) });
    if cfg.mode == Mode::Alternate {
        let af = u32::from(cfg.alternate);
        regs.afrl
            .modify(|r, w| unsafe { w.bits(fields(r.bits(), mask & 0xFF, 4, af)) });
        regs.afrh
            .modify(|r, w| unsafe { w.bits(fields(r.bits(), mask >> 8, 4, af)) });
    }
    regs.moder
        .modify(|r, w| unsafe { w.bits(fields(r.bits(), mask, 2, cfg.mode as u32)) });
}

fn enable_port(port: Port) {
    rcc().ahb1enr.modify(|_, w| match port {
        Port::A => w.gpioaen().enabled(),
        Port::B => w.gpioben().enabled(),
        Port::C => w.gpiocen().enabled(),
        Port::D => w.gpioden().enabled(),
        Port::E => w.gpioeen().enabled(),
        Port::F => w.gpiofen().enabled(),
        Port::G => w.gpiogen().enabled(),
        Port::H => w.gpiohen().enabled(),
    });
    let _ = rcc().ahb1enr.read();
}

/// Drives the pins high.
pub fn set(pin: Pin) {
    // SAFETY: Set bits only affect the pins in the mask.
    pin.regs().bsrr.write(|w| unsafe { w.bits(u32::from(pin.mask)) });
}

/// Drives the pins low.
pub fn clear(pin: Pin) {
    // SAFETY: Reset bits only affect the pins in the mask.
    pin.regs().bsrr.write(|w| unsafe { w.bits(u32::from(pin.mask) << 16) });
}

/// Drives the pins high if `high`, low otherwise.
pub fn write(pin: Pin, high: bool) {
    if high { set(pin) } else { clear(pin) }
}

/// Inverts the output of the pins.
pub fn toggle(pin: Pin) {
    let regs = pin.regs();
    let bsrr = toggle_bsrr(regs.odr.read().bits(), pin.mask);
    // SAFETY: Only the pins in the mask are set or reset.
    regs.bsrr.write(|w| unsafe { w.bits(bsrr) });
}

/// `true` if any of the pins reads high.
pub fn read(pin: Pin) -> bool {
    pin.regs().idr.read().bits() & u32::from(pin.mask) != 0
}

/// Returns `reg` with the `width` bit field of every pin in `mask` set to
/// `value`.
fn fields(reg: u32, mask: u16, width: u32, value: u32) -> u32 {
    let field = (1 << width) - 1;
    (0..16u32)
        .filter(|n| mask & (1 << n) != 0)
        .filter(|n| n * width < 32)
        .fold(reg, |reg, n| {
            let shift = n * width;
            (reg & !(field << shift)) | ((value & field) << shift)
        })
}

/// BSRR value that inverts the pins in `mask`, given the current ODR.
fn toggle_bsrr(odr: u32, mask: u16) -> u32 {
    let mask = u32::from(mask);
    ((odr & mask) << 16) | (!odr & mask)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pin_masks() {
        assert_eq!(LED.mask(), 1 << 5);
        assert_eq!(BUTTON.port(), Port::C);
        assert_eq!(BUTTON.mask(), 1 << 13);
        assert_eq!(
            Pin::with_mask(Port::A, 0b1100),
            Pin::with_mask(Port::A, TTY_TX.mask | TTY_RX.mask)
        );
        assert_eq!(Pin::all(Port::B).mask(), u16::MAX);
    }

    #[test]
    fn two_bit_fields() {
        // PA2 and PA3 to alternate, PA5 untouched.
        let moder = fields(0b01 << 10, 0b1100, 2, Mode::Alternate as u32);
        assert_eq!(moder, (0b01 << 10) | (0b10 << 6) | (0b10 << 4));
        // Clears before setting.
        assert_eq!(fields(u32::MAX, 1 << 15, 2, 0), !(0b11 << 30));
    }

    #[test]
    fn one_bit_fields() {
        assert_eq!(fields(0, 0b101, 1, 1), 0b101);
        assert_eq!(fields(0xFFFF, 1 << 4, 1, 0), 0xFFEF);
    }

    #[test]
    fn alternate_function_split() {
        let mask = 1 << 3 | 1 << 9;
        assert_eq!(fields(0, mask & 0xFF, 4, 7), 7 << 12);
        assert_eq!(fields(0, mask >> 8, 4, 7), 7 << 4);
    }

    #[test]
    fn toggle_sets_low_and_resets_high() {
        // Pin 0 is high, pin 1 is low.
        let bsrr = toggle_bsrr(0b01, 0b11);
        assert_eq!(bsrr, (0b01 << 16) | 0b10);
    }
}
