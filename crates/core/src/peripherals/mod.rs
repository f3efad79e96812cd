//! PIC16F887-class peripheral register models.
//!
//! Contains the peripherals the three network nodes use:
//!
//! - [`Adc`]: analog-to-digital converter (coordinator potentiometer on AN0)
//! - [`Spi`]: MSSP synchronous serial port in controller or responder role
//! - [`Pwm`]: Timer2 + CCP1 pulse-width output (servo responder)
//! - [`PortChange`]: PORTB interrupt-on-change with weak pull-ups (counter buttons)
//! - [`OutputPort`]: 8-bit output latch (PORTD LEDs, PORTA select lines)
//!
//! Every model keeps its interrupt flag separate from its enable bit. A
//! peripheral reports a pending source through `check_interrupt`, and the
//! handler that services it is responsible for clearing the flag.

mod adc;
mod spi;
mod pwm;
mod ioc;
mod gpio;

pub use adc::{Adc, ADC_CHANNELS};
pub use spi::{Spi, SpiRole};
pub use pwm::Pwm;
pub use ioc::PortChange;
pub use gpio::OutputPort;

/// Interrupt sources raised by the node peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Irq {
    /// ADIF: conversion complete
    Adc,
    /// SSPIF: byte exchanged on the serial port
    Spi,
    /// RBIF: a monitored PORTB pin changed
    PortChange,
}
