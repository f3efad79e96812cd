//! Response handler: the responder's byte-received interrupt.
//!
//! The reply to transfer *n* is whatever the handler staged while servicing
//! transfer *n − 1*. The coordinator therefore sends a sentinel after the
//! data byte: the sentinel's clock edges carry out the reply staged while the
//! data byte was handled.

use log::trace;
use serde::{Deserialize, Serialize};

use crate::mapper::linear_map;
use crate::peripherals::{OutputPort, Pwm, Spi};
use crate::state::DeviceState;

/// Lowest and highest byte the servo responder maps
pub const IN_MIN: u8 = 0;
pub const IN_MAX: u8 = 255;

/// Firmware variant running on a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponderKind {
    /// Shows each inbound byte on PORTD and replies with the edge counter.
    Counter,
    /// Maps each inbound byte to a servo pulse width. Never stages a reply.
    Servo { out_min: u16, out_max: u16 },
}

impl ResponderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResponderKind::Counter => "counter",
            ResponderKind::Servo { .. } => "servo",
        }
    }

    /// Whether the coordinator solicits a reply from this variant.
    pub fn replies(&self) -> bool {
        matches!(self, ResponderKind::Counter)
    }
}

/// Outcome of one byte-received interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub inbound: u8,
    /// Reply staged for the next transfer
    pub staged: Option<u8>,
    /// Pulse width written to the PWM fields
    pub pulse_width: Option<u16>,
}

/// Byte-received handler. SSPIF is cleared last.
pub fn on_byte_received(
    kind: ResponderKind,
    spi: &mut Spi,
    display: &mut OutputPort,
    pwm: &mut Pwm,
    state: &DeviceState,
) -> Received {
    let inbound = spi.read_buf();
    let mut out = Received { inbound, staged: None, pulse_width: None };
    match kind {
        ResponderKind::Counter => {
            display.write(inbound);
            let reply = state.counter();
            spi.write_buf(reply);
            out.staged = Some(reply);
        }
        ResponderKind::Servo { out_min, out_max } => {
            let width = linear_map(inbound, IN_MIN, IN_MAX, out_min, out_max);
            state.set_pulse_width(width);
            pwm.set_duty_fields((width >> 2) as u8, (width & 0b11) as u8);
            out.pulse_width = Some(width);
        }
    }
    spi.clear_flag();
    trace!("{} handled 0x{:02X}: {:?}", kind.name(), inbound, out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PWM_OUT_MAX, PWM_OUT_MIN};
    use crate::peripherals::SpiRole;

    fn responder_spi() -> Spi {
        let mut spi = Spi::new(SpiRole::Responder);
        spi.enable(true);
        spi
    }

    fn deliver(spi: &mut Spi, byte: u8) {
        spi.begin_receive();
        spi.complete(byte);
    }

    #[test]
    fn test_counter_displays_and_stages_reply() {
        let mut spi = responder_spi();
        let mut display = OutputPort::new(0);
        let mut pwm = Pwm::new();
        let st = DeviceState::new(8);
        deliver(&mut spi, 0x3C);
        let r = on_byte_received(ResponderKind::Counter, &mut spi, &mut display, &mut pwm, &st);
        assert_eq!(r.inbound, 0x3C);
        assert_eq!(r.staged, Some(8));
        assert_eq!(display.read(), 0x3C);
        assert_eq!(spi.outgoing(), 8);
        assert!(!spi.sspif);
        assert!(!spi.bf);
    }

    #[test]
    fn test_servo_endpoints() {
        let kind = ResponderKind::Servo { out_min: PWM_OUT_MIN, out_max: PWM_OUT_MAX };
        let mut spi = responder_spi();
        let mut display = OutputPort::new(0);
        let mut pwm = Pwm::new();
        pwm.configure(61, 16);
        let st = DeviceState::new(0);

        deliver(&mut spi, 0);
        on_byte_received(kind, &mut spi, &mut display, &mut pwm, &st);
        assert_eq!(pwm.duty(), 62);
        assert_eq!(st.pulse_width(), 62);
        assert_eq!((pwm.ccpr1l, pwm.dc1b), (15, 2));

        deliver(&mut spi, 255);
        let r = on_byte_received(kind, &mut spi, &mut display, &mut pwm, &st);
        assert_eq!(r.pulse_width, Some(125));
        assert_eq!(pwm.duty(), 125);
        assert_eq!(r.staged, None);
        // Nothing staged: the port echoes the received byte
        assert_eq!(spi.outgoing(), 255);
        assert_eq!(display.dbg_writes, 0);
    }
}
