//! The three kinds of node on the bus and their interrupt dispatch.
//!
//! Each node owns its peripherals and its [`DeviceState`]. Interrupt
//! handlers are plain functions in [`sampler`], [`counter`] and
//! [`responder`]; the nodes only decide when to call them.

use log::{trace, warn};

use crate::config::{POT_CHANNEL, PWM_OUT_MAX, PWM_OUT_MIN};
use crate::counter::{self, EdgeAction, BUTTON_MASK};
use crate::peripherals::{Adc, OutputPort, PortChange, Pwm, Spi, SpiRole};
use crate::responder::{self, ResponderKind};
use crate::sampler;
use crate::state::DeviceState;

/// Timer2 period register for a ~4 ms servo frame
const SERVO_PR2: u8 = 61;
/// Timer2 prescaler for the servo frame
const SERVO_PRESCALE: u8 = 16;
/// Duty loaded at setup, before the first byte arrives
const SERVO_RESET_DUTY: u16 = 250;

/// The coordinator: samples the potentiometer and drives the bus.
pub struct Coordinator {
    pub state: DeviceState,
    pub adc: Adc,
    pub spi: Spi,
    /// PORTA: select lines
    pub porta: OutputPort,
    /// PORTD: LED display of the polled value
    pub display: OutputPort,
}

impl Coordinator {
    pub fn new() -> Self {
        let mut adc = Adc::new();
        adc.configure(POT_CHANNEL, true);
        let mut spi = Spi::new(SpiRole::Controller);
        spi.enable(false);
        Coordinator {
            state: DeviceState::new(0),
            adc,
            spi,
            porta: OutputPort::new(0),
            display: OutputPort::new(0),
        }
    }

    /// Interrupt entry: the conversion-complete handler is the only source.
    pub fn service(&mut self) -> Option<u8> {
        if self.adc.check_interrupt().is_some() {
            return sampler::on_conversion_complete(&mut self.adc, &self.state, POT_CHANNEL);
        }
        None
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::CoordinatorState {
        crate::savestate::CoordinatorState {
            device: self.state.save_state(),
            adc: self.adc.save_state(),
            spi: self.spi.save_state(),
            porta: self.porta.read(),
            display: self.display.read(),
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::CoordinatorState) {
        self.state.load_state(&s.device);
        self.adc.load_state(&s.adc);
        self.spi.load_state(&s.spi);
        self.porta.write(s.porta);
        self.display.write(s.display);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-responder counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponderStats {
    pub bytes_handled: u64,
    pub edges_counted: u64,
    /// Bytes lost because the previous one was still unread
    pub overflows: u64,
    pub last_inbound: Option<u8>,
}

/// A responder node running one [`ResponderKind`].
pub struct ResponderNode {
    pub kind: ResponderKind,
    pub state: DeviceState,
    pub spi: Spi,
    /// PORTB: counter buttons
    pub portb: PortChange,
    pub pwm: Pwm,
    /// PORTD: LED display
    pub display: OutputPort,
    /// Global interrupt enable
    pub gie: bool,
    pending_since: Option<u64>,
    pub stats: ResponderStats,
}

impl ResponderNode {
    pub fn new(kind: ResponderKind, counter_seed: u8) -> Self {
        let mut spi = Spi::new(SpiRole::Responder);
        spi.enable(true);
        let mut portb = PortChange::new();
        let mut pwm = Pwm::new();
        match kind {
            ResponderKind::Counter => portb.configure(BUTTON_MASK),
            ResponderKind::Servo { .. } => {
                pwm.configure(SERVO_PR2, SERVO_PRESCALE);
                pwm.set_duty_fields((SERVO_RESET_DUTY >> 2) as u8, (SERVO_RESET_DUTY & 0b11) as u8);
            }
        }
        ResponderNode {
            kind,
            state: DeviceState::new(counter_seed),
            spi,
            portb,
            pwm,
            display: OutputPort::new(0),
            gie: true,
            pending_since: None,
            stats: ResponderStats::default(),
        }
    }

    /// Servo responder with the default output range.
    pub fn servo() -> Self {
        Self::new(ResponderKind::Servo { out_min: PWM_OUT_MIN, out_max: PWM_OUT_MAX }, 0)
    }

    /// True if an enabled interrupt source is flagged.
    pub fn pending(&self) -> bool {
        self.gie && (self.portb.check_interrupt().is_some() || self.spi.check_interrupt().is_some())
    }

    /// Run the interrupt handler once a flag has been pending for
    /// `latency` cycles. Returns true if it ran.
    pub fn service(&mut self, tick: u64, latency: u64) -> bool {
        if !self.pending() {
            self.pending_since = None;
            return false;
        }
        let since = *self.pending_since.get_or_insert(tick);
        if tick - since < latency {
            return false;
        }
        self.pending_since = None;
        self.isr();
        true
    }

    /// Interrupt entry point: edge source first, then the serial port.
    pub fn isr(&mut self) {
        if self.portb.check_interrupt().is_some() {
            if counter::on_port_change(&mut self.portb, &self.state) != EdgeAction::None {
                self.stats.edges_counted += 1;
            }
        }
        if self.spi.check_interrupt().is_some() {
            if self.spi.sspov {
                self.stats.overflows += 1;
                self.spi.sspov = false;
                warn!("{} responder overflow: byte received before the previous one was read", self.kind.name());
            }
            let r = responder::on_byte_received(
                self.kind, &mut self.spi, &mut self.display, &mut self.pwm, &self.state,
            );
            self.stats.bytes_handled += 1;
            self.stats.last_inbound = Some(r.inbound);
        }
        trace!("{} isr done, counter={}", self.kind.name(), self.state.counter());
    }

    /// Press or release one of the counter buttons.
    pub fn set_button(&mut self, pin: u8, pressed: bool) {
        self.portb.set_switch(pin, pressed);
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::ResponderState {
        crate::savestate::ResponderState {
            kind: self.kind,
            device: self.state.save_state(),
            spi: self.spi.save_state(),
            portb: self.portb.save_state(),
            pwm: self.pwm.save_state(),
            display: self.display.read(),
            gie: self.gie,
            pending_since: self.pending_since,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::ResponderState) {
        self.kind = s.kind;
        self.state.load_state(&s.device);
        self.spi.load_state(&s.spi);
        self.portb.load_state(&s.portb);
        self.pwm.load_state(&s.pwm);
        self.display.write(s.display);
        self.gie = s.gie;
        self.pending_since = s.pending_since;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::INCREMENT_PIN;

    #[test]
    fn test_servo_setup_duty() {
        let node = ResponderNode::servo();
        assert_eq!(node.pwm.duty(), 250);
        assert!(!node.portb.rbie);
    }

    #[test]
    fn test_latency_defers_handler() {
        let mut node = ResponderNode::new(ResponderKind::Counter, 5);
        node.spi.begin_receive();
        node.spi.complete(0x20);
        assert!(!node.service(100, 3));
        assert!(!node.service(102, 3));
        assert!(node.service(103, 3));
        assert_eq!(node.display.read(), 0x20);
        assert_eq!(node.spi.outgoing(), 5);
        assert!(!node.pending());
    }

    #[test]
    fn test_isr_handles_edge_then_byte() {
        let mut node = ResponderNode::new(ResponderKind::Counter, 5);
        node.set_button(INCREMENT_PIN, true);
        node.spi.begin_receive();
        node.spi.complete(0x01);
        node.isr();
        // The reply staged in the same invocation already sees the new count
        assert_eq!(node.spi.outgoing(), 6);
        assert_eq!(node.stats.edges_counted, 1);
        assert_eq!(node.stats.bytes_handled, 1);
    }

    #[test]
    fn test_overflow_counted() {
        let mut node = ResponderNode::new(ResponderKind::Counter, 0);
        node.spi.begin_receive();
        node.spi.complete(1);
        node.spi.begin_receive();
        node.spi.complete(2);
        node.isr();
        assert_eq!(node.stats.overflows, 1);
        assert_eq!(node.stats.last_inbound, Some(1));
    }

    #[test]
    fn test_gie_off_masks_everything() {
        let mut node = ResponderNode::new(ResponderKind::Counter, 0);
        node.gie = false;
        node.set_button(INCREMENT_PIN, true);
        assert!(!node.service(0, 0));
        assert_eq!(node.state.counter(), 0);
    }
}
