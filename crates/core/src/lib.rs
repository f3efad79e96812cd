//! # spinet-core
//!
//! Cycle-counted simulation of a small SPI control network built from three
//! PIC16F887-class microcontrollers running at 1 MHz.
//!
//! A coordinator samples a potentiometer and polls its responders over a
//! shared synchronous serial bus; each responder reacts to the byte it
//! receives and stages a reply for the next transfer. The coordinator shows
//! the polled value on its LED port.
//!
//! ## Architecture
//!
//! - [`Network`]: top-level simulation that wires the nodes to the bus and
//!   implements [`ControllerPort`] for the coordinator firmware
//! - [`node`]: coordinator and responder nodes, interrupt dispatch
//! - [`peripherals`]: ADC, MSSP, PWM, PORTB change and output port models
//! - [`bus`]: select lines, clock and data wiring between the nodes
//! - [`poll`]: the coordinator's repeating poll cycle
//! - [`sequencer`]: chip-select sequencing with a settle delay
//! - [`transport`]: bounded byte transfers over a [`ControllerPort`]
//! - [`sampler`], [`counter`], [`responder`]: the interrupt handlers
//! - [`mapper`]: byte to pulse-width linear map
//! - [`savestate`]: quick save / quick load
//!
//! ## Topologies
//!
//! | Topology | Line 0 | Line 1 |
//! |---|---|---|
//! | [`Topology::Single`] | counter responder (RA7) | |
//! | [`Topology::Dual`] | servo responder (RA6) | counter responder (RA7) |

pub mod config;
pub mod error;
pub mod state;
pub mod peripherals;
pub mod mapper;
pub mod transport;
pub mod sampler;
pub mod counter;
pub mod responder;
pub mod sequencer;
pub mod poll;
pub mod bus;
pub mod node;
pub mod savestate;

pub use bus::SpiBus;
pub use config::{NetworkConfig, Topology, WaitBound};
pub use error::NetError;
pub use node::{Coordinator, ResponderNode, ResponderStats};
pub use poll::{PollCycle, PollReport};
pub use responder::ResponderKind;
pub use state::DeviceState;
pub use transport::ControllerPort;

use std::path::Path;

use log::{debug, info, warn};

use crate::config::POT_CHANNEL;

/// The simulated network: one coordinator, its responders and the bus.
pub struct Network {
    pub config: NetworkConfig,
    /// Instruction cycles since reset
    pub tick: u64,
    pub coordinator: Coordinator,
    /// Indexed by select line
    pub responders: Vec<ResponderNode>,
    pub bus: SpiBus,
    poll: PollCycle,
    /// Completed poll iterations
    pub iterations: u64,
}

impl Network {
    pub fn new(config: NetworkConfig) -> Result<Self, NetError> {
        config.validate()?;

        let responders = match config.topology {
            Topology::Single => vec![ResponderNode::new(ResponderKind::Counter, config.counter_seed)],
            Topology::Dual => vec![
                ResponderNode::new(
                    ResponderKind::Servo { out_min: config.pwm_out_min, out_max: config.pwm_out_max },
                    config.counter_seed,
                ),
                ResponderNode::new(ResponderKind::Counter, config.counter_seed),
            ],
        };

        // A lone responder stays selected between polls; with two, both idle high
        let initial_high = config.topology == Topology::Dual;
        let bus = SpiBus::new(responders.len(), initial_high);

        let mut coordinator = Coordinator::new();
        for &pin in config.topology.select_pins() {
            coordinator.porta.set_bit(pin, initial_high);
        }

        let replies: Vec<bool> = responders.iter().map(|r| r.kind.replies()).collect();
        let poll = PollCycle::from_config(&config, &replies);

        info!(
            "network: topology={} settle={} cycles wait={:?} latency={} seed={}",
            config.topology.name(), config.settle_cycles(), config.wait,
            config.isr_latency_cycles, config.counter_seed,
        );

        Ok(Network {
            config,
            tick: 0,
            coordinator,
            responders,
            bus,
            poll,
            iterations: 0,
        })
    }

    /// Rebuild every node from the configuration, keeping the pot setting.
    pub fn reset(&mut self) -> Result<(), NetError> {
        let pot = self.pot();
        *self = Network::new(self.config.clone())?;
        self.set_pot(pot);
        Ok(())
    }

    pub fn poll_cycle(&self) -> &PollCycle {
        &self.poll
    }

    // ─── Time ───────────────────────────────────────────────────────────────

    /// Advance one instruction cycle: bus, converter, then interrupts.
    pub fn step_cycle(&mut self) {
        self.tick += 1;
        self.bus.update(self.tick, &mut self.coordinator.spi, &mut self.responders);
        self.coordinator.adc.update(self.tick);
        self.coordinator.service();
        let latency = self.config.isr_latency_cycles;
        for r in self.responders.iter_mut() {
            r.service(self.tick, latency);
        }
    }

    pub fn run_cycles(&mut self, cycles: u64) {
        for _ in 0..cycles {
            self.step_cycle();
        }
    }

    /// Run one poll iteration of the coordinator firmware.
    pub fn run_iteration(&mut self) -> Result<PollReport, NetError> {
        let poll = self.poll.clone();
        let report = poll.run_once(self);
        match &report {
            Ok(_) => self.iterations += 1,
            Err(e) => warn!("iteration {} failed: {}", self.iterations, e),
        }
        report
    }

    // ─── Inputs ─────────────────────────────────────────────────────────────

    /// Set the potentiometer level (0..=1023).
    pub fn set_pot(&mut self, level: u16) {
        self.coordinator.adc.set_input(POT_CHANNEL, level);
    }

    pub fn pot(&self) -> u16 {
        self.coordinator.adc.input(POT_CHANNEL)
    }

    /// Select line of the counter responder.
    pub fn counter_line(&self) -> Option<usize> {
        self.responders.iter().position(|r| r.kind == ResponderKind::Counter)
    }

    pub fn counter_responder(&self) -> Option<&ResponderNode> {
        self.counter_line().map(|line| &self.responders[line])
    }

    pub fn servo_responder(&self) -> Option<&ResponderNode> {
        self.responders.iter().find(|r| matches!(r.kind, ResponderKind::Servo { .. }))
    }

    /// Hold or release a counter button. Returns false without a counter responder.
    pub fn set_button(&mut self, pin: u8, pressed: bool) -> bool {
        match self.counter_line() {
            Some(line) => {
                self.responders[line].set_button(pin, pressed);
                true
            }
            None => false,
        }
    }

    /// Press and release a counter button, giving the handler time to run
    /// after each edge.
    pub fn press_button(&mut self, pin: u8) -> bool {
        let settle = self.config.isr_latency_cycles + 1;
        if !self.set_button(pin, true) {
            return false;
        }
        self.run_cycles(settle);
        self.set_button(pin, false);
        self.run_cycles(settle);
        true
    }

    /// Freeze the bus clock to simulate a stalled transfer.
    pub fn hold_bus_clock(&mut self, held: bool) {
        debug!("bus clock {}", if held { "held" } else { "released" });
        self.bus.hold_clock(held, self.tick);
    }

    // ─── Outputs ────────────────────────────────────────────────────────────

    /// Coordinator LED port.
    pub fn displayed(&self) -> u8 {
        self.coordinator.display.read()
    }

    /// Servo pulse high time in microseconds, if a servo responder is wired.
    pub fn servo_pulse_us(&self) -> Option<f32> {
        self.servo_responder().map(|r| r.pwm.pulse_width_us())
    }

    // ─── Save state ─────────────────────────────────────────────────────────

    /// Capture the complete network state.
    pub fn save_state(&self) -> savestate::SaveState {
        savestate::SaveState {
            config: self.config.clone(),
            tick: self.tick,
            iterations: self.iterations,
            coordinator: self.coordinator.save_state(),
            responders: self.responders.iter().map(|r| r.save_state()).collect(),
            bus: self.bus.save_state(),
        }
    }

    /// Restore a state captured by [`save_state`](Self::save_state).
    pub fn load_state(&mut self, s: &savestate::SaveState) -> Result<(), NetError> {
        if s.config.topology != self.config.topology || s.responders.len() != self.responders.len() {
            return Err(NetError::SaveState(format!(
                "topology mismatch: save={} current={}",
                s.config.topology.name(), self.config.topology.name())));
        }
        s.config.validate()?;
        let replies: Vec<bool> = s.responders.iter().map(|r| r.kind.replies()).collect();
        self.poll = PollCycle::from_config(&s.config, &replies);
        self.config = s.config.clone();
        self.tick = s.tick;
        self.iterations = s.iterations;
        self.coordinator.load_state(&s.coordinator);
        for (node, rs) in self.responders.iter_mut().zip(s.responders.iter()) {
            node.load_state(rs);
        }
        self.bus.load_state(&s.bus);
        Ok(())
    }

    /// Take the settle delay, conversion guard, wait bound and ISR latency
    /// from `timing`, leaving topology and node state alone. Returns true
    /// if anything changed.
    ///
    /// A loaded state brings its own timing; callers use this to keep the
    /// timing they were started with.
    pub fn apply_timing(&mut self, timing: &NetworkConfig) -> Result<bool, NetError> {
        let mut next = self.config.clone();
        next.settle_us = timing.settle_us;
        next.adc_guard_us = timing.adc_guard_us;
        next.wait = timing.wait;
        next.isr_latency_cycles = timing.isr_latency_cycles;
        next.validate()?;
        if next == self.config {
            return Ok(false);
        }
        info!(
            "timing override: settle {} -> {} us, guard {} -> {} us, wait {:?} -> {:?}, latency {} -> {}",
            self.config.settle_us, next.settle_us, self.config.adc_guard_us, next.adc_guard_us,
            self.config.wait, next.wait, self.config.isr_latency_cycles, next.isr_latency_cycles,
        );
        let replies: Vec<bool> = self.responders.iter().map(|r| r.kind.replies()).collect();
        self.poll = PollCycle::from_config(&next, &replies);
        self.config = next;
        Ok(true)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), NetError> {
        savestate::save_to_file(&self.save_state(), self.config.topology.as_byte(), path)?;
        info!("state saved to {}", path.display());
        Ok(())
    }

    pub fn load_from_file(&mut self, path: &Path) -> Result<(), NetError> {
        let s = savestate::load_from_file(path, self.config.topology.as_byte())?;
        self.load_state(&s)?;
        info!("state loaded from {}", path.display());
        Ok(())
    }
}

impl ControllerPort for Network {
    fn now(&self) -> u64 {
        self.tick
    }

    fn delay_cycles(&mut self, cycles: u64) {
        self.run_cycles(cycles);
    }

    fn conversion_in_progress(&self) -> bool {
        self.coordinator.adc.is_busy()
    }

    fn start_conversion(&mut self) {
        self.coordinator.adc.start_conversion(self.tick);
    }

    fn sampled_value(&self) -> u8 {
        self.coordinator.state.sampled_value()
    }

    fn write_buffer(&mut self, byte: u8) {
        if self.coordinator.spi.write_buf(byte) {
            self.bus.begin(self.tick, byte, &mut self.responders);
        } else if self.coordinator.spi.wcol {
            warn!("write collision: 0x{:02X} dropped", byte);
        }
    }

    fn buffer_full(&self) -> bool {
        self.coordinator.spi.bf
    }

    fn read_buffer(&mut self) -> u8 {
        self.coordinator.spi.read_buf()
    }

    fn transfer_in_flight(&self) -> bool {
        self.bus.in_flight() || self.coordinator.spi.is_busy()
    }

    fn set_select(&mut self, line: usize, high: bool) -> Result<(), NetError> {
        self.bus.set_select(line, high, self.tick, &mut self.responders)?;
        if let Some(&pin) = self.config.topology.select_pins().get(line) {
            self.coordinator.porta.set_bit(pin, high);
        }
        Ok(())
    }

    fn select_lines(&self) -> usize {
        self.bus.lines()
    }

    fn write_display(&mut self, value: u8) {
        self.coordinator.display.write(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{us_to_cycles, SENTINEL};
    use crate::counter::{DECREMENT_PIN, INCREMENT_PIN};

    fn single() -> Network {
        Network::new(NetworkConfig::new(Topology::Single)).unwrap()
    }

    fn dual() -> Network {
        Network::new(NetworkConfig::new(Topology::Dual)).unwrap()
    }

    #[test]
    fn test_counter_reply_after_three_presses() {
        let mut net = single();
        for _ in 0..3 {
            assert!(net.press_button(INCREMENT_PIN));
        }
        assert_eq!(net.counter_responder().unwrap().state.counter(), 8);
        let report = net.run_iteration().unwrap();
        assert_eq!(report.replies, vec![(0, 8)]);
        assert_eq!(report.displayed, Some(8));
        assert_eq!(net.displayed(), 8);
    }

    #[test]
    fn test_counter_wraps_through_network() {
        let mut cfg = NetworkConfig::new(Topology::Single);
        cfg.counter_seed = 1;
        let mut net = Network::new(cfg).unwrap();
        net.press_button(DECREMENT_PIN);
        net.press_button(DECREMENT_PIN);
        assert_eq!(net.run_iteration().unwrap().displayed, Some(255));
    }

    #[test]
    fn test_servo_extremes() {
        let mut net = dual();
        net.set_pot(0);
        net.run_iteration().unwrap();
        net.run_iteration().unwrap();
        let servo = net.servo_responder().unwrap();
        assert_eq!(servo.state.pulse_width(), 62);
        assert_eq!(servo.pwm.duty(), 62);

        net.set_pot(1023);
        net.run_iteration().unwrap();
        net.run_iteration().unwrap();
        let servo = net.servo_responder().unwrap();
        assert_eq!(servo.state.pulse_width(), 125);
        assert_eq!(servo.pwm.duty(), 125);
        assert!((net.servo_pulse_us().unwrap() - 2000.0).abs() < 0.5);
    }

    #[test]
    fn test_sample_latched_before_next_iteration() {
        let mut net = single();
        net.set_pot(800);
        let first = net.run_iteration().unwrap();
        assert!(first.sample_requested);
        // The conversion started this iteration finishes during its transfers
        assert_eq!(first.sent, 0);
        assert_eq!(net.coordinator.state.sampled_value(), 200);
        let second = net.run_iteration().unwrap();
        assert_eq!(second.sent, 200);
        // The responder sees the sentinel once its handler catches up
        net.run_cycles(net.config.isr_latency_cycles + 1);
        let counter = net.counter_responder().unwrap();
        assert_eq!(counter.stats.last_inbound, Some(SENTINEL));
        assert_eq!(counter.display.read(), SENTINEL);
    }

    #[test]
    fn test_reply_independent_of_sent_byte() {
        for &seed in &[0u8, 0x5A, 0x80, 0xFF] {
            let mut cfg = NetworkConfig::new(Topology::Single);
            cfg.counter_seed = seed;
            let mut net = Network::new(cfg).unwrap();
            for &pot in &[0u16, 511, 1023] {
                net.set_pot(pot);
                let report = net.run_iteration().unwrap();
                assert_eq!(report.replies, vec![(0, seed)], "seed {} pot {}", seed, pot);
            }
        }
    }

    #[test]
    fn test_dual_select_lines_exclusive() {
        let mut net = dual();
        net.set_pot(300);
        for _ in 0..4 {
            let report = net.run_iteration().unwrap();
            assert_eq!(report.replies.len(), 1);
            assert_eq!(report.replies[0].0, 1);
        }
        assert_eq!(net.bus.peak_selected, 1);
        assert!(net.bus.trace().all(|e| e.active <= 1));
        assert_eq!(net.bus.dbg_contention, 0);
        // Counter responder on line 1 is left selected
        assert_eq!(net.bus.select_levels(), &[true, false][..]);
        assert!(net.coordinator.porta.bit(6));
        assert!(!net.coordinator.porta.bit(7));
    }

    #[test]
    fn test_servo_never_solicited() {
        let mut net = dual();
        net.set_pot(1023);
        net.run_iteration().unwrap();
        net.run_iteration().unwrap();
        net.run_cycles(net.config.isr_latency_cycles + 1);
        let servo = net.servo_responder().unwrap();
        // Only data bytes reach the servo, never the sentinel
        assert_eq!(servo.stats.bytes_handled, 2);
        assert_eq!(servo.stats.last_inbound, Some(255));
        let counter = net.counter_responder().unwrap();
        assert_eq!(counter.stats.bytes_handled, 4);
    }

    #[test]
    fn test_stall_reported_and_recovered() {
        let mut cfg = NetworkConfig::new(Topology::Single);
        cfg.wait = WaitBound::Cycles(200);
        let mut net = Network::new(cfg).unwrap();
        net.hold_bus_clock(true);
        match net.run_iteration() {
            Err(NetError::BusStall { waited }) => assert_eq!(waited, 200),
            other => panic!("expected stall, got {:?}", other.map(|r| r.displayed)),
        }
        assert_eq!(net.iterations, 0);
        assert!(matches!(net.run_iteration(), Err(NetError::TransferInFlight)));

        net.hold_bus_clock(false);
        net.run_cycles(config::BUS_BYTE_CYCLES);
        let report = net.run_iteration().unwrap();
        assert_eq!(report.displayed, Some(5));
    }

    #[test]
    fn test_slow_responder_races_sentinel() {
        let mut cfg = NetworkConfig::new(Topology::Single);
        cfg.settle_us = 4;
        cfg.isr_latency_cycles = 100;
        let mut net = Network::new(cfg).unwrap();
        net.coordinator.state.latch_sample(0x3C);
        net.coordinator.adc.adon = false;
        let report = net.run_iteration().unwrap();
        // The handler had not staged the counter yet: the data byte is echoed
        assert_eq!(report.replies, vec![(0, 0x3C)]);
        net.run_cycles(100);
        assert_eq!(net.counter_responder().unwrap().stats.overflows, 1);
    }

    #[test]
    fn test_default_settle_avoids_race() {
        let mut cfg = NetworkConfig::new(Topology::Single);
        cfg.isr_latency_cycles = us_to_cycles(9_000);
        let mut net = Network::new(cfg).unwrap();
        net.run_iteration().unwrap();
        assert_eq!(net.counter_responder().unwrap().stats.overflows, 0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut net = single();
        net.set_pot(640);
        net.press_button(INCREMENT_PIN);
        net.run_iteration().unwrap();
        net.run_iteration().unwrap();
        let saved = net.save_state();
        let bytes = savestate::to_bytes(&saved, Topology::Single.as_byte()).unwrap();

        net.press_button(INCREMENT_PIN);
        net.run_iteration().unwrap();
        assert_eq!(net.displayed(), 7);

        let decoded = savestate::from_bytes(&bytes, Topology::Single.as_byte()).unwrap();
        net.load_state(&decoded).unwrap();
        assert_eq!(net.displayed(), 6);
        assert_eq!(net.iterations, 2);
        assert_eq!(net.counter_responder().unwrap().state.counter(), 6);
        assert_eq!(net.coordinator.state.sampled_value(), 160);
        assert_eq!(net.run_iteration().unwrap().displayed, Some(6));
    }

    #[test]
    fn test_timing_kept_over_loaded_state() {
        let saved = single().save_state();
        let mut cfg = NetworkConfig::new(Topology::Single);
        cfg.settle_us = 4;
        cfg.wait = WaitBound::Forever;
        let mut net = Network::new(cfg.clone()).unwrap();
        net.load_state(&saved).unwrap();
        assert_eq!(net.config.settle_us, saved.config.settle_us);

        assert!(net.apply_timing(&cfg).unwrap());
        assert_eq!(net.config.settle_us, 4);
        assert_eq!(net.config.wait, WaitBound::Forever);
        assert_eq!(net.config.counter_seed, saved.config.counter_seed);
        let report = net.run_iteration().unwrap();
        assert!(report.cycles < config::ms_to_cycles(config::SETTLE_DELAY_MS));
        // Same timing again is a no-op
        assert!(!net.apply_timing(&cfg).unwrap());
    }

    #[test]
    fn test_timing_override_validated() {
        let mut net = single();
        let mut cfg = NetworkConfig::new(Topology::Single);
        cfg.settle_us = 0;
        assert!(net.apply_timing(&cfg).is_err());
        assert_eq!(net.config.settle_us, NetworkConfig::new(Topology::Single).settle_us);
    }

    #[test]
    fn test_load_rejects_other_topology() {
        let net = single();
        let bytes = savestate::to_bytes(&net.save_state(), Topology::Single.as_byte()).unwrap();
        assert!(matches!(
            savestate::from_bytes(&bytes, Topology::Dual.as_byte()),
            Err(NetError::SaveState(_))
        ));
        let mut other = dual();
        assert!(other.load_state(&net.save_state()).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let err = savestate::from_bytes(b"NOPE\x01\x00\x00\x00\x00xx", 0).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }

    #[test]
    fn test_reset_restores_seed() {
        let mut net = single();
        net.set_pot(1000);
        net.press_button(INCREMENT_PIN);
        net.run_iteration().unwrap();
        net.reset().unwrap();
        assert_eq!(net.tick, 0);
        assert_eq!(net.pot(), 1000);
        assert_eq!(net.counter_responder().unwrap().state.counter(), 5);
    }
}
