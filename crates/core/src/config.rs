//! Clock, bus and protocol timing constants plus the runtime network configuration.
//!
//! All timing is expressed in instruction cycles. The nodes run from a 1 MHz
//! internal oscillator and execute one instruction every four oscillator
//! periods, so one cycle is 4 µs.
//!
//! ## Derivations
//!
//! | Constant | Value | Derivation |
//! |---|---|---|
//! | [`BUS_BIT_CYCLES`] | 1 | bus clock = Fosc/4 = one bit per instruction cycle |
//! | [`BUS_BYTE_CYCLES`] | 8 | 8 bits × 1 cycle = 32 µs |
//! | [`SETTLE_DELAY_MS`] | 10 | ≥ one bus clock period; generous so the responder sees a clean select edge |
//! | [`ADC_GUARD_US`] | 40 | acquisition time before setting GO |
//! | [`ADC_CONVERSION_CYCLES`] | 22 | 11 TAD at Fosc/8 (TAD = 8 µs) = 88 µs |

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Oscillator frequency: 1 MHz internal RC
pub const CLOCK_HZ: u32 = 1_000_000;
/// Instruction clock (Fosc/4)
pub const INSTRUCTION_HZ: u32 = CLOCK_HZ / 4;
/// Duration of one instruction cycle in microseconds
pub const CYCLE_US: u32 = 1_000_000 / INSTRUCTION_HZ;

/// Bus clock period in cycles (controller clock = Fosc/4)
pub const BUS_BIT_CYCLES: u64 = 1;
/// Cycles needed to exchange one byte
pub const BUS_BYTE_CYCLES: u64 = 8 * BUS_BIT_CYCLES;

/// Select-line settle delay used by the coordinator between deselect and reselect
pub const SETTLE_DELAY_MS: u32 = 10;
/// Guard delay before a new conversion is triggered
pub const ADC_GUARD_US: u32 = 40;
/// Conversion time of the analog sampler
pub const ADC_CONVERSION_CYCLES: u64 = 22;
/// Analog channel the potentiometer is wired to (AN0)
pub const POT_CHANNEL: u8 = 0;

/// Byte clocked out solely to solicit a responder's pending reply
pub const SENTINEL: u8 = 0xFF;
/// Value read on the data-in line when no responder drives it
pub const IDLE_LINE: u8 = 0xFF;

/// Initial value of the responder-side edge counter
pub const COUNTER_SEED: u8 = 5;
/// Servo pulse width at input 0 (duty units, 16 µs each)
pub const PWM_OUT_MIN: u16 = 62;
/// Servo pulse width at input 255
pub const PWM_OUT_MAX: u16 = 125;
/// Largest value the 10-bit duty register can hold
pub const PWM_DUTY_MAX: u16 = 0x3FF;

/// Default bound on a single transfer wait (40 ms)
pub const DEFAULT_WAIT_CYCLES: u64 = 10_000;
/// Default delay between a responder flag being raised and its handler running
pub const DEFAULT_ISR_LATENCY: u64 = 2;

/// Convert microseconds to instruction cycles, rounding up.
pub fn us_to_cycles(us: u32) -> u64 {
    (us as u64 + CYCLE_US as u64 - 1) / CYCLE_US as u64
}

/// Convert milliseconds to instruction cycles.
pub fn ms_to_cycles(ms: u32) -> u64 {
    us_to_cycles(ms.saturating_mul(1000))
}

/// Convert instruction cycles to microseconds.
pub fn cycles_to_us(cycles: u64) -> u64 {
    cycles * CYCLE_US as u64
}

/// How long the coordinator busy-waits for a transfer to complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitBound {
    /// Give up with [`NetError::BusStall`] after this many cycles
    Cycles(u64),
    /// Hardware parity: spin until the flag is set
    Forever,
}

/// Which nodes hang off the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    /// Coordinator plus one counter/display responder on RA7
    Single,
    /// Coordinator plus a servo responder on RA6 and a counter responder on RA7
    Dual,
}

impl Topology {
    /// Coordinator PORTA bit driving each responder's select line, in line order.
    pub fn select_pins(self) -> &'static [u8] {
        match self {
            Topology::Single => &[7],
            Topology::Dual => &[6, 7],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Topology::Single => "single",
            Topology::Dual => "dual",
        }
    }

    /// Byte stored in save-state headers.
    pub fn as_byte(self) -> u8 {
        match self {
            Topology::Single => 0,
            Topology::Dual => 1,
        }
    }
}

/// Runtime configuration of the simulated network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub topology: Topology,
    /// Select-line settle delay in microseconds
    pub settle_us: u32,
    /// Guard delay before each conversion, in microseconds
    pub adc_guard_us: u32,
    /// Bound on each transfer wait
    pub wait: WaitBound,
    /// Cycles between a responder flag and its handler running
    pub isr_latency_cycles: u64,
    /// Initial counter value on counter responders
    pub counter_seed: u8,
    /// Servo responder output range (10-bit duty units)
    pub pwm_out_min: u16,
    pub pwm_out_max: u16,
}

impl NetworkConfig {
    pub fn new(topology: Topology) -> Self {
        NetworkConfig {
            topology,
            settle_us: SETTLE_DELAY_MS * 1000,
            adc_guard_us: ADC_GUARD_US,
            wait: WaitBound::Cycles(DEFAULT_WAIT_CYCLES),
            isr_latency_cycles: DEFAULT_ISR_LATENCY,
            counter_seed: COUNTER_SEED,
            pwm_out_min: PWM_OUT_MIN,
            pwm_out_max: PWM_OUT_MAX,
        }
    }

    pub fn settle_cycles(&self) -> u64 {
        us_to_cycles(self.settle_us)
    }

    pub fn adc_guard_cycles(&self) -> u64 {
        us_to_cycles(self.adc_guard_us)
    }

    /// Reject configurations that break the protocol's timing assumptions.
    pub fn validate(&self) -> Result<(), NetError> {
        if self.settle_cycles() < BUS_BIT_CYCLES {
            return Err(NetError::InvalidConfig(format!(
                "settle delay {} µs is shorter than one bus clock period ({} µs)",
                self.settle_us,
                cycles_to_us(BUS_BIT_CYCLES)
            )));
        }
        if let WaitBound::Cycles(n) = self.wait {
            if n < BUS_BYTE_CYCLES {
                return Err(NetError::InvalidConfig(format!(
                    "wait bound of {} cycles cannot cover one byte ({} cycles)",
                    n, BUS_BYTE_CYCLES
                )));
            }
        }
        if self.pwm_out_min > PWM_DUTY_MAX || self.pwm_out_max > PWM_DUTY_MAX {
            return Err(NetError::InvalidConfig(format!(
                "pwm range {}..{} exceeds the 10-bit duty register",
                self.pwm_out_min, self.pwm_out_max
            )));
        }
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::new(Topology::Single)
    }
}
