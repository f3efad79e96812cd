//! Per-node device state.
//!
//! Each node owns one [`DeviceState`] holding the byte-wide registers that the
//! firmware shares between interrupt context and the main loop. Every register
//! has exactly one writer:
//!
//! - `sampled`: written only by the analog sampler handler, read by the poll cycle
//! - `counter`: written only by the edge-counter handler, read by the response handler
//! - `pulse_width`: written only by the response handler, read by the PWM output
//!
//! Writers go through `pub(crate)` accessors; everything outside the crate can
//! only read. Storage is atomic so a read racing a handler never tears.

use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};

pub struct DeviceState {
    sampled: AtomicU8,
    counter: AtomicU8,
    pulse_width: AtomicU16,
}

impl DeviceState {
    pub fn new(counter_seed: u8) -> Self {
        DeviceState {
            sampled: AtomicU8::new(0),
            counter: AtomicU8::new(counter_seed),
            pulse_width: AtomicU16::new(0),
        }
    }

    /// Most recent analog sample (SampledValue).
    pub fn sampled_value(&self) -> u8 {
        self.sampled.load(Ordering::Relaxed)
    }

    pub(crate) fn latch_sample(&self, value: u8) {
        self.sampled.store(value, Ordering::Relaxed);
    }

    /// Edge counter (PeripheralCounter).
    pub fn counter(&self) -> u8 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Wraps at 255.
    pub(crate) fn increment_counter(&self) -> u8 {
        self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Wraps at 0.
    pub(crate) fn decrement_counter(&self) -> u8 {
        self.counter.fetch_sub(1, Ordering::Relaxed).wrapping_sub(1)
    }

    /// Last pulse width computed by the response handler (10-bit duty units).
    pub fn pulse_width(&self) -> u16 {
        self.pulse_width.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pulse_width(&self, value: u16) {
        self.pulse_width.store(value, Ordering::Relaxed);
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::DeviceStateSnapshot {
        crate::savestate::DeviceStateSnapshot {
            sampled: self.sampled_value(),
            counter: self.counter(),
            pulse_width: self.pulse_width(),
        }
    }

    /// Restore state from save state.
    pub fn load_state(&self, s: &crate::savestate::DeviceStateSnapshot) {
        self.sampled.store(s.sampled, Ordering::Relaxed);
        self.counter.store(s.counter, Ordering::Relaxed);
        self.pulse_width.store(s.pulse_width, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_wraps() {
        let st = DeviceState::new(255);
        assert_eq!(st.increment_counter(), 0);
        assert_eq!(st.decrement_counter(), 255);
        assert_eq!(st.counter(), 255);
    }

    #[test]
    fn test_seed_and_sample() {
        let st = DeviceState::new(5);
        assert_eq!(st.counter(), 5);
        assert_eq!(st.sampled_value(), 0);
        st.latch_sample(200);
        assert_eq!(st.sampled_value(), 200);
    }
}
