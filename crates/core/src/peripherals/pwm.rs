//! Timer2 + CCP1 pulse-width modulation emulation.
//!
//! The PWM period is set by PR2 and the Timer2 prescaler:
//!
//! ```text
//! period = (PR2 + 1) × 4 × Tosc × prescale
//! pulse  = (CCPR1L:DC1B) × Tosc × prescale
//! ```
//!
//! The 10-bit duty value is split across two fields: the upper eight bits in
//! CCPR1L and the lower two in CCP1CON<5:4> (DC1B). A duty larger than the
//! period holds the output high for the whole period.

use crate::config::CLOCK_HZ;

pub struct Pwm {
    pub pr2: u8,
    /// Timer2 prescaler (1, 4 or 16)
    pub prescale: u8,
    pub tmr2on: bool,
    pub pwm_mode: bool,
    pub ccpr1l: u8,
    pub dc1b: u8,
}

impl Pwm {
    pub fn new() -> Self {
        Pwm { pr2: 0xFF, prescale: 1, tmr2on: false, pwm_mode: false, ccpr1l: 0, dc1b: 0 }
    }

    /// Start Timer2 and switch CCP1 into single-output PWM mode.
    pub fn configure(&mut self, pr2: u8, prescale: u8) {
        self.pr2 = pr2;
        self.prescale = match prescale {
            0..=1 => 1,
            2..=4 => 4,
            _ => 16,
        };
        self.tmr2on = true;
        self.pwm_mode = true;
    }

    /// Write both duty fields. Only the low two bits of `low` are kept.
    pub fn set_duty_fields(&mut self, high: u8, low: u8) {
        self.ccpr1l = high;
        self.dc1b = low & 0b11;
    }

    /// Combined 10-bit duty value.
    pub fn duty(&self) -> u16 {
        ((self.ccpr1l as u16) << 2) | self.dc1b as u16
    }

    pub fn period_us(&self) -> f32 {
        let tosc_us = 1_000_000.0 / CLOCK_HZ as f32;
        (self.pr2 as f32 + 1.0) * 4.0 * tosc_us * self.prescale as f32
    }

    /// High time of the output in microseconds, 0 when the timer is stopped.
    pub fn pulse_width_us(&self) -> f32 {
        if !self.tmr2on || !self.pwm_mode {
            return 0.0;
        }
        let tosc_us = 1_000_000.0 / CLOCK_HZ as f32;
        let pulse = self.duty() as f32 * tosc_us * self.prescale as f32;
        pulse.min(self.period_us())
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::PwmState {
        crate::savestate::PwmState {
            pr2: self.pr2, prescale: self.prescale, tmr2on: self.tmr2on,
            pwm_mode: self.pwm_mode, ccpr1l: self.ccpr1l, dc1b: self.dc1b,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::PwmState) {
        self.pr2 = s.pr2; self.prescale = s.prescale; self.tmr2on = s.tmr2on;
        self.pwm_mode = s.pwm_mode; self.ccpr1l = s.ccpr1l; self.dc1b = s.dc1b;
    }
}

impl Default for Pwm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servo_timing() {
        let mut pwm = Pwm::new();
        pwm.configure(61, 16);
        // (61 + 1) × 4 × 1 µs × 16
        assert!((pwm.period_us() - 3968.0).abs() < 0.01);
        pwm.set_duty_fields((62u16 >> 2) as u8, (62u16 & 0b11) as u8);
        assert_eq!(pwm.duty(), 62);
        assert!((pwm.pulse_width_us() - 992.0).abs() < 0.01);
    }

    #[test]
    fn test_duty_split_and_clamp() {
        let mut pwm = Pwm::new();
        pwm.configure(61, 16);
        pwm.set_duty_fields(250 >> 2, 0xFF);
        assert_eq!(pwm.dc1b, 0b11);
        assert_eq!(pwm.duty(), 251);
        // Longer than the period: output stays high
        assert!((pwm.pulse_width_us() - pwm.period_us()).abs() < 0.01);
    }

    #[test]
    fn test_stopped_timer_has_no_pulse() {
        let mut pwm = Pwm::new();
        pwm.set_duty_fields(31, 2);
        assert_eq!(pwm.pulse_width_us(), 0.0);
    }
}
