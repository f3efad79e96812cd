//! Analog-to-digital converter emulation.
//!
//! Setting GO starts a conversion of the selected channel. After
//! [`ADC_CONVERSION_CYCLES`] the 10-bit result is stored left-justified
//! (ADRESH holds the top eight bits), GO/DONE clears and ADIF is raised.
//! Analog levels are injected per channel with [`Adc::set_input`].

use super::Irq;
use crate::config::ADC_CONVERSION_CYCLES;

/// Number of analog channels (AN0–AN13)
pub const ADC_CHANNELS: usize = 14;

pub struct Adc {
    pub adon: bool,
    pub go: bool,
    pub adie: bool,
    pub adif: bool,
    /// Channel select (CHS)
    pub chs: u8,
    pub adresh: u8,
    pub adresl: u8,
    inputs: [u16; ADC_CHANNELS],
    done_at: u64,
    /// Debug counter: completed conversions
    pub dbg_conversions: u64,
}

impl Adc {
    pub fn new() -> Self {
        Adc {
            adon: false, go: false, adie: false, adif: false,
            chs: 0, adresh: 0, adresl: 0,
            inputs: [0; ADC_CHANNELS],
            done_at: 0,
            dbg_conversions: 0,
        }
    }

    /// Power the converter on with a fixed channel and interrupt enable.
    pub fn configure(&mut self, channel: u8, interrupt: bool) {
        self.adon = true;
        self.chs = channel.min(ADC_CHANNELS as u8 - 1);
        self.adie = interrupt;
        self.adif = false;
    }

    /// Set the analog level (0–1023) seen on a channel.
    pub fn set_input(&mut self, channel: u8, level: u16) {
        if let Some(slot) = self.inputs.get_mut(channel as usize) {
            *slot = level.min(0x3FF);
        }
    }

    pub fn input(&self, channel: u8) -> u16 {
        self.inputs.get(channel as usize).copied().unwrap_or(0)
    }

    /// GO/DONE: true while a conversion is in progress.
    pub fn is_busy(&self) -> bool {
        self.go
    }

    /// Set GO. Ignored while the converter is off or already converting.
    pub fn start_conversion(&mut self, tick: u64) {
        if !self.adon || self.go {
            return;
        }
        self.go = true;
        self.done_at = tick + ADC_CONVERSION_CYCLES;
    }

    /// Finish a pending conversion once its time has elapsed.
    pub fn update(&mut self, tick: u64) {
        if self.go && tick >= self.done_at {
            let raw = self.input(self.chs);
            self.adresh = (raw >> 2) as u8;
            self.adresl = ((raw & 0x3) << 6) as u8;
            self.go = false;
            self.adif = true;
            self.dbg_conversions += 1;
        }
    }

    /// Complete a conversion immediately with the given ADRESH value.
    pub fn inject_result(&mut self, adresh: u8) {
        self.adresh = adresh;
        self.adresl = 0;
        self.go = false;
        self.adif = true;
    }

    pub fn check_interrupt(&self) -> Option<Irq> {
        if self.adif && self.adie {
            return Some(Irq::Adc);
        }
        None
    }

    pub fn clear_flag(&mut self) {
        self.adif = false;
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::AdcState {
        crate::savestate::AdcState {
            adon: self.adon, go: self.go, adie: self.adie, adif: self.adif,
            chs: self.chs, adresh: self.adresh, adresl: self.adresl,
            inputs: self.inputs.to_vec(), done_at: self.done_at,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::AdcState) {
        self.adon = s.adon; self.go = s.go; self.adie = s.adie; self.adif = s.adif;
        self.chs = s.chs; self.adresh = s.adresh; self.adresl = s.adresl;
        for (slot, v) in self.inputs.iter_mut().zip(s.inputs.iter()) { *slot = *v; }
        self.done_at = s.done_at;
    }
}

impl Default for Adc {
    fn default() -> Self {
        Self::new()
    }
}
