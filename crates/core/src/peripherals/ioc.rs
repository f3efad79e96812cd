//! PORTB interrupt-on-change emulation.
//!
//! Pins are inputs biased high by weak pull-ups and pulled low by external
//! switches, so a pressed button reads 0. The port keeps a latch of the value
//! last read; whenever an IOCB-enabled pin differs from the latch, RBIF is
//! set. Reading the port refreshes the latch and ends the mismatch, which is
//! why a handler has to read PORTB before clearing RBIF. Clearing the flag
//! while a mismatch persists sets it again immediately.

use super::Irq;

pub struct PortChange {
    /// Pins pulled to ground by an external switch
    grounded: u8,
    /// WPUB: weak pull-up enables
    pull_ups: u8,
    /// IOCB: change-interrupt enables
    iocb: u8,
    /// Value captured by the last port read
    latch: u8,
    pub rbie: bool,
    pub rbif: bool,
    /// Debug counter: RBIF assertions
    pub dbg_changes: u64,
}

impl PortChange {
    pub fn new() -> Self {
        PortChange {
            grounded: 0, pull_ups: 0, iocb: 0, latch: 0,
            rbie: false, rbif: false, dbg_changes: 0,
        }
    }

    /// Enable pull-ups and change interrupts on `mask`.
    pub fn configure(&mut self, mask: u8) {
        self.pull_ups |= mask;
        self.iocb |= mask;
        self.rbie = true;
        self.latch = self.levels();
        self.rbif = false;
    }

    /// Current pin levels. Unbiased, undriven pins read low.
    pub fn levels(&self) -> u8 {
        self.pull_ups & !self.grounded
    }

    /// Press (ground) or release a switch on `pin`.
    pub fn set_switch(&mut self, pin: u8, pressed: bool) {
        let bit = 1u8 << (pin & 7);
        if pressed {
            self.grounded |= bit;
        } else {
            self.grounded &= !bit;
        }
        self.check_mismatch();
    }

    /// Value captured by the last port read.
    pub fn latch(&self) -> u8 {
        self.latch
    }

    /// Read PORTB, ending any mismatch condition.
    pub fn read_port(&mut self) -> u8 {
        self.latch = self.levels();
        self.latch
    }

    fn check_mismatch(&mut self) {
        if (self.levels() ^ self.latch) & self.iocb != 0 && !self.rbif {
            self.rbif = true;
            self.dbg_changes += 1;
        }
    }

    pub fn check_interrupt(&self) -> Option<Irq> {
        if self.rbif && self.rbie {
            return Some(Irq::PortChange);
        }
        None
    }

    pub fn clear_flag(&mut self) {
        self.rbif = false;
        self.check_mismatch();
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::PortChangeState {
        crate::savestate::PortChangeState {
            grounded: self.grounded, pull_ups: self.pull_ups, iocb: self.iocb,
            latch: self.latch, rbie: self.rbie, rbif: self.rbif,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::PortChangeState) {
        self.grounded = s.grounded; self.pull_ups = s.pull_ups; self.iocb = s.iocb;
        self.latch = s.latch; self.rbie = s.rbie; self.rbif = s.rbif;
    }
}

impl Default for PortChange {
    fn default() -> Self {
        Self::new()
    }
}
