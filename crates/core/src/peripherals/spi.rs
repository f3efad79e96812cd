//! MSSP synchronous serial port emulation.
//!
//! Models SSPBUF, the shift register behind it, and the SSPSTAT/SSPCON bits
//! the protocol depends on: BF, WCOL, SSPOV and SSPIF.
//!
//! - A controller starts a transfer by writing SSPBUF. The byte moves into
//!   the shift register and the bus clocks it out over the following
//!   [`BUS_BYTE_CYCLES`](crate::config::BUS_BYTE_CYCLES).
//! - A responder writes SSPBUF to stage the byte it will shift out the next
//!   time the controller clocks it. Without a new write the shift register
//!   still holds the last received byte, which is echoed back.
//! - Writing SSPBUF while a transfer is in progress sets WCOL and the write
//!   is lost.
//! - A byte that arrives while BF is still set raises SSPOV and is dropped.

use serde::{Deserialize, Serialize};

use super::Irq;

/// Bus role, fixed at setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpiRole {
    /// Drives the clock and initiates every transfer
    Controller,
    /// Shifts data only while selected and clocked
    Responder,
}

pub struct Spi {
    pub role: SpiRole,
    pub sspen: bool,
    pub sspie: bool,
    pub sspif: bool,
    /// Buffer full: SSPBUF holds an unread received byte
    pub bf: bool,
    pub wcol: bool,
    pub sspov: bool,
    rx_buf: u8,
    shift: u8,
    busy: bool,
    /// Debug counter: completed byte exchanges
    pub dbg_transfers: u64,
}

impl Spi {
    pub fn new(role: SpiRole) -> Self {
        Spi {
            role,
            sspen: false, sspie: false, sspif: false,
            bf: false, wcol: false, sspov: false,
            rx_buf: 0, shift: 0, busy: false,
            dbg_transfers: 0,
        }
    }

    /// Set SSPEN and the interrupt enable.
    pub fn enable(&mut self, interrupt: bool) {
        self.sspen = true;
        self.sspie = interrupt;
    }

    /// Write SSPBUF. Returns true when the write started a controller transfer.
    pub fn write_buf(&mut self, value: u8) -> bool {
        if self.busy {
            self.wcol = true;
            return false;
        }
        self.shift = value;
        if self.role == SpiRole::Controller && self.sspen {
            self.busy = true;
            return true;
        }
        false
    }

    /// Read SSPBUF, clearing BF.
    pub fn read_buf(&mut self) -> u8 {
        self.bf = false;
        self.rx_buf
    }

    /// SSPBUF contents without side effects.
    pub fn peek_buf(&self) -> u8 {
        self.rx_buf
    }

    /// Byte that will be shifted out on the next exchange.
    pub fn outgoing(&self) -> u8 {
        self.shift
    }

    /// True while bits are being shifted.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Responder side: the controller started clocking this port.
    pub fn begin_receive(&mut self) {
        if self.sspen {
            self.busy = true;
        }
    }

    /// Finish an exchange, latching the byte shifted in.
    pub fn complete(&mut self, incoming: u8) {
        self.busy = false;
        if self.bf {
            self.sspov = true;
        } else {
            self.rx_buf = incoming;
            self.bf = true;
        }
        self.shift = incoming;
        self.sspif = true;
        self.dbg_transfers += 1;
    }

    /// Drop a partially shifted byte (select released mid-transfer).
    pub fn abort(&mut self) {
        self.busy = false;
    }

    pub fn check_interrupt(&self) -> Option<Irq> {
        if self.sspif && self.sspie {
            return Some(Irq::Spi);
        }
        None
    }

    pub fn clear_flag(&mut self) {
        self.sspif = false;
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::SpiState {
        crate::savestate::SpiState {
            role: self.role, sspen: self.sspen, sspie: self.sspie, sspif: self.sspif,
            bf: self.bf, wcol: self.wcol, sspov: self.sspov,
            rx_buf: self.rx_buf, shift: self.shift, busy: self.busy,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::SpiState) {
        self.role = s.role; self.sspen = s.sspen; self.sspie = s.sspie; self.sspif = s.sspif;
        self.bf = s.bf; self.wcol = s.wcol; self.sspov = s.sspov;
        self.rx_buf = s.rx_buf; self.shift = s.shift; self.busy = s.busy;
    }
}
