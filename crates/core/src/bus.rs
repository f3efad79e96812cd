//! Shared synchronous serial bus wiring.
//!
//! Connects the coordinator's serial port to every responder's serial port.
//! Clock and data-out lines are shared; each responder has its own select
//! line. A transfer begins when the controller writes SSPBUF and completes
//! [`BUS_BYTE_CYCLES`] later. A responder takes part only if it is selected
//! when the transfer begins and is still selected when it completes.
//!
//! When nobody drives the data-in line the controller reads [`IDLE_LINE`].
//! Two responders driving it at once is contention; the controller then
//! reads the wired-AND of their bytes.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::config::{BUS_BYTE_CYCLES, IDLE_LINE};
use crate::error::NetError;
use crate::node::ResponderNode;
use crate::peripherals::Spi;

/// Select-line changes kept for inspection
const TRACE_DEPTH: usize = 64;

/// One recorded select-line change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectEvent {
    pub tick: u64,
    pub line: usize,
    /// New level: true = high = deselected
    pub high: bool,
    /// Responders selected after the change
    pub active: usize,
}

#[derive(Debug, Clone)]
struct InFlight {
    mosi: u8,
    done_at: u64,
    participants: Vec<usize>,
}

pub struct SpiBus {
    select_high: Vec<bool>,
    in_flight: Option<InFlight>,
    clock_held: bool,
    /// Highest number of responders ever selected at once
    pub peak_selected: usize,
    trace: VecDeque<SelectEvent>,
    /// Debug counters
    pub dbg_transfers: u64,
    pub dbg_contention: u64,
    pub dbg_select_changes: u64,
}

impl SpiBus {
    /// A bus with `lines` select lines, all at `initial_high`.
    pub fn new(lines: usize, initial_high: bool) -> Self {
        let peak = if initial_high { 0 } else { lines };
        SpiBus {
            select_high: vec![initial_high; lines],
            in_flight: None,
            clock_held: false,
            peak_selected: peak,
            trace: VecDeque::with_capacity(TRACE_DEPTH),
            dbg_transfers: 0,
            dbg_contention: 0,
            dbg_select_changes: 0,
        }
    }

    pub fn lines(&self) -> usize {
        self.select_high.len()
    }

    pub fn is_selected(&self, line: usize) -> bool {
        self.select_high.get(line).map_or(false, |high| !high)
    }

    pub fn selected_count(&self) -> usize {
        self.select_high.iter().filter(|high| !**high).count()
    }

    pub fn select_levels(&self) -> &[bool] {
        &self.select_high
    }

    /// Drive a select line. Releasing a line mid-transfer drops that
    /// responder from the transfer.
    pub fn set_select(
        &mut self,
        line: usize,
        high: bool,
        tick: u64,
        responders: &mut [ResponderNode],
    ) -> Result<(), NetError> {
        let slot = self.select_high.get_mut(line).ok_or(NetError::NoSuchResponder(line))?;
        if *slot == high {
            return Ok(());
        }
        *slot = high;
        if high {
            if let Some(flight) = self.in_flight.as_mut() {
                if let Some(pos) = flight.participants.iter().position(|&p| p == line) {
                    flight.participants.remove(pos);
                    if let Some(r) = responders.get_mut(line) {
                        r.spi.abort();
                    }
                    warn!("line {} released mid-transfer", line);
                }
            }
        }
        let active = self.selected_count();
        self.peak_selected = self.peak_selected.max(active);
        self.dbg_select_changes += 1;
        if self.trace.len() == TRACE_DEPTH {
            self.trace.pop_front();
        }
        self.trace.push_back(SelectEvent { tick, line, high, active });
        debug!("select line {} -> {} ({} active)", line, if high { "high" } else { "low" }, active);
        if active > 1 {
            warn!("{} responders selected at once", active);
        }
        Ok(())
    }

    /// Start clocking `mosi` out. Called when the controller's SSPBUF write
    /// started a transfer.
    pub fn begin(&mut self, tick: u64, mosi: u8, responders: &mut [ResponderNode]) {
        let mut participants = Vec::new();
        for (line, r) in responders.iter_mut().enumerate() {
            if self.is_selected(line) && r.spi.sspen {
                r.spi.begin_receive();
                participants.push(line);
            }
        }
        self.in_flight = Some(InFlight { mosi, done_at: tick + BUS_BYTE_CYCLES, participants });
    }

    /// Complete the in-flight transfer once its bits have been clocked.
    pub fn update(&mut self, tick: u64, controller: &mut Spi, responders: &mut [ResponderNode]) {
        if self.clock_held {
            return;
        }
        match &self.in_flight {
            Some(flight) if tick >= flight.done_at => {}
            _ => return,
        }
        let Some(flight) = self.in_flight.take() else { return };

        let mut miso = IDLE_LINE;
        for &line in &flight.participants {
            if let Some(r) = responders.get(line) {
                miso &= r.spi.outgoing();
            }
        }
        if flight.participants.len() > 1 {
            self.dbg_contention += 1;
            warn!("bus contention between lines {:?}", flight.participants);
        }
        for &line in &flight.participants {
            if let Some(r) = responders.get_mut(line) {
                r.spi.complete(flight.mosi);
            }
        }
        controller.complete(miso);
        self.dbg_transfers += 1;
        debug!("bus: mosi=0x{:02X} miso=0x{:02X} lines={:?}", flight.mosi, miso, flight.participants);
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Freeze (or release) the bus clock. Releasing restarts the byte.
    pub fn hold_clock(&mut self, held: bool, tick: u64) {
        if self.clock_held && !held {
            if let Some(flight) = self.in_flight.as_mut() {
                flight.done_at = tick + BUS_BYTE_CYCLES;
            }
        }
        self.clock_held = held;
    }

    pub fn clock_held(&self) -> bool {
        self.clock_held
    }

    /// Most recent select-line changes, oldest first.
    pub fn trace(&self) -> impl Iterator<Item = &SelectEvent> {
        self.trace.iter()
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> crate::savestate::BusState {
        crate::savestate::BusState {
            select_high: self.select_high.clone(),
            in_flight: self.in_flight.as_ref().map(|f| (f.mosi, f.done_at, f.participants.clone())),
            clock_held: self.clock_held,
            peak_selected: self.peak_selected,
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &crate::savestate::BusState) {
        self.select_high = s.select_high.clone();
        self.in_flight = s.in_flight.as_ref().map(|(mosi, done_at, participants)| InFlight {
            mosi: *mosi, done_at: *done_at, participants: participants.clone(),
        });
        self.clock_held = s.clock_held;
        self.peak_selected = s.peak_selected;
        self.trace.clear();
    }
}
