//! Controller-side bus transport.
//!
//! [`ControllerPort`] is the coordinator firmware's view of its hardware. The
//! simulated [`Network`](crate::Network) implements it; tests can implement it
//! directly. Every blocking wait goes through [`wait_complete`], which bounds
//! the spin by [`WaitBound`] instead of hanging.

use log::debug;

use crate::config::WaitBound;
use crate::error::NetError;

/// Registers and pins the coordinator firmware touches.
pub trait ControllerPort {
    /// Current time in instruction cycles.
    fn now(&self) -> u64;
    /// Spin for `cycles`. Interrupts keep being serviced meanwhile.
    fn delay_cycles(&mut self, cycles: u64);

    /// GO/DONE of the analog sampler.
    fn conversion_in_progress(&self) -> bool;
    fn start_conversion(&mut self);
    /// Latest SampledValue.
    fn sampled_value(&self) -> u8;

    /// Write SSPBUF, starting a transfer.
    fn write_buffer(&mut self, byte: u8);
    /// BF: a full byte has been exchanged.
    fn buffer_full(&self) -> bool;
    /// Read SSPBUF, clearing BF.
    fn read_buffer(&mut self) -> u8;
    /// True while bits are still being shifted.
    fn transfer_in_flight(&self) -> bool;

    /// Drive a select line: `true` = high = deselected.
    fn set_select(&mut self, line: usize, high: bool) -> Result<(), NetError>;
    /// Number of select lines wired.
    fn select_lines(&self) -> usize;

    /// Write the parallel display port.
    fn write_display(&mut self, value: u8);
}

/// Spin until BF is set or the bound runs out.
pub fn wait_complete<P: ControllerPort + ?Sized>(port: &mut P, bound: WaitBound) -> Result<(), NetError> {
    let mut waited = 0u64;
    while !port.buffer_full() {
        if let WaitBound::Cycles(max) = bound {
            if waited >= max {
                return Err(NetError::BusStall { waited });
            }
        }
        port.delay_cycles(1);
        waited += 1;
    }
    Ok(())
}

/// Exchange one byte with whichever responder is selected.
///
/// Returns the byte the responder had staged *before* this transfer began.
/// Fails with [`NetError::TransferInFlight`] if a previous transfer has not
/// finished and with [`NetError::BusStall`] if this one never completes.
pub fn transfer<P: ControllerPort + ?Sized>(port: &mut P, byte: u8, bound: WaitBound) -> Result<u8, NetError> {
    if port.transfer_in_flight() {
        return Err(NetError::TransferInFlight);
    }
    if port.buffer_full() {
        // Left over from a transfer that finished after its wait gave up
        let stale = port.read_buffer();
        debug!("discarding stale receive byte 0x{:02X}", stale);
    }
    port.write_buffer(byte);
    wait_complete(port, bound)?;
    let received = port.read_buffer();
    debug!("transfer out=0x{:02X} in=0x{:02X}", byte, received);
    Ok(received)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Loopback port: every transfer completes after `latency` cycles and
    /// returns `reply`. Select levels are recorded.
    pub(crate) struct FakePort {
        pub tick: u64,
        pub latency: Option<u64>,
        pub reply: u8,
        pub sent: Vec<u8>,
        pub done_at: Option<u64>,
        pub bf: bool,
        pub selects: Vec<bool>,
        pub select_log: Vec<Vec<bool>>,
        pub display: u8,
        pub sampled: u8,
        pub adc_busy: bool,
        pub conversions: u32,
    }

    impl FakePort {
        pub(crate) fn new(lines: usize) -> Self {
            FakePort {
                tick: 0, latency: Some(8), reply: 0, sent: Vec::new(),
                done_at: None, bf: false,
                selects: vec![true; lines], select_log: Vec::new(),
                display: 0, sampled: 0, adc_busy: false, conversions: 0,
            }
        }
    }

    impl ControllerPort for FakePort {
        fn now(&self) -> u64 { self.tick }
        fn delay_cycles(&mut self, cycles: u64) {
            for _ in 0..cycles {
                self.tick += 1;
                if let Some(t) = self.done_at {
                    if self.tick >= t { self.done_at = None; self.bf = true; }
                }
            }
        }
        fn conversion_in_progress(&self) -> bool { self.adc_busy }
        fn start_conversion(&mut self) { self.conversions += 1; }
        fn sampled_value(&self) -> u8 { self.sampled }
        fn write_buffer(&mut self, byte: u8) {
            self.sent.push(byte);
            if let Some(l) = self.latency { self.done_at = Some(self.tick + l); }
        }
        fn buffer_full(&self) -> bool { self.bf }
        fn read_buffer(&mut self) -> u8 { self.bf = false; self.reply }
        fn transfer_in_flight(&self) -> bool { self.done_at.is_some() }
        fn set_select(&mut self, line: usize, high: bool) -> Result<(), NetError> {
            let slot = self.selects.get_mut(line).ok_or(NetError::NoSuchResponder(line))?;
            *slot = high;
            self.select_log.push(self.selects.clone());
            Ok(())
        }
        fn select_lines(&self) -> usize { self.selects.len() }
        fn write_display(&mut self, value: u8) { self.display = value; }
    }

    #[test]
    fn test_transfer_returns_reply() {
        let mut port = FakePort::new(1);
        port.reply = 0x5A;
        let got = transfer(&mut port, 0x11, WaitBound::Cycles(100)).unwrap();
        assert_eq!(got, 0x5A);
        assert_eq!(port.sent, vec![0x11]);
        assert_eq!(port.tick, 8);
        assert!(!port.buffer_full());
    }

    #[test]
    fn test_stall_is_reported() {
        let mut port = FakePort::new(1);
        port.latency = None;
        match transfer(&mut port, 0x11, WaitBound::Cycles(50)) {
            Err(NetError::BusStall { waited }) => assert_eq!(waited, 50),
            other => panic!("expected stall, got {:?}", other),
        }
    }

    #[test]
    fn test_refuses_overlapping_transfer() {
        let mut port = FakePort::new(1);
        port.latency = None;
        let _ = transfer(&mut port, 1, WaitBound::Cycles(10));
        port.done_at = Some(1000);
        assert!(matches!(transfer(&mut port, 2, WaitBound::Cycles(10)), Err(NetError::TransferInFlight)));
        assert_eq!(port.sent, vec![1]);
    }

    #[test]
    fn test_stale_byte_discarded() {
        let mut port = FakePort::new(1);
        port.bf = true;
        port.reply = 3;
        assert_eq!(transfer(&mut port, 9, WaitBound::Forever).unwrap(), 3);
        // Waited for the real completion, not the stale flag
        assert_eq!(port.tick, 8);
    }
}
