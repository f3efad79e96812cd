//! Chip-select sequencing on the coordinator.
//!
//! Select lines idle high (deselected) and are driven low to address a
//! responder. Before a line is driven low every other line is forced high,
//! so two responders are never selected at the same time.

use log::debug;

use crate::error::NetError;
use crate::transport::ControllerPort;

#[derive(Debug, Clone)]
pub struct ChipSelect {
    settle_cycles: u64,
}

impl ChipSelect {
    pub fn new(settle_cycles: u64) -> Self {
        ChipSelect { settle_cycles }
    }

    pub fn settle_cycles(&self) -> u64 {
        self.settle_cycles
    }

    /// Address `target`: deselect all other lines, then drive `target` low.
    pub fn select<P: ControllerPort + ?Sized>(&self, port: &mut P, target: usize) -> Result<(), NetError> {
        if target >= port.select_lines() {
            return Err(NetError::NoSuchResponder(target));
        }
        for line in (0..port.select_lines()).filter(|&l| l != target) {
            port.set_select(line, true)?;
        }
        port.set_select(target, false)
    }

    /// Release `target` (drive it high).
    pub fn deselect<P: ControllerPort + ?Sized>(&self, port: &mut P, target: usize) -> Result<(), NetError> {
        port.set_select(target, true)
    }

    /// Deselect `target`, hold for the settle delay, then address it again.
    pub fn reselect<P: ControllerPort + ?Sized>(&self, port: &mut P, target: usize) -> Result<(), NetError> {
        self.deselect(port, target)?;
        port.delay_cycles(self.settle_cycles);
        debug!("line {} reselected after {} cycles", target, self.settle_cycles);
        self.select(port, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::FakePort;

    fn active(levels: &[bool]) -> usize {
        levels.iter().filter(|high| !**high).count()
    }

    #[test]
    fn test_select_never_overlaps() {
        let mut port = FakePort::new(2);
        let cs = ChipSelect::new(5);
        cs.select(&mut port, 0).unwrap();
        cs.select(&mut port, 1).unwrap();
        cs.reselect(&mut port, 0).unwrap();
        assert!(port.select_log.iter().all(|lv| active(lv) <= 1));
        assert_eq!(port.selects, vec![false, true]);
    }

    #[test]
    fn test_reselect_holds_settle_delay() {
        let mut port = FakePort::new(1);
        let cs = ChipSelect::new(2500);
        cs.select(&mut port, 0).unwrap();
        cs.reselect(&mut port, 0).unwrap();
        assert_eq!(port.tick, 2500);
        assert_eq!(port.selects, vec![false]);
        // low, high, low
        let line0: Vec<bool> = port.select_log.iter().map(|lv| lv[0]).collect();
        assert_eq!(line0, vec![false, true, false]);
    }

    #[test]
    fn test_unknown_line() {
        let mut port = FakePort::new(1);
        let cs = ChipSelect::new(1);
        assert!(matches!(cs.select(&mut port, 3), Err(NetError::NoSuchResponder(3))));
    }
}
