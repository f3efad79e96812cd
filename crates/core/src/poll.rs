//! Coordinator poll cycle.
//!
//! One iteration:
//!
//! 1. request a conversion if the sampler is idle (after the guard delay)
//! 2. for each responder in plan order:
//!    - select it, transmit SampledValue, wait
//!    - if it reports back: deselect, settle, reselect, transmit the
//!      sentinel, wait, show the received byte on the display port
//!
//! Every wait is bounded by the configured [`WaitBound`].

use log::debug;

use crate::config::{NetworkConfig, WaitBound, SENTINEL};
use crate::error::NetError;
use crate::sampler;
use crate::sequencer::ChipSelect;
use crate::transport::{self, ControllerPort};

/// One responder's slot in the poll plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTarget {
    /// Select line index
    pub line: usize,
    /// Send the sentinel afterwards and display the reply
    pub solicit_reply: bool,
}

/// Result of one poll iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// A new conversion was triggered this iteration
    pub sample_requested: bool,
    /// SampledValue transmitted in the data phase
    pub sent: u8,
    /// (select line, reply) for every responder polled
    pub replies: Vec<(usize, u8)>,
    /// Value written to the display port, if any
    pub displayed: Option<u8>,
    pub started_at: u64,
    pub cycles: u64,
}

#[derive(Debug, Clone)]
pub struct PollCycle {
    targets: Vec<PollTarget>,
    chip_select: ChipSelect,
    wait: WaitBound,
    adc_guard_cycles: u64,
}

impl PollCycle {
    pub fn new(targets: Vec<PollTarget>, chip_select: ChipSelect, wait: WaitBound, adc_guard_cycles: u64) -> Self {
        PollCycle { targets, chip_select, wait, adc_guard_cycles }
    }

    /// Build the plan for a configuration; `replies[i]` says whether the
    /// responder on line `i` reports back.
    pub fn from_config(config: &NetworkConfig, replies: &[bool]) -> Self {
        let targets = replies.iter().enumerate()
            .map(|(line, &solicit_reply)| PollTarget { line, solicit_reply })
            .collect();
        PollCycle::new(
            targets,
            ChipSelect::new(config.settle_cycles()),
            config.wait,
            config.adc_guard_cycles(),
        )
    }

    pub fn targets(&self) -> &[PollTarget] {
        &self.targets
    }

    /// Run one iteration against `port`.
    pub fn run_once<P: ControllerPort + ?Sized>(&self, port: &mut P) -> Result<PollReport, NetError> {
        let started_at = port.now();
        let sample_requested = sampler::request_conversion(port, self.adc_guard_cycles);
        let sent = port.sampled_value();
        let mut replies = Vec::new();
        let mut displayed = None;

        for target in &self.targets {
            self.chip_select.select(port, target.line)?;
            transport::transfer(port, sent, self.wait)?;
            if target.solicit_reply {
                self.chip_select.reselect(port, target.line)?;
                let reply = transport::transfer(port, SENTINEL, self.wait)?;
                port.write_display(reply);
                replies.push((target.line, reply));
                displayed = Some(reply);
            }
        }

        let report = PollReport {
            sample_requested,
            sent,
            replies,
            displayed,
            started_at,
            cycles: port.now() - started_at,
        };
        debug!("poll: sent={} replies={:?} in {} cycles", report.sent, report.replies, report.cycles);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::FakePort;

    fn plan(replies: &[bool], settle: u64) -> PollCycle {
        let targets = replies.iter().enumerate()
            .map(|(line, &solicit_reply)| PollTarget { line, solicit_reply })
            .collect();
        PollCycle::new(targets, ChipSelect::new(settle), WaitBound::Cycles(100), 10)
    }

    #[test]
    fn test_single_responder_sequence() {
        let mut port = FakePort::new(1);
        port.sampled = 77;
        port.reply = 8;
        let report = plan(&[true], 2500).run_once(&mut port).unwrap();
        assert_eq!(port.sent, vec![77, SENTINEL]);
        assert_eq!(report.replies, vec![(0, 8)]);
        assert_eq!(report.displayed, Some(8));
        assert_eq!(port.display, 8);
        assert!(report.sample_requested);
        // guard + byte + settle + byte
        assert_eq!(report.cycles, 10 + 8 + 2500 + 8);
    }

    #[test]
    fn test_actuator_not_polled() {
        let mut port = FakePort::new(2);
        port.sampled = 40;
        port.reply = 3;
        let report = plan(&[false, true], 20).run_once(&mut port).unwrap();
        assert_eq!(port.sent, vec![40, 40, SENTINEL]);
        assert_eq!(report.replies, vec![(1, 3)]);
        assert!(port.select_log.iter().all(|lv| lv.iter().filter(|h| !**h).count() <= 1));
    }

    #[test]
    fn test_stall_aborts_iteration() {
        let mut port = FakePort::new(1);
        port.latency = None;
        let err = plan(&[true], 5).run_once(&mut port).unwrap_err();
        assert!(matches!(err, NetError::BusStall { waited: 100 }));
        assert_eq!(port.sent.len(), 1);
    }
}
