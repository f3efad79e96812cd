//! Analog sampler: conversion-complete handler and the throttled trigger.

use log::{debug, trace};

use crate::peripherals::Adc;
use crate::state::DeviceState;
use crate::transport::ControllerPort;

/// Conversion-complete handler.
///
/// Latches ADRESH into SampledValue when the converter is on
/// `expected_channel`; a conversion of any other channel is dropped. ADIF is
/// cleared either way. Returns the latched value.
pub fn on_conversion_complete(adc: &mut Adc, state: &DeviceState, expected_channel: u8) -> Option<u8> {
    let latched = if adc.chs == expected_channel {
        state.latch_sample(adc.adresh);
        trace!("sample latched: {}", adc.adresh);
        Some(adc.adresh)
    } else {
        debug!("conversion on AN{} ignored (expected AN{})", adc.chs, expected_channel);
        None
    };
    adc.clear_flag();
    latched
}

/// Start a new conversion if the previous one has finished.
///
/// Waits `guard_cycles` before setting GO. Returns whether a conversion was
/// started, so at most one is requested per poll iteration.
pub fn request_conversion<P: ControllerPort + ?Sized>(port: &mut P, guard_cycles: u64) -> bool {
    if port.conversion_in_progress() {
        return false;
    }
    port.delay_cycles(guard_cycles);
    port.start_conversion();
    true
}
