//! Edge counter: PORTB change handler of the counter responder.
//!
//! Buttons on RB0 (increment) and RB1 (decrement) are active-low. A pin
//! counts only when it went from released to pressed since the last port
//! read, so releasing one button while the other is held adjusts nothing.
//! Only one adjustment is applied per invocation; RB0 is checked first.

use log::trace;

use crate::peripherals::PortChange;
use crate::state::DeviceState;

/// PORTB pin that increments the counter
pub const INCREMENT_PIN: u8 = 0;
/// PORTB pin that decrements the counter
pub const DECREMENT_PIN: u8 = 1;
/// Pins monitored for changes
pub const BUTTON_MASK: u8 = (1 << INCREMENT_PIN) | (1 << DECREMENT_PIN);

/// What a change interrupt did to the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    Increment,
    Decrement,
    /// A release edge, or an unmonitored change
    None,
}

/// Change handler: read the port, adjust the counter, clear RBIF.
pub fn on_port_change(port: &mut PortChange, state: &DeviceState) -> EdgeAction {
    let prev = port.latch();
    let levels = port.read_port();
    let pressed = prev & !levels & BUTTON_MASK;
    let action = if pressed & (1 << INCREMENT_PIN) != 0 {
        state.increment_counter();
        EdgeAction::Increment
    } else if pressed & (1 << DECREMENT_PIN) != 0 {
        state.decrement_counter();
        EdgeAction::Decrement
    } else {
        EdgeAction::None
    };
    port.clear_flag();
    trace!("port change {:?} -> counter {}", action, state.counter());
    action
}
