//! GPIO endstop pin bank.
//!
//! Implements [`EndstopInputs`] over `embedded-hal` input pins so the timer
//! interrupt can feed [`EndstopDetector::sample`](crate::endstops::EndstopDetector::sample).
//! Each pin carries its own polarity; a pin that fails to read keeps its
//! previous level so one bad read cannot fake a trigger.

use embedded_hal::digital::InputPin;
use heapless::Vec;

use crate::endstops::{EndstopId, EndstopInputs, TriggerState};

const MAX_INPUTS: usize = EndstopId::COUNT;

struct Input<P> {
    id: EndstopId,
    pin: P,
    /// Triggered when the pin reads low (normally-closed switch).
    inverted: bool,
}

pub struct PinBank<P: InputPin> {
    inputs: Vec<Input<P>, MAX_INPUTS>,
    last: TriggerState,
    read_errors: u32,
}

impl<P: InputPin> PinBank<P> {
    pub fn new() -> Self {
        Self { inputs: Vec::new(), last: TriggerState::EMPTY, read_errors: 0 }
    }

    /// Bind a pin to an endstop.  Returns `false` if that endstop is already
    /// bound.
    pub fn bind(&mut self, id: EndstopId, pin: P, inverted: bool) -> bool {
        if self.inputs.iter().any(|i| i.id == id) {
            return false;
        }
        // One slot per EndstopId, so a new id always fits.
        self.inputs.push(Input { id, pin, inverted }).is_ok()
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors
    }
}

impl<P: InputPin> Default for PinBank<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: InputPin> EndstopInputs for PinBank<P> {
    fn read_raw(&mut self) -> TriggerState {
        let mut state = self.last;
        for input in &mut self.inputs {
            match input.pin.is_high() {
                Ok(high) => state = state.with(input.id, high != input.inverted),
                Err(_) => self.read_errors = self.read_errors.wrapping_add(1),
            }
        }
        self.last = state;
        state
    }
}
