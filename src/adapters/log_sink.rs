//! Log-based status sink adapter.
//!
//! Implements [`EventSink`] by writing every status line to the `log`
//! facade (which the simulator routes to the terminal).  A serial-host or
//! LCD adapter would implement the same trait.

use log::{info, warn};

use crate::app::events::StatusEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`StatusEvent`] as one line.
#[derive(Debug, Default)]
pub struct LogStatusSink {
    emitted: u32,
}

impl LogStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status lines written so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogStatusSink {
    fn emit(&mut self, event: &StatusEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            StatusEvent::ProbingFailed
            | StatusEvent::Implausible(_)
            | StatusEvent::CorrectManually
            | StatusEvent::NoConvergence { .. }
            | StatusEvent::EndstopsHit(_) => warn!("STATUS | {}", event),
            _ => info!("STATUS | {}", event),
        }
    }
}
