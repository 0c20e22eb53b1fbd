//! Per-invocation calibration state.
//!
//! Created when G33 starts and dropped when it returns.  Nothing in here is
//! persisted; saving goes through the settings port on an explicit M500.

use heapless::Vec;

use super::geometry::GeometryParameters;

/// Upper bound on iterations (and so on metric history).
pub const MAX_ITERATIONS: usize = 30;

#[derive(Debug, Clone)]
pub struct CalibrationSession {
    iteration: u8,
    current: GeometryParameters,
    previous: GeometryParameters,
    best: GeometryParameters,
    best_std_dev: Option<f32>,
    history: Vec<f32, MAX_ITERATIONS>,
}

impl CalibrationSession {
    pub fn new(start: GeometryParameters) -> Self {
        Self {
            iteration: 0,
            current: start,
            previous: start,
            best: start,
            best_std_dev: None,
            history: Vec::new(),
        }
    }

    /// Start the next iteration and return its 1-based number.
    pub fn begin_iteration(&mut self) -> u8 {
        self.iteration = self.iteration.saturating_add(1);
        self.iteration
    }

    pub fn iteration(&self) -> u8 {
        self.iteration
    }

    pub fn current(&self) -> &GeometryParameters {
        &self.current
    }

    pub fn previous(&self) -> &GeometryParameters {
        &self.previous
    }

    pub fn best(&self) -> &GeometryParameters {
        &self.best
    }

    pub fn best_std_dev(&self) -> Option<f32> {
        self.best_std_dev
    }

    /// Record the metric measured with the current geometry.  The current
    /// geometry becomes the rollback point if it is the best seen so far.
    pub fn record(&mut self, std_dev: f32) {
        // Capacity matches the iteration cap.
        let _ = self.history.push(std_dev);
        if self.best_std_dev.is_none_or(|best| std_dev < best) {
            self.best_std_dev = Some(std_dev);
            self.best = self.current;
        }
    }

    pub fn history(&self) -> &[f32] {
        &self.history
    }

    /// Metric of the iteration before the latest one.
    pub fn previous_std_dev(&self) -> Option<f32> {
        let n = self.history.len();
        (n >= 2).then(|| self.history[n - 2])
    }

    /// Adopt a corrected geometry.
    pub fn advance(&mut self, next: GeometryParameters) {
        self.previous = self.current;
        self.current = next;
    }

    /// Fall back to the best geometry seen and return it.
    pub fn roll_back(&mut self) -> GeometryParameters {
        self.previous = self.current;
        self.current = self.best;
        self.current
    }
}
