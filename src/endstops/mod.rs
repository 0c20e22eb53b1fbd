//! Endstop trigger detection.
//!
//! Raw pin levels are sampled and filtered by a periodic timer interrupt;
//! the foreground (probing moves, homing) only ever reads the validated
//! view and the sticky hit set.
//!
//! ```text
//! ┌─────────────┐  sample()  ┌────────┐  update()  ┌───────────┐   ┌──────┐
//! │ Pin bank    │───────────▶│  live  │───────────▶│ validated │──▶│ hits │
//! │ (ISR side)  │            └────────┘  N stable  └───────────┘   └──────┘
//! └─────────────┘                          samples        │ edges      ▲
//!                                                         ▼            │
//!                                                  TransitionLog   trigger_state()
//!                                                                  hit_on_purpose()
//! ```
//!
//! Every bit-set lives in a single atomic word, so a reader can never see a
//! half-updated multi-endstop view.  `sample()` and `update()` must only be
//! called from one context (the timer interrupt); every other method is safe
//! from anywhere.

pub mod transitions;

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::config::EndstopSettings;
use transitions::TransitionLog;

// ---------------------------------------------------------------------------
// Identities
// ---------------------------------------------------------------------------

/// Motion axis (tower A/B/C on a delta).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl Axis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Identity of one physical trigger input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EndstopId {
    XMin = 0,
    XMax = 1,
    YMin = 2,
    YMax = 3,
    ZMin = 4,
    ZMax = 5,
    X2Min = 6,
    X2Max = 7,
    Y2Min = 8,
    Y2Max = 9,
    Z2Min = 10,
    Z2Max = 11,
    ZMinProbe = 12,
}

impl EndstopId {
    pub const COUNT: usize = 13;

    pub const ALL: [Self; Self::COUNT] = [
        Self::XMin,
        Self::XMax,
        Self::YMin,
        Self::YMax,
        Self::ZMin,
        Self::ZMax,
        Self::X2Min,
        Self::X2Max,
        Self::Y2Min,
        Self::Y2Max,
        Self::Z2Min,
        Self::Z2Max,
        Self::ZMinProbe,
    ];

    pub const fn bit(self) -> u16 {
        1 << self as u8
    }

    pub fn from_index(idx: u8) -> Option<Self> {
        Self::ALL.get(idx as usize).copied()
    }

    /// Axis this input limits.  The probe reports as Z.
    pub const fn axis(self) -> Axis {
        match self {
            Self::XMin | Self::XMax | Self::X2Min | Self::X2Max => Axis::X,
            Self::YMin | Self::YMax | Self::Y2Min | Self::Y2Max => Axis::Y,
            _ => Axis::Z,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::XMin => "x_min",
            Self::XMax => "x_max",
            Self::YMin => "y_min",
            Self::YMax => "y_max",
            Self::ZMin => "z_min",
            Self::ZMax => "z_max",
            Self::X2Min => "x2_min",
            Self::X2Max => "x2_max",
            Self::Y2Min => "y2_min",
            Self::Y2Max => "y2_max",
            Self::Z2Min => "z2_min",
            Self::Z2Max => "z2_max",
            Self::ZMinProbe => "z_probe",
        }
    }

    const fn primary(axis: Axis, max: bool) -> Self {
        match (axis, max) {
            (Axis::X, false) => Self::XMin,
            (Axis::X, true) => Self::XMax,
            (Axis::Y, false) => Self::YMin,
            (Axis::Y, true) => Self::YMax,
            (Axis::Z, false) => Self::ZMin,
            (Axis::Z, true) => Self::ZMax,
        }
    }

    const fn secondary(axis: Axis, max: bool) -> Self {
        match (axis, max) {
            (Axis::X, false) => Self::X2Min,
            (Axis::X, true) => Self::X2Max,
            (Axis::Y, false) => Self::Y2Min,
            (Axis::Y, true) => Self::Y2Max,
            (Axis::Z, false) => Self::Z2Min,
            (Axis::Z, true) => Self::Z2Max,
        }
    }
}

// ---------------------------------------------------------------------------
// TriggerState
// ---------------------------------------------------------------------------

/// Fixed-size bit-vector indexed by [`EndstopId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerState(u16);

impl TriggerState {
    pub const EMPTY: Self = Self(0);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, id: EndstopId) -> bool {
        self.0 & id.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn with(self, id: EndstopId, triggered: bool) -> Self {
        if triggered {
            Self(self.0 | id.bit())
        } else {
            Self(self.0 & !id.bit())
        }
    }

    pub fn iter(self) -> impl Iterator<Item = EndstopId> {
        EndstopId::ALL.into_iter().filter(move |id| self.contains(*id))
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for id in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(id.name())?;
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Raw input source
// ---------------------------------------------------------------------------

/// Something that can report raw trigger levels for every configured
/// endstop.  Levels are already normalised: set bit = triggered.
pub trait EndstopInputs {
    fn read_raw(&mut self) -> TriggerState;
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Debounced, sticky endstop state shared between the timer interrupt and
/// the foreground.
pub struct EndstopDetector {
    // Written by the timer interrupt only.
    live: AtomicU16,
    pending: AtomicU16,
    stable_count: AtomicU8,
    validated: AtomicU16,
    armed_prev: AtomicU16,
    tick: AtomicU32,

    // Sticky hits: set by the interrupt, cleared by the foreground.
    hits: AtomicU16,

    // Foreground switches.
    enabled: AtomicBool,
    probe_enabled: AtomicBool,

    // Fixed at construction.
    axis_mask: u16,
    probe: EndstopId,
    noise_threshold: u8,

    transitions: TransitionLog,
}

impl EndstopDetector {
    /// Build a detector from explicit masks.  `const` so it can back a
    /// `static`.
    pub const fn with_masks(axis_mask: u16, probe: EndstopId, noise_threshold: u8) -> Self {
        Self {
            live: AtomicU16::new(0),
            pending: AtomicU16::new(0),
            stable_count: AtomicU8::new(0),
            validated: AtomicU16::new(0),
            armed_prev: AtomicU16::new(0),
            tick: AtomicU32::new(0),
            hits: AtomicU16::new(0),
            enabled: AtomicBool::new(true),
            probe_enabled: AtomicBool::new(false),
            axis_mask,
            probe,
            noise_threshold,
            transitions: TransitionLog::new(),
        }
    }

    /// Derive the active masks from configuration: exactly one of min/max
    /// per axis (plus the dual endstop where fitted).
    pub fn new(settings: &EndstopSettings) -> Self {
        let mut axis_mask = 0;
        for axis in Axis::ALL {
            let max = settings.home_to_max[axis.index()];
            axis_mask |= EndstopId::primary(axis, max).bit();
            if settings.dual[axis.index()] {
                axis_mask |= EndstopId::secondary(axis, max).bit();
            }
        }
        let probe = if settings.probe_on_z_min {
            EndstopId::ZMin
        } else {
            EndstopId::ZMinProbe
        };
        Self::with_masks(axis_mask, probe, settings.noise_threshold)
    }

    // ── Interrupt side ────────────────────────────────────────

    /// Read raw levels into the live view.  Does not touch the validated view.
    pub fn sample(&self, inputs: &mut impl EndstopInputs) -> TriggerState {
        let raw = inputs.read_raw();
        self.live.store(raw.bits(), Ordering::Release);
        raw
    }

    /// Advance the noise filter by one period and latch new hits.
    pub fn update(&self) {
        let tick = self.tick.load(Ordering::Relaxed).wrapping_add(1);
        self.tick.store(tick, Ordering::Relaxed);

        let live = self.live.load(Ordering::Acquire);
        let old = self.validated.load(Ordering::Relaxed);

        let new = if self.noise_threshold == 0 {
            live
        } else if live == self.pending.load(Ordering::Relaxed) {
            let count = self.stable_count.load(Ordering::Relaxed);
            if count < self.noise_threshold {
                self.stable_count.store(count + 1, Ordering::Relaxed);
            }
            if count + 1 >= self.noise_threshold { live } else { old }
        } else {
            self.pending.store(live, Ordering::Relaxed);
            self.stable_count.store(1, Ordering::Relaxed);
            if self.noise_threshold <= 1 { live } else { old }
        };

        if new != old {
            self.validated.store(new, Ordering::Release);
            let changed = new ^ old;
            for id in TriggerState::from_bits(changed).iter() {
                self.transitions.push(id, new & id.bit() != 0, tick);
            }
        }

        let armed = new & self.armed_mask();
        let prev = self.armed_prev.swap(armed, Ordering::Relaxed);
        let rising = armed & !prev;
        if rising != 0 {
            self.hits.fetch_or(rising, Ordering::Release);
        }
    }

    /// `sample()` followed by `update()`: one timer-interrupt period.
    pub fn poll(&self, inputs: &mut impl EndstopInputs) {
        self.sample(inputs);
        self.update();
    }

    // ── Foreground side ───────────────────────────────────────

    /// Sticky "was triggered" set.  Stays set until explicitly cleared.
    pub fn trigger_state(&self) -> TriggerState {
        TriggerState::from_bits(self.hits.load(Ordering::Acquire))
    }

    /// Acknowledge every latched hit and return what was cleared.  A trigger
    /// that is still held is not re-reported until it releases and asserts
    /// again.  A hit latched concurrently is either returned here or stays
    /// latched for the next reader.
    pub fn hit_on_purpose(&self) -> TriggerState {
        TriggerState::from_bits(self.hits.swap(0, Ordering::AcqRel))
    }

    /// Atomically read and clear the hit set.
    pub fn take_hits(&self) -> TriggerState {
        self.hit_on_purpose()
    }

    /// Hits since the last report, cleared.  `None` when nothing fired.
    pub fn report_state(&self) -> Option<TriggerState> {
        let hits = self.take_hits();
        (!hits.is_empty()).then_some(hits)
    }

    /// Debounced levels.
    pub fn validated_state(&self) -> TriggerState {
        TriggerState::from_bits(self.validated.load(Ordering::Acquire))
    }

    /// Last raw sample.  Diagnostic only; may lead the validated view.
    pub fn live_state(&self) -> TriggerState {
        TriggerState::from_bits(self.live.load(Ordering::Acquire))
    }

    /// Arm or disarm the probe input.
    pub fn probe_enabled(&self, enable: bool) {
        self.probe_enabled.store(enable, Ordering::Release);
    }

    pub fn is_probe_enabled(&self) -> bool {
        self.probe_enabled.load(Ordering::Acquire)
    }

    /// Globally gate axis-endstop hit reporting.
    pub fn enable(&self, enable: bool) {
        self.enabled.store(enable, Ordering::Release);
    }

    /// Id the probe reports under (own input or aliased Z-min).
    pub fn probe_id(&self) -> EndstopId {
        self.probe
    }

    /// Debounced probe level.
    pub fn probe_triggered(&self) -> bool {
        self.validated.load(Ordering::Acquire) & self.probe.bit() != 0
    }

    pub fn probe_hit(&self) -> bool {
        self.hits.load(Ordering::Acquire) & self.probe.bit() != 0
    }

    pub fn transitions(&self) -> &TransitionLog {
        &self.transitions
    }

    /// Endstops that currently participate in hit reporting.
    pub fn armed_mask(&self) -> u16 {
        let mut mask = 0;
        if self.enabled.load(Ordering::Acquire) {
            mask |= self.axis_mask;
        }
        if self.probe_enabled.load(Ordering::Acquire) {
            mask |= self.probe.bit();
        }
        mask
    }
}
