//! Blackboard shared by every self-test state handler.

/// Deploy/stow cycles before the operator is asked to trigger the probe.
pub const CYCLES: u8 = 4;
/// Time allowed for the mechanism to settle in each position.
pub const SETTLE_MS: u64 = 500;
/// Triggers shorter than this are pulses (BLTouch-style).
pub const PULSE_MAX_MS: u64 = 30;
/// How long the operator has to trigger the probe.
pub const TRIGGER_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorCommand {
    Deploy,
    Stow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    MechanicalSwitch,
    PulseProbe { width_ms: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfTestReport {
    pub kind: ProbeKind,
    /// The probe pin reads triggered when stowed and clear when deployed.
    pub triggered_when_stowed: bool,
    /// Every deploy/stow cycle read the same pair of levels.
    pub consistent: bool,
}

pub struct SelfTestContext {
    // -- Inputs (refreshed before each tick) --
    pub now_ms: u64,
    pub probe_level: bool,

    // -- Outputs (applied after each tick) --
    pub command: Option<ActuatorCommand>,
    pub prompt: Option<&'static str>,

    // -- Bookkeeping --
    pub state_entered_ms: u64,
    pub cycle: u8,
    pub deployed_levels: [bool; CYCLES as usize],
    pub stowed_levels: [bool; CYCLES as usize],
    pub pulse_start_ms: u64,
    pub kind: Option<ProbeKind>,
}

impl SelfTestContext {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms,
            probe_level: false,
            command: None,
            prompt: None,
            state_entered_ms: now_ms,
            cycle: 0,
            deployed_levels: [false; CYCLES as usize],
            stowed_levels: [false; CYCLES as usize],
            pulse_start_ms: 0,
            kind: None,
        }
    }

    pub fn ms_in_state(&self) -> u64 {
        self.now_ms.saturating_sub(self.state_entered_ms)
    }

    pub fn report(&self) -> Option<SelfTestReport> {
        let kind = self.kind?;
        let consistent = self.deployed_levels.iter().all(|&l| l == self.deployed_levels[0])
            && self.stowed_levels.iter().all(|&l| l == self.stowed_levels[0]);
        let triggered_when_stowed =
            self.stowed_levels.iter().all(|&l| l) && self.deployed_levels.iter().all(|&l| !l);
        Some(SelfTestReport { kind, triggered_when_stowed, consistent })
    }
}
