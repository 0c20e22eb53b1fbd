//! Probe-type detection (M43 S) as a function-pointer state machine.
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │  StateTable                                       │
//! │  ┌──────────────┬───────────┬───────────────────┐ │
//! │  │ StateId      │ on_enter  │ on_update         │ │
//! │  ├──────────────┼───────────┼───────────────────┤ │
//! │  │ Start        │ fn(ctx)   │ fn(ctx)->Option<> │ │
//! │  │ DeployCycle  │ fn(ctx)   │ fn(ctx)->Option<> │ │
//! │  │ StowCycle    │ fn(ctx)   │ fn(ctx)->Option<> │ │
//! │  │ AwaitTrigger │ fn(ctx)   │ fn(ctx)->Option<> │ │
//! │  │ InPulse      │ fn(ctx)   │ fn(ctx)->Option<> │ │
//! │  │ Classified   │ fn(ctx)   │ terminal          │ │
//! │  │ Failed       │ fn(ctx)   │ terminal          │ │
//! │  └──────────────┴───────────┴───────────────────┘ │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Handlers never touch hardware.  They read the probe level and clock
//! from [`SelfTestContext`] and leave actuator commands and operator
//! prompts in it; [`run_self_test`] applies those between ticks.

pub mod context;
pub mod states;

use log::info;

use crate::app::events::StatusEvent;
use crate::app::ports::{EventSink, ProbeHost};
use crate::endstops::EndstopDetector;
use crate::error::ProbeError;

use super::actuator::ProbeActuator;
use context::{ActuatorCommand, SelfTestContext};

pub use context::{ProbeKind, SelfTestReport};

/// Period between FSM ticks when driven by [`run_self_test`].
pub const TICK_MS: u32 = 1;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    Start = 0,
    DeployCycle = 1,
    StowCycle = 2,
    AwaitTrigger = 3,
    InPulse = 4,
    Classified = 5,
    Failed = 6,
}

impl StateId {
    pub const COUNT: usize = 7;

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Classified | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

pub type StateActionFn = fn(&mut SelfTestContext);

pub type StateUpdateFn = fn(&mut SelfTestContext) -> Option<StateId>;

pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SelfTestFsm {
    table: [StateDescriptor; StateId::COUNT],
    current: usize,
}

impl SelfTestFsm {
    pub fn new() -> Self {
        let table = states::build_state_table();
        debug_assert!(table.iter().enumerate().all(|(i, d)| d.id as usize == i));
        Self { table, current: StateId::Start as usize }
    }

    pub fn start(&mut self, ctx: &mut SelfTestContext) {
        ctx.state_entered_ms = ctx.now_ms;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    pub fn tick(&mut self, ctx: &mut SelfTestContext) {
        if let Some(next) = (self.table[self.current].on_update)(ctx) {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        self.table[self.current].id
    }

    fn transition(&mut self, next: StateId, ctx: &mut SelfTestContext) {
        info!(
            "M43: {} -> {}",
            self.table[self.current].name,
            self.table[next as usize].name
        );
        self.current = next as usize;
        ctx.state_entered_ms = ctx.now_ms;
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}

impl Default for SelfTestFsm {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Drive the self-test to completion against real hardware.
pub fn run_self_test<H: ProbeHost, A: ProbeActuator>(
    host: &mut H,
    actuator: &mut A,
    detector: &EndstopDetector,
    sink: &mut impl EventSink,
) -> Result<SelfTestReport, ProbeError> {
    let mut fsm = SelfTestFsm::new();
    let mut ctx = SelfTestContext::new(host.now_ms());
    ctx.probe_level = detector.probe_triggered();
    fsm.start(&mut ctx);

    loop {
        if let Some(cmd) = ctx.command.take() {
            match cmd {
                ActuatorCommand::Deploy => actuator.deploy(host)?,
                ActuatorCommand::Stow => actuator.stow(host)?,
            }
        }
        if let Some(prompt) = ctx.prompt.take() {
            sink.emit(&StatusEvent::Prompt(prompt));
        }
        if fsm.current_state().is_terminal() {
            break;
        }

        host.delay_ms(TICK_MS);
        ctx.now_ms = host.now_ms();
        ctx.probe_level = detector.probe_triggered();
        fsm.tick(&mut ctx);
    }

    match (fsm.current_state(), ctx.report()) {
        (StateId::Classified, Some(report)) => {
            sink.emit(&StatusEvent::ProbeClassified(report));
            Ok(report)
        }
        _ => Err(ProbeError::NoTrigger),
    }
}
