//! Self-test state handlers and table builder.
//!
//! ```text
//!  START ──▶ DEPLOY ──[settled]──▶ STOW ──[settled, cycles left]──▶ DEPLOY
//!                                    │
//!                             [4 cycles done]
//!                                    ▼
//!                              AWAIT_TRIGGER ──[30 s]──▶ FAILED
//!                                    │
//!                               [triggered]
//!                                    ▼
//!                               IN_PULSE ──[release / held 30 ms]──▶ CLASSIFIED
//! ```

use log::{info, warn};

use super::context::{
    ActuatorCommand, CYCLES, PULSE_MAX_MS, ProbeKind, SETTLE_MS, SelfTestContext,
    TRIGGER_TIMEOUT_MS,
};
use super::{StateDescriptor, StateId};

pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        StateDescriptor {
            id: StateId::Start,
            name: "Start",
            on_enter: Some(start_enter),
            on_update: start_update,
        },
        StateDescriptor {
            id: StateId::DeployCycle,
            name: "DeployCycle",
            on_enter: Some(deploy_enter),
            on_update: deploy_update,
        },
        StateDescriptor {
            id: StateId::StowCycle,
            name: "StowCycle",
            on_enter: Some(stow_enter),
            on_update: stow_update,
        },
        StateDescriptor {
            id: StateId::AwaitTrigger,
            name: "AwaitTrigger",
            on_enter: Some(await_enter),
            on_update: await_update,
        },
        StateDescriptor {
            id: StateId::InPulse,
            name: "InPulse",
            on_enter: Some(pulse_enter),
            on_update: pulse_update,
        },
        StateDescriptor {
            id: StateId::Classified,
            name: "Classified",
            on_enter: Some(classified_enter),
            on_update: terminal_update,
        },
        StateDescriptor {
            id: StateId::Failed,
            name: "Failed",
            on_enter: Some(failed_enter),
            on_update: terminal_update,
        },
    ]
}

// ── START ─────────────────────────────────────────────────────

fn start_enter(ctx: &mut SelfTestContext) {
    ctx.cycle = 0;
    ctx.kind = None;
    ctx.prompt = Some("Servo probe test");
}

fn start_update(_ctx: &mut SelfTestContext) -> Option<StateId> {
    Some(StateId::DeployCycle)
}

// ── DEPLOY / STOW cycles ──────────────────────────────────────

fn deploy_enter(ctx: &mut SelfTestContext) {
    ctx.command = Some(ActuatorCommand::Deploy);
}

fn deploy_update(ctx: &mut SelfTestContext) -> Option<StateId> {
    if ctx.ms_in_state() < SETTLE_MS {
        return None;
    }
    ctx.deployed_levels[ctx.cycle as usize] = ctx.probe_level;
    Some(StateId::StowCycle)
}

fn stow_enter(ctx: &mut SelfTestContext) {
    ctx.command = Some(ActuatorCommand::Stow);
}

fn stow_update(ctx: &mut SelfTestContext) -> Option<StateId> {
    if ctx.ms_in_state() < SETTLE_MS {
        return None;
    }
    ctx.stowed_levels[ctx.cycle as usize] = ctx.probe_level;
    ctx.cycle += 1;
    if ctx.cycle < CYCLES {
        Some(StateId::DeployCycle)
    } else {
        info!(
            "M43: deployed={} stowed={}",
            ctx.deployed_levels[0], ctx.stowed_levels[0]
        );
        Some(StateId::AwaitTrigger)
    }
}

// ── AWAIT_TRIGGER ─────────────────────────────────────────────

fn await_enter(ctx: &mut SelfTestContext) {
    ctx.command = Some(ActuatorCommand::Deploy);
    ctx.prompt = Some("Please trigger probe");
}

fn await_update(ctx: &mut SelfTestContext) -> Option<StateId> {
    let elapsed = ctx.ms_in_state();
    if elapsed >= TRIGGER_TIMEOUT_MS {
        return Some(StateId::Failed);
    }
    if elapsed >= SETTLE_MS && ctx.probe_level {
        ctx.pulse_start_ms = ctx.now_ms;
        return Some(StateId::InPulse);
    }
    None
}

// ── IN_PULSE ──────────────────────────────────────────────────

fn pulse_enter(_ctx: &mut SelfTestContext) {}

fn pulse_update(ctx: &mut SelfTestContext) -> Option<StateId> {
    let width = ctx.now_ms - ctx.pulse_start_ms;
    if !ctx.probe_level {
        ctx.kind = Some(if width < PULSE_MAX_MS {
            ProbeKind::PulseProbe { width_ms: width as u32 }
        } else {
            ProbeKind::MechanicalSwitch
        });
        return Some(StateId::Classified);
    }
    if width >= PULSE_MAX_MS {
        ctx.kind = Some(ProbeKind::MechanicalSwitch);
        return Some(StateId::Classified);
    }
    None
}

// ── Terminal states ───────────────────────────────────────────

fn classified_enter(ctx: &mut SelfTestContext) {
    ctx.command = Some(ActuatorCommand::Stow);
    ctx.prompt = Some(match ctx.kind {
        Some(ProbeKind::PulseProbe { .. }) => "= BLTouch compatible probe detected =",
        _ => "= Mechanical switch probe detected =",
    });
}

fn failed_enter(ctx: &mut SelfTestContext) {
    warn!("M43: no trigger within {} ms", TRIGGER_TIMEOUT_MS);
    ctx.command = Some(ActuatorCommand::Stow);
    ctx.prompt = Some("FAIL: Noise or probe not triggering");
}

fn terminal_update(_ctx: &mut SelfTestContext) -> Option<StateId> {
    None
}
