//! Scoped quiet-probing window.
//!
//! Opening a [`ProbeWindow`] mutes heaters and fans and switches the
//! configured axes into stall-detection mode with boosted current.  The
//! window dereferences to the machine, so the sample is taken *through* it,
//! and `Drop` restores every recorded setting on every exit path: success,
//! `?` early return, operator kill.

use core::ops::{Deref, DerefMut};

use heapless::Vec;
use log::debug;

use crate::app::ports::ProbeHost;
use crate::config::ProbeSettings;
use crate::endstops::Axis;

#[derive(Debug, Clone, Copy)]
struct AxisSnapshot {
    axis: Axis,
    stealth: bool,
    stall: bool,
    current_ma: Option<u16>,
}

/// RAII guard over a [`ProbeHost`] for the duration of one sample.
pub struct ProbeWindow<'a, H: ProbeHost> {
    host: &'a mut H,
    heaters: Option<bool>,
    fans: Option<bool>,
    axes: Vec<AxisSnapshot, 3>,
}

impl<'a, H: ProbeHost> ProbeWindow<'a, H> {
    /// Apply the quiet settings.  `tune_axes[i]` false leaves that axis'
    /// driver untouched even if it is listed in `stall_axes`.
    pub fn open(host: &'a mut H, settings: &ProbeSettings, tune_axes: [bool; 3]) -> Self {
        let heaters = settings.pause_heaters.then(|| host.set_heaters_paused(true));
        let fans = settings.pause_fans.then(|| host.set_fans_paused(true));

        let mut axes = Vec::new();
        for &axis in &settings.stall_axes {
            if !tune_axes[axis.index()] {
                continue;
            }
            let stealth = host.set_stealth(axis, false);
            let stall = host.set_stall_detection(axis, true);
            let current_ma = (settings.stall_current_ma > 0)
                .then(|| host.set_current_ma(axis, settings.stall_current_ma));
            // Capacity equals the number of axes.
            let _ = axes.push(AxisSnapshot { axis, stealth, stall, current_ma });
        }

        if heaters.is_some() || fans.is_some() || !axes.is_empty() {
            debug!("PROBE: quiet window open");
            if settings.settle_delay_ms > 0 {
                host.delay_ms(settings.settle_delay_ms);
            }
        }

        Self { host, heaters, fans, axes }
    }
}

impl<H: ProbeHost> Deref for ProbeWindow<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.host
    }
}

impl<H: ProbeHost> DerefMut for ProbeWindow<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.host
    }
}

impl<H: ProbeHost> Drop for ProbeWindow<'_, H> {
    fn drop(&mut self) {
        for snap in self.axes.iter().rev() {
            if let Some(ma) = snap.current_ma {
                self.host.set_current_ma(snap.axis, ma);
            }
            self.host.set_stall_detection(snap.axis, snap.stall);
            self.host.set_stealth(snap.axis, snap.stealth);
        }
        if let Some(prev) = self.fans {
            self.host.set_fans_paused(prev);
        }
        if let Some(prev) = self.heaters {
            self.host.set_heaters_paused(prev);
        }
        debug!("PROBE: quiet window closed");
    }
}
