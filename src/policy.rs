// src/policy.rs
//
// =============================================================================
// PREPFLOW: RUN-MODE POLICY (v 0.1 )
// =============================================================================
//
// Cross-cutting switches consulted by the shared helpers.
// The policy changes how long things take and how tips are handled. It never
// changes which operations run or in what order.

use crate::config::RunConfig;
use crate::core::TipRelease;
use crate::drivers::MixSpec;
use std::time::Duration;

/// Shake durations are divided by this in simulation.
pub const SIMULATION_TIME_COMPRESSION: u32 = 50;

/// Shortest shake a simulated run still performs.
pub const MIN_SIMULATED_SHAKE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPolicy {
    pub simulate: bool,
    /// No human at the deck: pauses that can be skipped are skipped.
    pub unattended: bool,
    pub use_gripper: bool,
    pub tip_release: TipRelease,
    pub reuse_fixed_tips: bool,
    pub repeat_cycles: u32,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            simulate: false,
            unattended: false,
            use_gripper: true,
            tip_release: TipRelease::Trash,
            reuse_fixed_tips: false,
            repeat_cycles: 1,
        }
    }
}

impl RunPolicy {
    pub fn from_config(cfg: &RunConfig) -> Self {
        Self {
            simulate: cfg.simulate,
            unattended: cfg.is_unattended(),
            use_gripper: cfg.use_automated_gripper,
            tip_release: if cfg.dispose_tips_after_use {
                TipRelease::Trash
            } else {
                TipRelease::ReturnToRack
            },
            reuse_fixed_tips: cfg.reuse_fixed_tips,
            repeat_cycles: cfg.repeat_cycles,
        }
    }

    /// Magnet and bench settling: skipped entirely in simulation.
    pub fn settle(&self, nominal: Duration) -> Option<Duration> {
        if self.simulate {
            None
        } else {
            Some(nominal)
        }
    }

    /// Shakes are compressed in simulation but always happen.
    pub fn shake_duration(&self, nominal: Duration) -> Duration {
        if !self.simulate {
            return nominal;
        }
        (nominal / SIMULATION_TIME_COMPRESSION).max(MIN_SIMULATED_SHAKE)
    }

    /// Collapses a shortenable mix to a single cycle in simulation.
    pub fn mix(&self, spec: MixSpec, shortenable: bool) -> MixSpec {
        if self.simulate && shortenable {
            MixSpec {
                repetitions: spec.repetitions.min(1),
                ..spec
            }
        } else {
            spec
        }
    }

    /// Setpoint holds and profiles are only sent to real hardware.
    pub fn drives_temperature(&self) -> bool {
        !self.simulate
    }

    /// Rack exhaustion pauses for the operator only when someone is there.
    pub fn pauses_for_tip_reset(&self) -> bool {
        !self.unattended
    }
}
