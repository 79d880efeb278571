//! Command mapper: driver signals to platform motion.
//!
//! # Pedal policy
//!
//! Evaluated in order:
//!
//! 1. Panel disabled → [`PlatformCommand::NEUTRAL`], whatever the driver does.
//! 2. `rpm = 680 + 6320 * throttle / 100` (idle buzz plus throttle).
//! 3. `acc_y` is `0` with both pedals released, `1.75 * throttle / 100` when
//!    throttle exceeds brake, otherwise `-1.75 * brake / 100`.  Equal,
//!    non-zero pedals therefore lean into braking.
//! 4. `acc_x = -1.5 * steering / 100` (steering right leans left).
//! 5. `acc_z = 0`.
//!
//! Inputs are not clamped; in-domain inputs land in-range by construction.

use serde::{Deserialize, Serialize};
use tiltbridge_types::{DriverInput, PanelConfig, PlatformCommand};

/// Idle vibration with no throttle.
pub const IDLE_RPM: f64 = 680.0;
/// Vibration added at full throttle.
pub const THROTTLE_RPM_SPAN: f64 = 6320.0;
/// Full fore/aft lean.
pub const MAX_FORE_AFT: f64 = 1.75;
/// Full sideways lean.
pub const MAX_LATERAL: f64 = 1.5;

/// Vibration for `throttle` percent, or `0` when forced off.
pub fn vibration_rpm(throttle: f64, force_none: bool) -> f64 {
    if force_none {
        return 0.0;
    }
    IDLE_RPM + THROTTLE_RPM_SPAN * throttle / 100.0
}

/// Fore/aft lean from the pedals.
pub fn fore_aft_lean(throttle: f64, brake: f64) -> f64 {
    if throttle == 0.0 && brake == 0.0 {
        0.0
    } else if throttle > brake {
        MAX_FORE_AFT * throttle / 100.0
    } else {
        -MAX_FORE_AFT * brake / 100.0
    }
}

/// Sideways lean from steering, sign inverted.
pub fn lateral_lean(steering: f64) -> f64 {
    -MAX_LATERAL * steering / 100.0
}

/// Apply the pedal policy to the combined channel state.
pub fn compute(input: &DriverInput, panel: &PanelConfig) -> PlatformCommand {
    if !panel.platform_status {
        return PlatformCommand::NEUTRAL;
    }
    PlatformCommand {
        acc_x: lateral_lean(input.steering),
        acc_y: fore_aft_lean(input.throttle, input.brake),
        acc_z: 0.0,
        rpm: vibration_rpm(input.throttle, false),
    }
}

/// How driver records become platform commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    /// Throttle, brake and steering through the pedal policy.
    #[default]
    Pedals,
    /// `tilt_x`, `tilt_y` and `vibration` forwarded as-is, for simulations
    /// that compute platform motion themselves.
    Direct,
}

impl std::fmt::Display for MappingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MappingMode::Pedals => write!(f, "pedals"),
            MappingMode::Direct => write!(f, "direct"),
        }
    }
}

/// Stateless mapper selected by [`MappingMode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandMapper {
    mode: MappingMode,
}

impl CommandMapper {
    pub fn new(mode: MappingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    pub fn map(&self, input: &DriverInput, panel: &PanelConfig) -> PlatformCommand {
        match self.mode {
            MappingMode::Pedals => compute(input, panel),
            MappingMode::Direct if !panel.platform_status => PlatformCommand::NEUTRAL,
            MappingMode::Direct => PlatformCommand {
                acc_x: input.tilt_x,
                acc_y: input.tilt_y,
                acc_z: 0.0,
                rpm: input.vibration,
            },
        }
    }
}
