//! Shared data model for the tiltbridge stack.
//!
//! Every crate in the workspace speaks in these types: the two subscription
//! records decoded from the simulation, the command sent to the motion
//! platform, and the [`BridgeError`] taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One logical subscription source feeding one slot of combined state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelId {
    /// Normalised pedal and steering signals from the driver-input reader.
    DriverInput,
    /// Operator switches from the control panel.
    ControlPanel,
}

impl ChannelId {
    /// All channels, in a stable order.
    pub const ALL: [ChannelId; 2] = [ChannelId::DriverInput, ChannelId::ControlPanel];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::DriverInput => "driver_input",
            ChannelId::ControlPanel => "control_panel",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Driver signals, each a percentage.
///
/// `throttle`, `brake`, `clutch` and `vibration` are conventionally in
/// `[0, 100]`; `steering`, `tilt_x` and `tilt_y` in `[-100, 100]`.
/// All keys are required on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverInput {
    pub throttle: f64,
    pub brake: f64,
    pub clutch: f64,
    pub steering: f64,
    pub tilt_x: f64,
    pub tilt_y: f64,
    pub vibration: f64,
}

/// Control-panel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// `false` forces the platform to neutral regardless of driver input.
    pub platform_status: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            platform_status: true,
        }
    }
}

/// Command in platform-native units.
///
/// | Field | Range | Meaning |
/// |---|---|---|
/// | `acc_x` | `[-1.5, 1.5]` | sideways lean, positive is right |
/// | `acc_y` | `[-1.75, 1.75]` | fore/aft lean, positive is back |
/// | `acc_z` | `[-1.5, 1.5]` | vertical, always `0` |
/// | `rpm` | `[0, 7000]` | vibration intensity |
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlatformCommand {
    pub acc_x: f64,
    pub acc_y: f64,
    pub acc_z: f64,
    pub rpm: f64,
}

impl PlatformCommand {
    /// Level platform, no vibration.
    pub const NEUTRAL: PlatformCommand = PlatformCommand {
        acc_x: 0.0,
        acc_y: 0.0,
        acc_z: 0.0,
        rpm: 0.0,
    };
}

/// A decoded record, tagged with the channel it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Record {
    DriverInput(DriverInput),
    Panel(PanelConfig),
}

impl Record {
    /// The channel whose slot this record occupies.
    pub fn channel(&self) -> ChannelId {
        match self {
            Record::DriverInput(_) => ChannelId::DriverInput,
            Record::Panel(_) => ChannelId::ControlPanel,
        }
    }
}

impl From<DriverInput> for Record {
    fn from(value: DriverInput) -> Self {
        Record::DriverInput(value)
    }
}

impl From<PanelConfig> for Record {
    fn from(value: PanelConfig) -> Self {
        Record::Panel(value)
    }
}

/// A record type that can arrive on a subscription channel.
pub trait ChannelRecord: Serialize + for<'de> Deserialize<'de> + Into<Record> {
    /// Channel this record type is carried on.
    const CHANNEL: ChannelId;

    /// Keys that must be present in the JSON payload.
    const REQUIRED_FIELDS: &'static [&'static str];
}

impl ChannelRecord for DriverInput {
    const CHANNEL: ChannelId = ChannelId::DriverInput;
    const REQUIRED_FIELDS: &'static [&'static str] = &[
        "throttle",
        "brake",
        "clutch",
        "steering",
        "tilt_x",
        "tilt_y",
        "vibration",
    ];
}

impl ChannelRecord for PanelConfig {
    const CHANNEL: ChannelId = ChannelId::ControlPanel;
    const REQUIRED_FIELDS: &'static [&'static str] = &["platform_status"];
}

/// Error type spanning decoding, transport and startup failures.
///
/// Decode and send errors are recovered locally by the dispatch loop;
/// [`BridgeError::Subscription`] and [`BridgeError::ChannelsClosed`] end it.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Missing field `{field}` in {channel} payload")]
    MissingField {
        channel: ChannelId,
        field: &'static str,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Subscription to {address} failed: {details}")]
    Subscription { address: String, details: String },

    #[error("All subscription channels are closed")]
    ChannelsClosed,
}

impl BridgeError {
    /// `true` for errors the dispatch loop recovers from on the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::MalformedFrame(_)
                | BridgeError::MissingField { .. }
                | BridgeError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_records_match_documented_defaults() {
        let input = DriverInput::default();
        assert_eq!(input.throttle, 0.0);
        assert_eq!(input.steering, 0.0);
        assert!(PanelConfig::default().platform_status);
    }

    #[test]
    fn record_reports_its_channel() {
        assert_eq!(
            Record::from(DriverInput::default()).channel(),
            ChannelId::DriverInput
        );
        assert_eq!(
            Record::from(PanelConfig::default()).channel(),
            ChannelId::ControlPanel
        );
    }

    #[test]
    fn required_fields_cover_every_struct_field() {
        let json = serde_json::to_value(DriverInput::default()).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), DriverInput::REQUIRED_FIELDS.len());
        for field in DriverInput::REQUIRED_FIELDS {
            assert!(obj.contains_key(*field), "{field} missing from struct");
        }
    }

    #[test]
    fn driver_input_rejects_missing_key() {
        let json = r#"{"throttle": 1.0, "brake": 0.0}"#;
        assert!(serde_json::from_str::<DriverInput>(json).is_err());
    }

    #[test]
    fn channel_display_uses_snake_case() {
        assert_eq!(ChannelId::DriverInput.to_string(), "driver_input");
        assert_eq!(ChannelId::ControlPanel.to_string(), "control_panel");
    }

    #[test]
    fn bridge_error_display_and_recoverability() {
        let err = BridgeError::MissingField {
            channel: ChannelId::DriverInput,
            field: "brake",
        };
        assert!(err.to_string().contains("brake"));
        assert!(err.is_recoverable());

        let fatal = BridgeError::Subscription {
            address: "ipc:///tmp/x.ipc".to_string(),
            details: "connection refused".to_string(),
        };
        assert!(fatal.to_string().contains("ipc:///tmp/x.ipc"));
        assert!(!fatal.is_recoverable());
        assert!(!BridgeError::ChannelsClosed.is_recoverable());
    }
}
