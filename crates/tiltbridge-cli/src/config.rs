//! Bridge configuration – reads/writes `~/.tiltbridge/config.toml`.
//!
//! ```toml
//! [driver_input]
//! address = "ipc:///tmp/RAAI/driver_input_reader.ipc"
//! topic = "driver_input"
//!
//! [control_panel]
//! address = "ipc:///tmp/RAAI/control_panel.ipc"
//! topic = "platform"
//!
//! [platform]
//! host = "127.0.0.1"
//! port = 40000
//!
//! [dispatch]
//! mapping = "pedals"
//! separator = " "
//! idle_policy = "hold"
//! stale_after_ms = 1000
//! # idle_timeout_ms = 100
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tiltbridge_hal::MappingMode;
use tiltbridge_runtime::{DispatchSettings, IdlePolicy};
use tiltbridge_types::ChannelId;

/// Where one subscription channel connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// `ipc://<path>` or `tcp://<host>:<port>`.
    pub address: String,
    /// Topic prefix subscribed to.
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_host")]
    pub host: String,
    #[serde(default = "default_platform_port")]
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mapping: MappingMode,

    /// Character between the topic and the JSON payload.
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Absent or `0`: wait for input forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,

    #[serde(default)]
    pub idle_policy: IdlePolicy,

    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Persisted configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_driver_input")]
    pub driver_input: ChannelConfig,

    #[serde(default = "default_control_panel")]
    pub control_panel: ChannelConfig,

    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,
}

fn default_driver_input() -> ChannelConfig {
    ChannelConfig {
        address: "ipc:///tmp/RAAI/driver_input_reader.ipc".to_string(),
        topic: "driver_input".to_string(),
    }
}
fn default_control_panel() -> ChannelConfig {
    ChannelConfig {
        address: "ipc:///tmp/RAAI/control_panel.ipc".to_string(),
        topic: "platform".to_string(),
    }
}
fn default_platform_host() -> String {
    tiltbridge_hal::platform::DEFAULT_HOST.to_string()
}
fn default_platform_port() -> u16 {
    tiltbridge_hal::platform::DEFAULT_PORT
}
fn default_separator() -> char {
    tiltbridge_middleware::decoder::DEFAULT_SEPARATOR
}
fn default_stale_after_ms() -> u64 {
    1000
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host: default_platform_host(),
            port: default_platform_port(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mapping: MappingMode::default(),
            separator: default_separator(),
            idle_timeout_ms: None,
            idle_policy: IdlePolicy::default(),
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver_input: default_driver_input(),
            control_panel: default_control_panel(),
            platform: PlatformConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Config {
    pub fn channel(&self, channel: ChannelId) -> &ChannelConfig {
        match channel {
            ChannelId::DriverInput => &self.driver_input,
            ChannelId::ControlPanel => &self.control_panel,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            idle_timeout: self
                .dispatch
                .idle_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            idle_policy: self.dispatch.idle_policy,
            stale_after: Duration::from_millis(self.dispatch.stale_after_ms),
        }
    }
}

/// `$TILTBRIDGE_CONFIG`, or `~/.tiltbridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Ok(explicit) = std::env::var("TILTBRIDGE_CONFIG")
        && !explicit.is_empty()
    {
        return PathBuf::from(explicit);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tiltbridge").join("config.toml")
}

/// Load the config at `path`, writing the defaults there first if the file
/// does not exist yet.  Environment overrides are applied either way.
pub fn load_or_init(path: &Path) -> Result<Config, String> {
    let mut cfg = match load_from(path)? {
        Some(cfg) => cfg,
        None => {
            let cfg = Config::default();
            save_to(&cfg, path)?;
            cfg
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  `None` if the file does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `TILTBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TILTBRIDGE_PLATFORM_HOST` | `platform.host` |
/// | `TILTBRIDGE_PLATFORM_PORT` | `platform.port` |
/// | `TILTBRIDGE_IDLE_TIMEOUT_MS` | `dispatch.idle_timeout_ms` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TILTBRIDGE_PLATFORM_HOST")
        && !v.trim().is_empty()
    {
        cfg.platform.host = v.trim().to_string();
    }
    if let Ok(v) = std::env::var("TILTBRIDGE_PLATFORM_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.platform.port = port;
    }
    if let Ok(v) = std::env::var("TILTBRIDGE_IDLE_TIMEOUT_MS")
        && let Ok(ms) = v.trim().parse::<u64>()
    {
        cfg.dispatch.idle_timeout_ms = Some(ms);
    }
}

/// Save the config to a specific path, creating the parent directory.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
