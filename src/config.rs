// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Control loop settings and the hardware backend, stored as TOML.
//! Default path: `/etc/fancurve/config.toml`

use crate::hwmon::HWMON_ROOT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fancurve/config.toml";

/// Default curve file, relative to the working directory.
pub const DEFAULT_CURVE_PATH: &str = "config.csv";

/// Default control loop period in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default limit on a single sensor or fan command, in milliseconds.
pub const DEFAULT_HARDWARE_TIMEOUT_MS: u64 = 800;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,
}

/// Control loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Tick period, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Give up on a sensor read or fan command after this many
    /// milliseconds. Keep it below the tick period.
    #[serde(default = "default_hardware_timeout")]
    pub hardware_timeout_ms: u64,

    /// Only push a new speed when it differs from the last one by more
    /// than this many percent.
    #[serde(default)]
    pub speed_deadband: u8,

    /// Take manual control of the fan when the loop starts.
    #[serde(default = "default_true")]
    pub manual_on_start: bool,

    /// Hand the fan back to automatic control when the loop stops.
    #[serde(default = "default_true")]
    pub restore_on_exit: bool,

    /// CSV file holding the curve.
    #[serde(default = "default_curve_path")]
    pub curve_path: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            hardware_timeout_ms: DEFAULT_HARDWARE_TIMEOUT_MS,
            speed_deadband: 0,
            manual_on_start: true,
            restore_on_exit: true,
            curve_path: DEFAULT_CURVE_PATH.to_string(),
        }
    }
}

/// Which device the loop reads and drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend")]
pub enum HardwareConfig {
    /// NVIDIA GPU via `nvidia-smi` / `nvidia-settings`.
    #[serde(rename = "nvidia")]
    Nvidia {
        #[serde(default)]
        gpu: u32,
        #[serde(default)]
        fan: u32,
        /// Override the `nvidia-smi` executable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        smi_path: Option<String>,
        /// Override the `nvidia-settings` executable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        settings_path: Option<String>,
    },

    /// A hwmon PWM output driven from a hwmon temperature input.
    #[serde(rename = "hwmon")]
    Hwmon {
        #[serde(default = "default_hwmon_root")]
        root: String,
        /// PWM id, e.g. "hwmon3/pwm1"
        pwm: String,
        /// Temperature sensor id, e.g. "hwmon3/temp1"
        temp_sensor: String,
    },
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self::Nvidia {
            gpu: 0,
            fan: 0,
            smi_path: None,
            settings_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Load / Save
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> io::Result<Config> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)?;
    let config = parse_config(&contents)?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Parse config from TOML text.
pub fn parse_config(contents: &str) -> io::Result<Config> {
    toml::from_str(contents).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to parse config: {e}"),
        )
    })
}

/// Save config to a TOML file, creating parent directories if needed.
pub fn save_config(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to serialize config: {e}"),
        )
    })?;

    fs::write(path, contents)?;
    log::info!("Saved config to {}", path.display());
    Ok(())
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_hardware_timeout() -> u64 {
    DEFAULT_HARDWARE_TIMEOUT_MS
}

fn default_curve_path() -> String {
    DEFAULT_CURVE_PATH.to_string()
}

fn default_hwmon_root() -> String {
    HWMON_ROOT.to_string()
}

fn default_true() -> bool {
    true
}
