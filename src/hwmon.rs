// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! hwmon sysfs discovery and control.
//!
//! Scans `/sys/class/hwmon/` for PWM outputs and temperature inputs, and
//! drives one PWM channel from one temperature input.

use crate::curve;
use crate::hardware::{FanActuator, HardwareError, TemperatureSensor};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const HWMON_ROOT: &str = "/sys/class/hwmon";

/// Full-scale PWM duty value.
const PWM_MAX: u16 = 255;

/// `pwmN_enable` values.
const PWM_ENABLE_MANUAL: u8 = 1;
const PWM_ENABLE_AUTO: u8 = 2;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A discovered PWM fan output.
#[derive(Debug, Clone)]
pub struct Fan {
    /// Unique identifier, e.g. "hwmon3/pwm1"
    pub id: String,
    /// Human-readable label if available
    pub label: Option<String>,
    pub pwm_path: PathBuf,
    pub pwm_enable_path: PathBuf,
    /// Name of the parent hwmon device
    pub hwmon_name: String,
}

/// A discovered temperature input.
#[derive(Debug, Clone)]
pub struct TempSensor {
    /// Unique identifier, e.g. "hwmon3/temp1"
    pub id: String,
    pub label: Option<String>,
    /// Absolute path to the `tempN_input` file (millidegrees C)
    pub input_path: PathBuf,
    pub hwmon_name: String,
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Return all PWM outputs under `root`, sorted by id.
pub fn discover_fans(root: &Path) -> io::Result<Vec<Fan>> {
    let mut fans = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        for n in 1..=16 {
            let pwm_path = hwmon_dir.join(format!("pwm{n}"));
            if !pwm_path.exists() {
                break;
            }

            fans.push(Fan {
                id: format!("{hwmon_basename}/pwm{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("fan{n}_label"))),
                pwm_enable_path: hwmon_dir.join(format!("pwm{n}_enable")),
                pwm_path,
                hwmon_name: hwmon_name.clone(),
            });
        }
    }

    fans.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(fans)
}

/// Return all temperature inputs under `root`, sorted by id.
pub fn discover_temp_sensors(root: &Path) -> io::Result<Vec<TempSensor>> {
    let mut sensors = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let hwmon_dir = entry.path();
        let hwmon_name = read_trimmed(&hwmon_dir.join("name")).unwrap_or_default();
        let hwmon_basename = entry.file_name().to_string_lossy().to_string();

        for n in 1..=32 {
            let input_path = hwmon_dir.join(format!("temp{n}_input"));
            if !input_path.exists() {
                break;
            }

            sensors.push(TempSensor {
                id: format!("{hwmon_basename}/temp{n}"),
                label: read_trimmed(&hwmon_dir.join(format!("temp{n}_label"))),
                input_path,
                hwmon_name: hwmon_name.clone(),
            });
        }
    }

    sensors.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sensors)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Drives one hwmon PWM output from one hwmon temperature input.
#[derive(Debug, Clone)]
pub struct HwmonBackend {
    fan: Fan,
    sensor: TempSensor,
}

impl HwmonBackend {
    pub fn new(fan: Fan, sensor: TempSensor) -> Self {
        Self { fan, sensor }
    }

    /// Look up `pwm_id` and `temp_id` (e.g. "hwmon3/pwm1", "hwmon3/temp1")
    /// under `root`.
    pub fn open(root: &Path, pwm_id: &str, temp_id: &str) -> Result<Self, HardwareError> {
        let io_err = |source| HardwareError::Io {
            path: root.to_path_buf(),
            source,
        };
        let fan = discover_fans(root)
            .map_err(io_err)?
            .into_iter()
            .find(|f| f.id == pwm_id)
            .ok_or_else(|| HardwareError::UnknownChannel(pwm_id.to_string()))?;
        let sensor = discover_temp_sensors(root)
            .map_err(io_err)?
            .into_iter()
            .find(|s| s.id == temp_id)
            .ok_or_else(|| HardwareError::UnknownChannel(temp_id.to_string()))?;

        log::info!(
            "Using hwmon fan {} ({}) with sensor {} ({})",
            fan.id,
            fan.hwmon_name,
            sensor.id,
            sensor.hwmon_name
        );
        Ok(Self::new(fan, sensor))
    }

    pub fn fan(&self) -> &Fan {
        &self.fan
    }

    pub fn sensor(&self) -> &TempSensor {
        &self.sensor
    }
}

impl TemperatureSensor for HwmonBackend {
    fn read_temperature(&self) -> Result<u8, HardwareError> {
        let millic: i64 = read_value(&self.sensor.input_path, "temperature")?;
        Ok(curve::clamp_percent_f64(millic as f64 / 1000.0))
    }

    fn read_fan_speed(&self) -> Result<u8, HardwareError> {
        let pwm: u16 = read_value(&self.fan.pwm_path, "PWM duty")?;
        Ok(pwm_to_percent(pwm))
    }
}

impl FanActuator for HwmonBackend {
    fn apply_speed(&self, percent: u8) -> Result<(), HardwareError> {
        write_value(&self.fan.pwm_path, percent_to_pwm(percent))
    }

    fn set_manual_mode(&self, enabled: bool) -> Result<(), HardwareError> {
        let mode = if enabled {
            PWM_ENABLE_MANUAL
        } else {
            PWM_ENABLE_AUTO
        };
        write_value(&self.fan.pwm_enable_path, mode)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Scale a 0-100 percentage to a 0-255 duty value.
pub fn percent_to_pwm(percent: u8) -> u8 {
    let percent = u16::from(percent.min(curve::MAX_PERCENT));
    ((percent * PWM_MAX + 50) / 100) as u8
}

/// Scale a 0-255 duty value to a 0-100 percentage.
pub fn pwm_to_percent(pwm: u16) -> u8 {
    let pwm = pwm.min(PWM_MAX);
    ((pwm * 100 + PWM_MAX / 2) / PWM_MAX) as u8
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_value<T: std::str::FromStr>(path: &Path, what: &'static str) -> Result<T, HardwareError> {
    let raw = fs::read_to_string(path).map_err(|source| HardwareError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    raw.trim().parse().map_err(|_| HardwareError::Parse {
        what,
        raw: raw.trim().to_string(),
    })
}

fn write_value(path: &Path, value: u8) -> Result<(), HardwareError> {
    fs::write(path, format!("{value}")).map_err(|source| HardwareError::Io {
        path: path.to_path_buf(),
        source,
    })
}
