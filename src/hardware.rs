// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Sensor and actuator interfaces used by the control loop.
//!
//! Backends live in [`crate::nvidia`] and [`crate::hwmon`]; [`open_backend`]
//! builds the one selected in the configuration.

use crate::config::HardwareConfig;
use crate::hwmon::HwmonBackend;
use crate::nvidia::NvidiaBackend;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;

/// A failed hardware query or command.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed ({status}): {output}")]
    CommandFailed {
        command: String,
        status: ExitStatus,
        output: String,
    },

    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("hardware call did not complete: {0}")]
    Join(#[from] JoinError),

    #[error("could not parse {what} from {raw:?}")]
    Parse { what: &'static str, raw: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

/// Read side: temperature and the fan's current speed.
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature, clamped to 0-100.
    fn read_temperature(&self) -> Result<u8, HardwareError>;

    /// Speed the fan is actually running at, in percent.
    fn read_fan_speed(&self) -> Result<u8, HardwareError>;
}

/// Write side: speed commands and manual/automatic mode.
pub trait FanActuator: Send + Sync {
    /// Command a fan speed in percent. Only honoured in manual mode.
    fn apply_speed(&self, percent: u8) -> Result<(), HardwareError>;

    /// Switch between manual control (true) and the device's own policy.
    fn set_manual_mode(&self, enabled: bool) -> Result<(), HardwareError>;

    /// Hand the fan back to its automatic policy.
    fn release_manual_control(&self) -> Result<(), HardwareError> {
        self.set_manual_mode(false)
    }
}

/// A backend split into its sensor and actuator halves.
pub struct Backend {
    pub name: String,
    pub sensor: Arc<dyn TemperatureSensor>,
    pub actuator: Arc<dyn FanActuator>,
}

impl Backend {
    pub fn new<B>(name: impl Into<String>, backend: B) -> Self
    where
        B: TemperatureSensor + FanActuator + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            name: name.into(),
            sensor: backend.clone(),
            actuator: backend,
        }
    }
}

/// Build the backend described by `config`.
pub fn open_backend(config: &HardwareConfig) -> Result<Backend, HardwareError> {
    match config {
        HardwareConfig::Nvidia {
            gpu,
            fan,
            smi_path,
            settings_path,
        } => {
            let nvidia = NvidiaBackend::new(*gpu, *fan)
                .with_programs(smi_path.clone(), settings_path.clone());
            Ok(Backend::new(format!("nvidia gpu:{gpu} fan:{fan}"), nvidia))
        }
        HardwareConfig::Hwmon {
            root,
            pwm,
            temp_sensor,
        } => {
            let hwmon = HwmonBackend::open(Path::new(root), pwm, temp_sensor)?;
            let (fan, sensor) = (hwmon.fan(), hwmon.sensor());
            let name = format!(
                "hwmon {} {} <- {}",
                fan.hwmon_name,
                fan.label.as_deref().unwrap_or(&fan.id),
                sensor.label.as_deref().unwrap_or(&sensor.id)
            );
            Ok(Backend::new(name, hwmon))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_nvidia_backend() {
        let backend = open_backend(&HardwareConfig::default()).unwrap();
        assert_eq!(backend.name, "nvidia gpu:0 fan:0");
    }

    #[test]
    fn test_open_hwmon_backend_names_channels() {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("hwmon1");
        std::fs::create_dir(&dev).unwrap();
        std::fs::write(dev.join("name"), "it8686\n").unwrap();
        std::fs::write(dev.join("pwm1"), "100\n").unwrap();
        std::fs::write(dev.join("temp1_input"), "40000\n").unwrap();
        std::fs::write(dev.join("temp1_label"), "CPU\n").unwrap();

        let config = HardwareConfig::Hwmon {
            root: dir.path().to_string_lossy().into_owned(),
            pwm: "hwmon1/pwm1".to_string(),
            temp_sensor: "hwmon1/temp1".to_string(),
        };
        let backend = open_backend(&config).unwrap();
        assert_eq!(backend.name, "hwmon it8686 hwmon1/pwm1 <- CPU");
        assert_eq!(backend.sensor.read_temperature().unwrap(), 40);
    }

    #[test]
    fn test_open_hwmon_unknown_channel() {
        let dir = tempfile::tempdir().unwrap();
        let config = HardwareConfig::Hwmon {
            root: dir.path().to_string_lossy().into_owned(),
            pwm: "hwmon0/pwm1".to_string(),
            temp_sensor: "hwmon0/temp1".to_string(),
        };
        match open_backend(&config) {
            Err(HardwareError::UnknownChannel(id)) => assert_eq!(id, "hwmon0/pwm1"),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected an unknown channel"),
        }
    }
}
