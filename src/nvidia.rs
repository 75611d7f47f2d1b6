// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! NVIDIA GPU fan control through the driver's command-line tools.
//!
//! Reads go through `nvidia-smi`, writes through `nvidia-settings`
//! (which needs access to the X display the GPU drives).

use crate::curve;
use crate::hardware::{FanActuator, HardwareError, TemperatureSensor};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_SMI_PROGRAM: &str = "nvidia-smi";
pub const DEFAULT_SETTINGS_PROGRAM: &str = "nvidia-settings";

/// A command still running after this long is killed.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

const EXIT_POLL: Duration = Duration::from_millis(10);

/// One GPU temperature source and one of its fans.
#[derive(Debug, Clone)]
pub struct NvidiaBackend {
    gpu: u32,
    fan: u32,
    smi: String,
    settings: String,
    timeout: Duration,
}

impl NvidiaBackend {
    pub fn new(gpu: u32, fan: u32) -> Self {
        Self {
            gpu,
            fan,
            smi: DEFAULT_SMI_PROGRAM.to_string(),
            settings: DEFAULT_SETTINGS_PROGRAM.to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use different executables for `nvidia-smi` / `nvidia-settings`.
    pub fn with_programs(mut self, smi: Option<String>, settings: Option<String>) -> Self {
        if let Some(smi) = smi {
            self.smi = smi;
        }
        if let Some(settings) = settings {
            self.settings = settings;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn query(&self, field: &str) -> Result<String, HardwareError> {
        run(
            &self.smi,
            self.timeout,
            &[
                "-i".to_string(),
                self.gpu.to_string(),
                format!("--query-gpu={field}"),
                "--format=csv,noheader,nounits".to_string(),
            ],
        )
    }

    fn assign(&self, assignment: String) -> Result<(), HardwareError> {
        run(&self.settings, self.timeout, &["-a".to_string(), assignment]).map(|_| ())
    }
}

impl TemperatureSensor for NvidiaBackend {
    fn read_temperature(&self) -> Result<u8, HardwareError> {
        parse_percent(&self.query("temperature.gpu")?, "GPU temperature")
    }

    fn read_fan_speed(&self) -> Result<u8, HardwareError> {
        parse_percent(&self.query("fan.speed")?, "fan speed")
    }
}

impl FanActuator for NvidiaBackend {
    fn apply_speed(&self, percent: u8) -> Result<(), HardwareError> {
        self.assign(target_speed_assignment(self.fan, percent))
    }

    fn set_manual_mode(&self, enabled: bool) -> Result<(), HardwareError> {
        self.assign(control_state_assignment(self.gpu, enabled))
    }
}

// ---------------------------------------------------------------------------
// Command helpers
// ---------------------------------------------------------------------------

/// `[fan:N]/GPUTargetFanSpeed=P`
pub fn target_speed_assignment(fan: u32, percent: u8) -> String {
    let percent = percent.min(curve::MAX_PERCENT);
    format!("[fan:{fan}]/GPUTargetFanSpeed={percent}")
}

/// `[gpu:N]/GPUFanControlState=0|1`
pub fn control_state_assignment(gpu: u32, manual: bool) -> String {
    format!("[gpu:{gpu}]/GPUFanControlState={}", u8::from(manual))
}

/// Parse the first line of an `nvidia-smi` query as a 0-100 value.
///
/// Fractional readings are rounded; out-of-range readings are clamped.
pub fn parse_percent(raw: &str, what: &'static str) -> Result<u8, HardwareError> {
    let first = raw.lines().next().unwrap_or_default().trim();
    first
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(curve::clamp_percent_f64)
        .ok_or_else(|| HardwareError::Parse {
            what,
            raw: raw.trim().to_string(),
        })
}

fn run(program: &str, timeout: Duration, args: &[String]) -> Result<String, HardwareError> {
    let command = format!("{program} {}", args.join(" "));
    log::trace!("Running {command}");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| HardwareError::Spawn {
            command: command.clone(),
            source,
        })?;

    let (status, stdout, stderr) = wait_with_deadline(child, &command, timeout)?;

    // nvidia-settings reports some failures on a zero exit status
    if !status.success() || reports_error(&stdout) || reports_error(&stderr) {
        let message = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        return Err(HardwareError::CommandFailed {
            command,
            status,
            output: message,
        });
    }

    Ok(stdout)
}

/// Wait for `child` to exit, killing it once `timeout` has passed. The
/// driver tools print a line or two, so the pipes never fill before exit.
fn wait_with_deadline(
    mut child: Child,
    command: &str,
    timeout: Duration,
) -> Result<(ExitStatus, String, String), HardwareError> {
    let spawn_err = |source| HardwareError::Spawn {
        command: command.to_string(),
        source,
    };
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait().map_err(spawn_err)? {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                log::warn!("Failed to kill `{command}`: {e}");
            }
            let _ = child.wait();
            return Err(HardwareError::Timeout {
                command: command.to_string(),
                after: timeout,
            });
        }
        thread::sleep(EXIT_POLL);
    };

    let mut stdout = String::new();
    let mut stderr = String::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_string(&mut stdout).map_err(spawn_err)?;
    }
    if let Some(mut err) = child.stderr.take() {
        err.read_to_string(&mut stderr).map_err(spawn_err)?;
    }
    Ok((status, stdout, stderr))
}

fn reports_error(output: &str) -> bool {
    output.lines().any(|l| l.trim_start().starts_with("ERROR"))
}
