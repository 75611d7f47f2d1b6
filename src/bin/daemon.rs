// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! fancurve-daemon: headless service that applies a curve file to one fan
//! until terminated, handing the fan back to automatic control on exit.

use clap::Parser;
use fancurve_control::config::{self, Config};
use fancurve_control::control::{ControlLoop, ControlLoopState, LoopSettings};
use fancurve_control::hardware;
use fancurve_control::hwmon;
use fancurve_control::persist;
use fancurve_control::store::CurveStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::watch;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "fancurve-daemon", about = "Apply a fan curve in the background")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the curve file.
    #[arg(long)]
    curve: Option<String>,

    /// Override the poll interval, in milliseconds.
    #[arg(short, long)]
    interval: Option<u64>,

    /// List hwmon PWM outputs and temperature inputs, then exit.
    #[arg(long)]
    list_channels: bool,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list_channels {
        return list_channels(Path::new(hwmon::HWMON_ROOT));
    }

    let config_path = config::resolve_config_path(Some(&cli.config));
    let mut cfg = config::load_config(&config_path).unwrap_or_else(|e| {
        log::warn!("Could not load config: {e}, using defaults");
        Config::default()
    });
    if let Some(ms) = cli.interval {
        cfg.control.poll_interval_ms = ms;
    }

    let curve_path = PathBuf::from(cli.curve.unwrap_or_else(|| cfg.control.curve_path.clone()));
    let (curve, _) = persist::load_curve_or_default(&curve_path);
    let store = Arc::new(CurveStore::new(curve)?);

    let backend = hardware::open_backend(&cfg.hardware)?;
    log::info!("Driving {}", backend.name);

    let mut control = ControlLoop::new(
        store,
        backend.sensor,
        backend.actuator,
        LoopSettings::from(&cfg.control),
    );
    control.start();
    tokio::spawn(log_state_changes(control.subscribe()));

    let mut signals = Signals::install()?;
    loop {
        match signals.next().await {
            Trigger::Reload => reload_curve(&control, &curve_path).await,
            Trigger::Shutdown => break,
        }
    }

    log::info!("Received shutdown signal");
    control.stop().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Reload,
    Shutdown,
}

/// Signal streams, registered once so nothing arriving between two waits
/// is lost.
struct Signals {
    interrupt: Signal,
    terminate: Signal,
    quit: Signal,
    hangup: Signal,
}

impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// SIGHUP reloads the curve; SIGINT, SIGTERM and SIGQUIT shut down.
    async fn next(&mut self) -> Trigger {
        tokio::select! {
            _ = self.interrupt.recv() => Trigger::Shutdown,
            _ = self.terminate.recv() => Trigger::Shutdown,
            _ = self.quit.recv() => Trigger::Shutdown,
            _ = self.hangup.recv() => Trigger::Reload,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Re-read the curve file and swap it in. A bad file leaves the current
/// curve in place.
async fn reload_curve(control: &ControlLoop, path: &Path) {
    log::info!("Reloading curve from {}", path.display());
    let curve = match persist::load_curve(path) {
        Ok(curve) => curve,
        Err(e) => {
            log::error!("Keeping current curve: {e}");
            return;
        }
    };
    if let Err(e) = control.set_curve(curve).await {
        log::error!("Keeping current curve: {e}");
    }
}

async fn log_state_changes(mut rx: watch::Receiver<ControlLoopState>) {
    let mut last_error: Option<String> = None;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if let (Some(t), Some(s)) = (state.current_temperature, state.current_speed) {
            log::debug!(
                "tick {}: {t}°C -> {s}% (fan reports {:?})",
                state.ticks,
                state.reported_speed
            );
        }
        if state.last_error != last_error {
            match &state.last_error {
                Some(e) => log::warn!("Hardware unavailable: {e}"),
                None => log::info!("Hardware responding again"),
            }
            last_error = state.last_error;
        }
    }
}

fn list_channels(root: &Path) -> anyhow::Result<()> {
    let fans = hwmon::discover_fans(root)?;
    let sensors = hwmon::discover_temp_sensors(root)?;

    println!("PWM outputs:");
    for fan in &fans {
        println!(
            "  {:<16} {:<12} {}",
            fan.id,
            fan.hwmon_name,
            fan.label.as_deref().unwrap_or("-")
        );
    }
    println!("Temperature inputs:");
    for sensor in &sensors {
        println!(
            "  {:<16} {:<12} {}",
            sensor.id,
            sensor.hwmon_name,
            sensor.label.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_hook::consts::{SIGHUP, SIGINT};
    use signal_hook::low_level::raise;

    #[tokio::test]
    async fn test_signals_raised_between_waits_are_kept() {
        let mut signals = Signals::install().unwrap();

        raise(SIGHUP).unwrap();
        raise(SIGINT).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut seen = vec![signals.next().await, signals.next().await];
        seen.sort_by_key(|t| *t == Trigger::Shutdown);
        assert_eq!(seen, [Trigger::Reload, Trigger::Shutdown]);
    }
}
