// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! The background control loop.
//!
//! A Tokio task wakes on a fixed interval, reads the temperature, looks it
//! up on the current curve and pushes the resulting speed to the fan.
//! Pause, resume, manual-mode toggles and stop are sent to the task over a
//! channel and handled between ticks, so once [`ControlLoop::pause`]
//! returns no tick is running and none starts until [`ControlLoop::resume`].
//!
//! Sensor and fan calls are blocking. They run on Tokio's blocking pool
//! under [`LoopSettings::hardware_timeout`]; a call that overruns is
//! reported as [`HardwareError::Timeout`] and the tick is skipped.

use crate::config::ControlConfig;
use crate::curve::{self, Curve, CurveError};
use crate::hardware::{FanActuator, HardwareError, TemperatureSensor};
use crate::store::{Accepted, CurveStore};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, Duration, MissedTickBehavior};

/// Tuning for a [`ControlLoop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Limit on each sensor read or fan command.
    pub hardware_timeout: Duration,
    /// A new speed is pushed only when it differs from the last pushed
    /// speed by more than this many percent.
    pub speed_deadband: u8,
    pub manual_on_start: bool,
    pub release_on_stop: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from(&ControlConfig::default())
    }
}

impl From<&ControlConfig> for LoopSettings {
    fn from(cfg: &ControlConfig) -> Self {
        Self {
            interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            hardware_timeout: Duration::from_millis(cfg.hardware_timeout_ms.max(1)),
            speed_deadband: cfg.speed_deadband,
            manual_on_start: cfg.manual_on_start,
            release_on_stop: cfg.restore_on_exit,
        }
    }
}

/// What the loop last saw and did, for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlLoopState {
    pub current_temperature: Option<u8>,
    /// Speed computed from the curve on the last completed tick.
    pub current_speed: Option<u8>,
    /// Speed the hardware reported after the last tick.
    pub reported_speed: Option<u8>,
    pub paused: bool,
    pub running: bool,
    pub manual_control: bool,
    pub ticks: u64,
    pub last_error: Option<String>,
}

enum Command {
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<()>),
    SetManual {
        enabled: bool,
        reply: oneshot::Sender<Result<(), HardwareError>>,
    },
    Stop,
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Handle to the control loop. Starts stopped.
pub struct ControlLoop {
    store: Arc<CurveStore>,
    sensor: Arc<dyn TemperatureSensor>,
    actuator: Arc<dyn FanActuator>,
    settings: LoopSettings,
    state: watch::Sender<ControlLoopState>,
    running: Option<Running>,
}

impl ControlLoop {
    pub fn new(
        store: Arc<CurveStore>,
        sensor: Arc<dyn TemperatureSensor>,
        actuator: Arc<dyn FanActuator>,
        settings: LoopSettings,
    ) -> Self {
        let (state, _) = watch::channel(ControlLoopState::default());
        Self {
            store,
            sensor,
            actuator,
            settings,
            state,
            running: None,
        }
    }

    pub fn store(&self) -> &Arc<CurveStore> {
        &self.store
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Snapshot of the latest loop state.
    pub fn state(&self) -> ControlLoopState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified whenever the loop state changes.
    pub fn subscribe(&self) -> watch::Receiver<ControlLoopState> {
        self.state.subscribe()
    }

    /// Spawn the loop task. Must be called from within a Tokio runtime.
    /// Does nothing if the loop is already running.
    pub fn start(&mut self) {
        if self.running.is_some() {
            log::debug!("Control loop already running");
            return;
        }

        self.state.send_modify(|s| {
            *s = ControlLoopState {
                running: true,
                ..ControlLoopState::default()
            };
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            store: self.store.clone(),
            sensor: self.sensor.clone(),
            actuator: self.actuator.clone(),
            settings: self.settings.clone(),
            state: self.state.clone(),
            paused: false,
            last_applied: None,
        };
        let task = tokio::spawn(worker.run(rx));

        log::info!(
            "Control loop started ({} ms interval)",
            self.settings.interval.as_millis()
        );
        self.running = Some(Running { commands, task });
    }

    /// Suspend ticks. Returns once the loop has acknowledged, so no tick
    /// is in flight afterwards.
    pub async fn pause(&self) {
        self.request(Command::Pause).await;
    }

    /// Resume ticks after [`ControlLoop::pause`].
    pub async fn resume(&self) {
        self.request(Command::Resume).await;
    }

    async fn request(&self, make: fn(oneshot::Sender<()>) -> Command) {
        let Some(running) = &self.running else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if running.commands.send(make(tx)).is_err() || rx.await.is_err() {
            log::debug!("Control loop exited before acknowledging");
        }
    }

    /// Replace the curve with the loop paused around the swap. The loop is
    /// resumed whether or not the candidate is accepted.
    pub async fn set_curve(&self, candidate: Curve) -> Result<Accepted, CurveError> {
        self.pause().await;
        let result = self.store.try_set_curve(candidate);
        self.resume().await;
        result
    }

    /// Have the fan honour the loop's speed commands.
    pub async fn enable_manual_control(&self) -> Result<(), HardwareError> {
        self.set_manual(true).await
    }

    /// Return the fan to its automatic policy. The loop keeps ticking.
    pub async fn disable_manual_control(&self) -> Result<(), HardwareError> {
        self.set_manual(false).await
    }

    async fn set_manual(&self, enabled: bool) -> Result<(), HardwareError> {
        if let Some(running) = &self.running {
            let (reply, rx) = oneshot::channel();
            if running
                .commands
                .send(Command::SetManual { enabled, reply })
                .is_ok()
            {
                if let Ok(result) = rx.await {
                    return result;
                }
            }
            log::debug!("Control loop exited; switching manual mode directly");
        }

        let actuator = self.actuator.clone();
        bounded(self.settings.hardware_timeout, "set manual mode", move || {
            actuator.set_manual_mode(enabled)
        })
        .await?;
        self.state.send_modify(|s| s.manual_control = enabled);
        Ok(())
    }

    /// Stop the loop and hand the fan back to automatic control. A tick in
    /// progress finishes first; no tick starts afterwards. Calling this on
    /// a stopped loop does nothing.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.commands.send(Command::Stop);
        if let Err(e) = running.task.await {
            log::error!("Control loop task failed: {e}");
        }

        self.state.send_modify(|s| {
            s.running = false;
            s.paused = false;
        });
        log::info!("Control loop stopped");
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        // The task releases manual control on its own when told to stop.
        if let Some(running) = self.running.take() {
            let _ = running.commands.send(Command::Stop);
        }
    }
}

// ---------------------------------------------------------------------------
// Worker task
// ---------------------------------------------------------------------------

struct Worker {
    store: Arc<CurveStore>,
    sensor: Arc<dyn TemperatureSensor>,
    actuator: Arc<dyn FanActuator>,
    settings: LoopSettings,
    state: watch::Sender<ControlLoopState>,
    paused: bool,
    last_applied: Option<u8>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if self.settings.manual_on_start {
            let result = self.set_manual_mode(true).await;
            self.record_manual(true, &result);
        }

        let mut interval = time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle(command).await,
                },
                _ = interval.tick() => self.tick().await,
            }
        }

        if self.settings.release_on_stop {
            let actuator = self.actuator.clone();
            let released = bounded(
                self.settings.hardware_timeout,
                "release manual control",
                move || actuator.release_manual_control(),
            )
            .await;
            match released {
                Ok(()) => log::info!("Released manual fan control"),
                Err(e) => log::error!("Failed to release manual fan control: {e}"),
            }
            self.state.send_modify(|s| s.manual_control = false);
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Pause(ack) => {
                self.paused = true;
                self.state.send_modify(|s| s.paused = true);
                log::debug!("Control loop paused");
                let _ = ack.send(());
            }
            Command::Resume(ack) => {
                self.paused = false;
                self.state.send_modify(|s| s.paused = false);
                log::debug!("Control loop resumed");
                let _ = ack.send(());
            }
            Command::SetManual { enabled, reply } => {
                let result = self.set_manual_mode(enabled).await;
                self.record_manual(enabled, &result);
                let _ = reply.send(result);
            }
            Command::Stop => {}
        }
    }

    async fn set_manual_mode(&self, enabled: bool) -> Result<(), HardwareError> {
        let actuator = self.actuator.clone();
        bounded(self.settings.hardware_timeout, "set manual mode", move || {
            actuator.set_manual_mode(enabled)
        })
        .await
    }

    fn record_manual(&mut self, enabled: bool, result: &Result<(), HardwareError>) {
        match result {
            Ok(()) => {
                let mode = if enabled { "manual" } else { "automatic" };
                log::info!("Fan switched to {mode} control");
                // Push the current speed again once the fan listens.
                self.last_applied = None;
                self.state.send_modify(|s| s.manual_control = enabled);
            }
            Err(e) => {
                log::error!("Failed to set manual control to {enabled}: {e}");
                self.report(e);
            }
        }
    }

    async fn tick(&mut self) {
        if self.paused {
            log::trace!("Tick skipped while paused");
            return;
        }

        let sensor = self.sensor.clone();
        let read = bounded(self.settings.hardware_timeout, "read temperature", move || {
            sensor.read_temperature()
        });
        let temperature = match read.await {
            Ok(t) => t.min(curve::MAX_PERCENT),
            Err(e) => {
                log::warn!("Temperature read failed: {e}");
                self.report(&e);
                return;
            }
        };

        let speed = self.store.curve().interpolate(f64::from(temperature));

        if self.should_apply(speed) {
            let actuator = self.actuator.clone();
            let applied = bounded(self.settings.hardware_timeout, "apply speed", move || {
                actuator.apply_speed(speed)
            });
            if let Err(e) = applied.await {
                log::warn!("Failed to apply fan speed {speed}%: {e}");
                self.report(&e);
                return;
            }
            log::debug!("Temperature {temperature} -> fan speed {speed}%");
            self.last_applied = Some(speed);
        }

        let sensor = self.sensor.clone();
        let reported = bounded(self.settings.hardware_timeout, "read fan speed", move || {
            sensor.read_fan_speed()
        });
        let reported = match reported.await {
            Ok(s) => Some(s),
            Err(e) => {
                log::debug!("Fan speed read failed: {e}");
                None
            }
        };

        self.state.send_modify(|s| {
            s.current_temperature = Some(temperature);
            s.current_speed = Some(speed);
            s.reported_speed = reported;
            s.ticks += 1;
            s.last_error = None;
        });
    }

    fn should_apply(&self, speed: u8) -> bool {
        match self.last_applied {
            None => true,
            Some(last) => last.abs_diff(speed) > self.settings.speed_deadband,
        }
    }

    fn report(&self, error: &HardwareError) {
        let message = error.to_string();
        self.state.send_modify(|s| s.last_error = Some(message));
    }
}

/// Run a blocking hardware call on the blocking pool, giving up after
/// `limit`. An abandoned call keeps its thread until it returns.
async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> Result<T, HardwareError>
where
    F: FnOnce() -> Result<T, HardwareError> + Send + 'static,
    T: Send + 'static,
{
    match time::timeout(limit, task::spawn_blocking(call)).await {
        Ok(joined) => joined?,
        Err(_) => Err(HardwareError::Timeout {
            command: what.to_string(),
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        ReadTemperature,
        ReadFanSpeed,
        Apply(u8),
        Manual(bool),
    }

    /// Records every hardware call; temperature and failures are scriptable.
    #[derive(Default)]
    struct MockHardware {
        temperature: AtomicU8,
        fail_reads: AtomicBool,
        fail_applies: AtomicBool,
        stall_reads: AtomicBool,
        calls: Mutex<Vec<Call>>,
    }

    impl MockHardware {
        fn with_temperature(t: u8) -> Arc<Self> {
            let hw = Self::default();
            hw.temperature.store(t, Ordering::SeqCst);
            Arc::new(hw)
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls().iter().filter(|c| pred(c)).count()
        }

        fn reads(&self) -> usize {
            self.count(|c| *c == Call::ReadTemperature)
        }

        fn applied(&self) -> Vec<u8> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Apply(s) => Some(s),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl TemperatureSensor for MockHardware {
        fn read_temperature(&self) -> Result<u8, HardwareError> {
            self.record(Call::ReadTemperature);
            if self.stall_reads.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_secs(1));
            }
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(HardwareError::Parse {
                    what: "GPU temperature",
                    raw: "[N/A]".to_string(),
                });
            }
            Ok(self.temperature.load(Ordering::SeqCst))
        }

        fn read_fan_speed(&self) -> Result<u8, HardwareError> {
            self.record(Call::ReadFanSpeed);
            Ok(42)
        }
    }

    impl FanActuator for MockHardware {
        fn apply_speed(&self, percent: u8) -> Result<(), HardwareError> {
            self.record(Call::Apply(percent));
            if self.fail_applies.load(Ordering::SeqCst) {
                return Err(HardwareError::UnknownChannel("fan:0".to_string()));
            }
            Ok(())
        }

        fn set_manual_mode(&self, enabled: bool) -> Result<(), HardwareError> {
            self.record(Call::Manual(enabled));
            Ok(())
        }
    }

    const TICK: Duration = Duration::from_millis(1000);

    fn control_loop(hw: &Arc<MockHardware>, pairs: &[(i64, i64)]) -> ControlLoop {
        let store = Arc::new(CurveStore::new(Curve::from_pairs(pairs)).unwrap());
        ControlLoop::new(store, hw.clone(), hw.clone(), LoopSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_curve_applies_constant_speed() {
        let hw = MockHardware::with_temperature(37);
        let mut ctl = control_loop(&hw, &[(0, 20), (100, 20)]);
        let mut rx = ctl.subscribe();
        ctl.start();

        for _ in 0..4 {
            rx.changed().await.unwrap();
            let state = rx.borrow_and_update().clone();
            if state.ticks > 0 {
                assert_eq!(state.current_temperature, Some(37));
                assert_eq!(state.current_speed, Some(20));
            }
        }
        time::sleep(TICK * 3).await;

        assert!(hw.reads() >= 3);
        assert!(hw.applied().iter().all(|s| *s == 20));
        assert_eq!(hw.applied().len(), 1);
        assert_eq!(ctl.state().current_speed, Some(20));
        assert_eq!(ctl.state().reported_speed, Some(42));
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interpolates_and_follows_temperature() {
        let hw = MockHardware::with_temperature(25);
        let mut ctl = control_loop(&hw, &[(0, 10), (50, 50), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;
        assert_eq!(ctl.state().current_speed, Some(30));

        hw.temperature.store(75, Ordering::SeqCst);
        time::sleep(TICK).await;
        assert_eq!(ctl.state().current_speed, Some(75));
        assert_eq!(hw.applied(), vec![30, 75]);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_takes_manual_control_on_start() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;

        assert_eq!(hw.calls()[0], Call::Manual(true));
        assert!(ctl.state().manual_control);
        assert!(ctl.state().running);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_suppresses_ticks() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK + TICK / 2).await;
        assert_eq!(hw.reads(), 2);

        ctl.pause().await;
        assert!(ctl.state().paused);
        let calls_before = hw.calls().len();
        time::sleep(TICK * 5).await;
        assert_eq!(hw.calls().len(), calls_before);

        ctl.resume().await;
        assert!(!ctl.state().paused);
        time::sleep(TICK * 2).await;
        assert!(hw.reads() > 2);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_curve_swaps_and_resumes() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;
        assert_eq!(ctl.state().current_speed, Some(55));

        let accepted = ctl
            .set_curve(Curve::from_pairs(&[(0, 30), (100, 30)]))
            .await
            .unwrap();
        assert!(accepted.changed);
        assert!(!ctl.state().paused);

        time::sleep(TICK).await;
        assert_eq!(ctl.state().current_speed, Some(30));
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_curve_keeps_loop_running() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;
        let before = ctl.store().curve();

        let result = ctl
            .set_curve(Curve::from_pairs(&[(10, 10), (10, 50)]))
            .await;
        assert!(matches!(
            result,
            Err(CurveError::NonIncreasingTemperature { .. })
        ));
        assert_eq!(ctl.store().curve(), before);
        assert!(!ctl.state().paused);

        let reads = hw.reads();
        time::sleep(TICK * 2).await;
        assert!(hw.reads() > reads);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_failure_skips_tick() {
        let hw = MockHardware::with_temperature(50);
        hw.fail_reads.store(true, Ordering::SeqCst);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK * 2 + TICK / 2).await;

        assert!(hw.applied().is_empty());
        let state = ctl.state();
        assert!(state.running);
        assert_eq!(state.ticks, 0);
        assert!(state.last_error.unwrap().contains("GPU temperature"));

        hw.fail_reads.store(false, Ordering::SeqCst);
        time::sleep(TICK).await;
        let state = ctl.state();
        assert_eq!(state.current_speed, Some(55));
        assert_eq!(state.last_error, None);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_apply_is_retried_next_tick() {
        let hw = MockHardware::with_temperature(50);
        hw.fail_applies.store(true, Ordering::SeqCst);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;
        assert!(ctl.state().last_error.is_some());
        assert_eq!(ctl.state().current_speed, None);

        hw.fail_applies.store(false, Ordering::SeqCst);
        time::sleep(TICK).await;
        assert_eq!(hw.applied(), vec![55, 55]);
        assert_eq!(ctl.state().current_speed, Some(55));
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadband_suppresses_small_changes() {
        let hw = MockHardware::with_temperature(50);
        let store = Arc::new(CurveStore::new(Curve::from_pairs(&[(0, 0), (100, 100)])).unwrap());
        let settings = LoopSettings {
            speed_deadband: 3,
            ..LoopSettings::default()
        };
        let mut ctl = ControlLoop::new(store, hw.clone(), hw.clone(), settings);
        ctl.start();
        time::sleep(TICK / 2).await;

        hw.temperature.store(52, Ordering::SeqCst);
        time::sleep(TICK).await;
        hw.temperature.store(54, Ordering::SeqCst);
        time::sleep(TICK).await;

        assert_eq!(hw.applied(), vec![50, 54]);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_once() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;

        ctl.stop().await;
        assert!(!ctl.is_running());
        assert!(!ctl.state().running);
        assert_eq!(hw.calls().last(), Some(&Call::Manual(false)));

        let calls = hw.calls().len();
        ctl.stop().await;
        time::sleep(TICK * 3).await;
        assert_eq!(hw.calls().len(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_start_touches_nothing() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.stop().await;
        assert!(hw.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_manual_keeps_ticking() {
        let hw = MockHardware::with_temperature(50);
        let mut ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.start();
        time::sleep(TICK / 2).await;

        ctl.disable_manual_control().await.unwrap();
        assert!(!ctl.state().manual_control);
        let reads = hw.reads();
        time::sleep(TICK * 2).await;
        assert!(hw.reads() > reads);

        ctl.enable_manual_control().await.unwrap();
        assert!(ctl.state().manual_control);
        time::sleep(TICK).await;
        // speed is pushed again after manual control comes back
        assert_eq!(hw.applied().last(), Some(&55));
        assert!(hw.applied().len() >= 2);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_toggle_while_stopped() {
        let hw = MockHardware::with_temperature(50);
        let ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.enable_manual_control().await.unwrap();
        assert_eq!(hw.calls(), vec![Call::Manual(true)]);
        assert!(ctl.state().manual_control);
        assert!(!ctl.state().running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_on_stopped_loop_is_noop() {
        let hw = MockHardware::with_temperature(50);
        let ctl = control_loop(&hw, &[(0, 10), (100, 100)]);
        ctl.pause().await;
        ctl.resume().await;
        assert_eq!(
            ctl.set_curve(Curve::from_pairs(&[(0, 40), (100, 60)])).await,
            Ok(Accepted { changed: true })
        );
        assert!(hw.calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stalled_sensor_times_out() {
        let hw = MockHardware::with_temperature(50);
        hw.stall_reads.store(true, Ordering::SeqCst);
        let store = Arc::new(CurveStore::new(Curve::from_pairs(&[(0, 10), (100, 100)])).unwrap());
        let settings = LoopSettings {
            hardware_timeout: Duration::from_millis(50),
            ..LoopSettings::default()
        };
        let mut ctl = ControlLoop::new(store, hw.clone(), hw.clone(), settings);
        ctl.start();
        time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        ctl.pause().await;
        assert!(started.elapsed() < Duration::from_millis(500));

        let state = ctl.state();
        assert_eq!(state.ticks, 0);
        assert!(hw.applied().is_empty());
        assert!(state.last_error.unwrap().contains("timed out"));

        hw.stall_reads.store(false, Ordering::SeqCst);
        let started = std::time::Instant::now();
        ctl.stop().await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(hw.calls().last(), Some(&Call::Manual(false)));
    }
}
