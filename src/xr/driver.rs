//! Frame loop owning the runtime end to end
//!
//! ```text
//! XrDriver<Assembled> ──start()──▶ XrDriver<Running> ──run()/shutdown()──▶ teardown
//!                        binds actions,                 session destroyed,
//!                        resolves clock                 then instance
//! ```
//!
//! The driver is blocking and is meant to live on its own thread. Snapshots
//! leave through [`SnapshotSink`]s; nothing flows back in.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::actions::{ActionBinder, BindingSettings, TOUCH_CONTROLS};
use super::error::XrError;
use super::input_sync::InputSyncEngine;
use super::lifecycle::SessionLifecycle;
use super::runtime::XrRuntime;
use super::time_bridge::TimeBridge;
use super::types::SessionPhase;
use crate::sink::SnapshotSink;
use crate::snapshot::Snapshot;

/// Loop cadence and reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Sleep between ticks in milliseconds
    pub tick_interval_ms: u64,
    /// Log an idle heartbeat every this many ticks
    pub idle_heartbeat_ticks: u64,
    /// Stop after this many frames, run until told otherwise when unset
    pub max_frames: Option<u64>,
    pub stats_interval_secs: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            idle_heartbeat_ticks: 60,
            max_frames: None,
            stats_interval_secs: 10,
        }
    }
}

/// Counters reported by the periodic stats log and returned on shutdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub frames: u64,
    pub focused_frames: u64,
    pub absent_readings: u64,
    pub published: u64,
    pub idle_heartbeats: u64,
    /// Non-fatal errors the loop stepped over
    pub recovered_errors: u64,
}

/// What the loop should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// The runtime requested shutdown
    Exit,
    /// The configured frame limit was reached
    FrameLimit,
}

struct Tracking {
    engine: InputSyncEngine,
    clock: TimeBridge,
}

#[state]
#[derive(Debug, Clone)]
pub enum DriverState {
    Assembled,
    Running,
}

#[machine]
pub struct XrDriver<S: DriverState> {
    runtime: Box<dyn XrRuntime>,
    settings: DriverSettings,
    binding: BindingSettings,
    lifecycle: SessionLifecycle,
    sinks: Vec<Box<dyn SnapshotSink>>,
    tracking: Option<Tracking>,
    stats: DriverStats,
    window: DriverStats,
    last_stats_time: DateTime<Local>,
    frame: u64,
}

impl<S: DriverState> XrDriver<S> {
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }
}

impl XrDriver<Assembled> {
    /// Takes ownership of a runtime whose instance and session already exist
    pub fn assemble(
        runtime: Box<dyn XrRuntime>,
        settings: DriverSettings,
        binding: BindingSettings,
    ) -> Self {
        info!(
            "Assembling driver for {} with settings: {:?}",
            runtime.describe(),
            settings
        );
        Self::new(
            runtime,
            settings,
            binding,
            SessionLifecycle::new(),
            Vec::new(),
            None,
            DriverStats::default(),
            DriverStats::default(),
            Local::now(),
            0,
        )
    }

    pub fn add_sink(&mut self, sink: Box<dyn SnapshotSink>) {
        debug!("Registered snapshot sink '{}'", sink.name());
        self.sinks.push(sink);
    }

    /// Binds the controller actions, then resolves the time bridge
    ///
    /// On failure the session and instance are torn down before the error is
    /// returned.
    pub fn start(mut self) -> Result<XrDriver<Running>, XrError> {
        match Self::prepare(self.runtime.as_mut(), &self.binding) {
            Ok(tracking) => {
                self.tracking = Some(tracking);
                info!("Driver ready, waiting for the session to become focused");
                Ok(self.transition())
            }
            Err(e) => {
                error!("Driver startup failed: {}", e);
                teardown(self.runtime.as_mut());
                Err(e)
            }
        }
    }

    fn prepare(
        runtime: &mut dyn XrRuntime,
        binding: &BindingSettings,
    ) -> Result<Tracking, XrError> {
        let bound = ActionBinder::new(TOUCH_CONTROLS).bind(runtime, binding)?;
        let clock = TimeBridge::resolve(runtime)?;
        Ok(Tracking {
            engine: InputSyncEngine::new(bound),
            clock,
        })
    }
}

impl XrDriver<Running> {
    pub fn phase(&self) -> SessionPhase {
        self.lifecycle.phase()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    /// One pass: drain events, advance the phase, read input if focused, publish
    pub fn tick(&mut self) -> Result<TickOutcome, XrError> {
        let report = self.lifecycle.pump(self.runtime.as_mut())?;
        if report.exit_requested {
            info!("Runtime requested exit in phase {}", report.phase);
            return Ok(TickOutcome::Exit);
        }

        self.frame += 1;
        let phase = report.phase;

        let snapshot = match self.tracking.as_mut() {
            Some(tracking) if self.lifecycle.is_focused() => {
                self.window.focused_frames += 1;
                tracking
                    .engine
                    .tick(self.runtime.as_mut(), &mut tracking.clock, self.frame)
            }
            _ => {
                if phase == SessionPhase::Idle
                    && self.settings.idle_heartbeat_ticks > 0
                    && self.frame % self.settings.idle_heartbeat_ticks == 0
                {
                    self.window.idle_heartbeats += 1;
                    info!("Session idle, waiting for the runtime (frame {})", self.frame);
                }
                Snapshot::metadata_only(self.frame, phase)
            }
        };

        self.window.frames += 1;
        self.window.absent_readings += snapshot.absent_count() as u64;
        for sink in self.sinks.iter_mut() {
            sink.publish(&snapshot);
            self.window.published += 1;
        }

        if self
            .settings
            .max_frames
            .is_some_and(|limit| self.frame >= limit)
        {
            return Ok(TickOutcome::FrameLimit);
        }
        Ok(TickOutcome::Continue)
    }

    /// Ticks until exit, frame limit, cancellation or a fatal error, then tears down
    pub fn run(mut self, cancel: &CancellationToken) -> Result<DriverStats, XrError> {
        let interval = Duration::from_millis(self.settings.tick_interval_ms);
        info!(
            "Entering frame loop with {} ms interval",
            self.settings.tick_interval_ms
        );

        let result = loop {
            if cancel.is_cancelled() {
                info!("Interrupt received, stopping after frame {}", self.frame);
                break Ok(());
            }

            match self.tick() {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Exit) => break Ok(()),
                Ok(TickOutcome::FrameLimit) => {
                    info!("Frame limit of {} reached", self.frame);
                    break Ok(());
                }
                Err(e) if e.is_fatal() => {
                    error!("Fatal runtime error in frame {}: {}", self.frame, e);
                    break Err(e);
                }
                Err(e) => {
                    self.window.recovered_errors += 1;
                    warn!("Runtime error after frame {}, continuing: {}", self.frame, e);
                }
            }

            self.log_stats_if_due();
            std::thread::sleep(interval);
        };

        let stats = self.shutdown();
        result.map(|_| stats)
    }

    /// Releases the clock, then destroys the session and the instance
    pub fn shutdown(mut self) -> DriverStats {
        self.merge_window();
        if self.lifecycle.is_running() {
            warn!("Tearing down while the session is still running");
        }
        // The clock converts through the instance and must not outlive it
        drop(self.tracking.take());
        teardown(self.runtime.as_mut());
        info!(
            "Driver stopped: {} frames, {} focused, {} absent readings",
            self.stats.frames, self.stats.focused_frames, self.stats.absent_readings
        );
        self.stats
    }

    fn merge_window(&mut self) {
        self.stats.frames += self.window.frames;
        self.stats.focused_frames += self.window.focused_frames;
        self.stats.absent_readings += self.window.absent_readings;
        self.stats.published += self.window.published;
        self.stats.idle_heartbeats += self.window.idle_heartbeats;
        self.stats.recovered_errors += self.window.recovered_errors;
        self.window = DriverStats::default();
    }

    fn log_stats_if_due(&mut self) {
        let now = Local::now();
        let stats_interval = chrono::Duration::seconds(self.settings.stats_interval_secs as i64);
        if now - self.last_stats_time <= stats_interval {
            return;
        }

        let elapsed_seconds = (now - self.last_stats_time).num_seconds().max(1);
        info!(
            "Driver stats: {} frames ({} focused), {} absent readings in {} seconds, phase {}",
            self.window.frames,
            self.window.focused_frames,
            self.window.absent_readings,
            elapsed_seconds,
            self.lifecycle.phase()
        );
        info!(
            "Average: {:.2} frames/sec, {:.2} absent/frame",
            self.window.frames as f64 / elapsed_seconds as f64,
            self.window.absent_readings as f64 / self.window.frames.max(1) as f64
        );

        self.merge_window();
        self.last_stats_time = now;
    }
}

fn teardown(runtime: &mut dyn XrRuntime) {
    info!("Tearing down runtime handles");
    runtime.destroy_session();
    runtime.destroy_instance();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::xr::mock::{MockHandle, MockRuntime, RuntimeCall};
    use crate::xr::types::{Hand, Pose, RuntimeEvent, SpaceLocation};

    fn changes(phases: &[SessionPhase]) -> Vec<RuntimeEvent> {
        phases
            .iter()
            .map(|p| RuntimeEvent::SessionStateChanged(*p))
            .collect()
    }

    const ACTIVATION: [SessionPhase; 5] = [
        SessionPhase::Idle,
        SessionPhase::Ready,
        SessionPhase::Synchronized,
        SessionPhase::Visible,
        SessionPhase::Focused,
    ];

    fn running(settings: DriverSettings) -> (XrDriver<Running>, MockHandle, MemorySink) {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let sink = MemorySink::new();
        let mut driver =
            XrDriver::assemble(Box::new(runtime), settings, BindingSettings::default());
        driver.add_sink(Box::new(sink.clone()));
        (driver.start().unwrap(), handle, sink)
    }

    #[test]
    fn unfocused_ticks_publish_metadata_only() {
        let (mut driver, handle, sink) = running(DriverSettings::default());
        handle.push_events(changes(&[SessionPhase::Idle, SessionPhase::Ready]));

        driver.tick().unwrap();

        let published = sink.snapshots();
        assert_eq!(published.len(), 1);
        assert!(published[0].is_empty());
        assert_eq!(published[0].phase, SessionPhase::Ready);
        assert_eq!(handle.count(|c| *c == RuntimeCall::SyncActions), 0);
    }

    #[test]
    fn focused_tick_reads_input() {
        let (mut driver, handle, sink) = running(DriverSettings::default());
        handle.set_location(
            Hand::Right,
            SpaceLocation {
                pose: Pose::IDENTITY,
                position_valid: true,
                orientation_valid: true,
                position_tracked: true,
            },
        );
        handle.push_events(changes(&ACTIVATION));

        driver.tick().unwrap();

        let snapshot = sink.latest().unwrap();
        assert_eq!(snapshot.phase, SessionPhase::Focused);
        assert_eq!(snapshot.pose(Hand::Right), Some(&Pose::IDENTITY));
        assert_eq!(handle.count(|c| *c == RuntimeCall::SyncActions), 1);
    }

    #[test]
    fn no_input_reads_after_stopping() {
        let (mut driver, handle, _sink) = running(DriverSettings::default());
        handle.push_events(changes(&ACTIVATION));
        driver.tick().unwrap();
        driver.tick().unwrap();

        handle.push_events(changes(&[SessionPhase::Visible, SessionPhase::Stopping]));
        driver.tick().unwrap();
        driver.tick().unwrap();

        let calls = handle.calls();
        let ended = calls
            .iter()
            .position(|c| *c == RuntimeCall::EndSession)
            .unwrap();
        assert!(calls[ended..].iter().all(|c| !matches!(
            c,
            RuntimeCall::SyncActions | RuntimeCall::Locate { .. } | RuntimeCall::Query { .. }
        )));
    }

    #[test]
    fn exiting_stops_the_loop() {
        let (mut driver, handle, sink) = running(DriverSettings::default());
        handle.push_events(changes(&[SessionPhase::Idle, SessionPhase::Exiting]));

        assert_eq!(driver.tick().unwrap(), TickOutcome::Exit);
        assert!(sink.snapshots().is_empty());
    }

    #[test]
    fn frame_limit_is_reported() {
        let settings = DriverSettings {
            max_frames: Some(2),
            ..DriverSettings::default()
        };
        let (mut driver, _handle, _sink) = running(settings);

        assert_eq!(driver.tick().unwrap(), TickOutcome::Continue);
        assert_eq!(driver.tick().unwrap(), TickOutcome::FrameLimit);
    }

    #[test]
    fn failed_startup_tears_down() {
        let runtime = MockRuntime::new().fail_action_set_creation();
        let handle = runtime.handle();
        let driver = XrDriver::assemble(
            Box::new(runtime),
            DriverSettings::default(),
            BindingSettings::default(),
        );

        assert!(driver.start().is_err());
        assert!(!handle.session_alive());
        assert!(!handle.instance_alive());
    }

    #[test]
    fn shutdown_destroys_session_before_instance() {
        let (driver, handle, _sink) = running(DriverSettings::default());

        driver.shutdown();

        let calls = handle.calls();
        let tail = &calls[calls.len() - 3..];
        assert_eq!(
            tail,
            &[
                RuntimeCall::ReleaseClock,
                RuntimeCall::DestroySession,
                RuntimeCall::DestroyInstance
            ]
        );
    }

    #[test]
    fn idle_session_logs_heartbeat_every_n_ticks() {
        let settings = DriverSettings {
            idle_heartbeat_ticks: 2,
            ..DriverSettings::default()
        };
        let (mut driver, handle, sink) = running(settings);
        handle.push_events(changes(&[SessionPhase::Idle]));

        for _ in 0..5 {
            assert_eq!(driver.tick().unwrap(), TickOutcome::Continue);
        }
        let stats = driver.shutdown();

        assert_eq!(stats.idle_heartbeats, 2);
        assert_eq!(stats.frames, 5);
        let published = sink.snapshots();
        assert!(published
            .iter()
            .all(|s| s.is_empty() && s.phase == SessionPhase::Idle));
        assert_eq!(handle.count(|c| *c == RuntimeCall::SyncActions), 0);
    }

    #[test]
    fn zero_heartbeat_interval_disables_heartbeat() {
        let settings = DriverSettings {
            idle_heartbeat_ticks: 0,
            ..DriverSettings::default()
        };
        let (mut driver, handle, _sink) = running(settings);
        handle.push_events(changes(&[SessionPhase::Idle]));

        for _ in 0..3 {
            driver.tick().unwrap();
        }

        assert_eq!(driver.shutdown().idle_heartbeats, 0);
    }

    #[test]
    fn recoverable_error_does_not_end_the_run() {
        let settings = DriverSettings {
            tick_interval_ms: 0,
            max_frames: Some(3),
            ..DriverSettings::default()
        };
        let (driver, handle, sink) = running(settings);
        handle.fail_poll(XrError::Sync("session lost focus".to_string()));

        let stats = driver.run(&CancellationToken::new()).unwrap();

        assert_eq!(stats.recovered_errors, 1);
        assert_eq!(stats.frames, 3);
        assert_eq!(sink.snapshots().len(), 3);
    }

    #[test]
    fn fatal_error_ends_the_run() {
        let settings = DriverSettings {
            tick_interval_ms: 0,
            max_frames: Some(3),
            ..DriverSettings::default()
        };
        let (driver, handle, sink) = running(settings);
        handle.fail_poll(XrError::EventPoll("instance lost".to_string()));

        let err = driver.run(&CancellationToken::new()).unwrap_err();

        assert!(matches!(err, XrError::EventPoll(_)));
        assert!(sink.snapshots().is_empty());
        assert!(!handle.instance_alive());
    }
}
