use tracing::{debug, error, info, warn};

use super::error::XrError;
use super::runtime::XrRuntime;
use super::types::{RuntimeEvent, SessionPhase};

/// What one drain of the event queue produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseReport {
    /// Phase governing the rest of this tick
    pub phase: SessionPhase,
    /// Phases entered during the drain, in arrival order
    pub transitions: Vec<SessionPhase>,
    /// The runtime asked the application to shut down
    pub exit_requested: bool,
}

impl PhaseReport {
    pub fn changed(&self) -> bool {
        !self.transitions.is_empty()
    }
}

/// Session phase machine driven by runtime notifications
///
/// Begin is issued on entering `Ready` and end on entering `Stopping`.
/// Input may only be read while the phase is `Focused`.
#[derive(Debug, Default)]
pub struct SessionLifecycle {
    phase: SessionPhase,
    running: bool,
    exit_requested: bool,
    begin_count: u32,
    protocol_violations: u32,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// True between a successful begin and the matching end
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_focused(&self) -> bool {
        self.phase == SessionPhase::Focused
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn begin_count(&self) -> u32 {
        self.begin_count
    }

    pub fn protocol_violations(&self) -> u32 {
        self.protocol_violations
    }

    /// Drains every pending notification without blocking and applies them in order
    pub fn pump(&mut self, runtime: &mut dyn XrRuntime) -> Result<PhaseReport, XrError> {
        let mut transitions = Vec::new();

        while let Some(event) = runtime.poll_event()? {
            match event {
                RuntimeEvent::SessionStateChanged(next) => {
                    self.enter(next, runtime)?;
                    transitions.push(next);
                }
                RuntimeEvent::InstanceLossPending => {
                    warn!("Runtime instance loss pending, shutting down");
                    self.exit_requested = true;
                }
                RuntimeEvent::EventsLost(count) => {
                    warn!("Runtime dropped {} queued events", count);
                }
                RuntimeEvent::Other => debug!("Ignoring runtime event"),
            }
        }

        Ok(PhaseReport {
            phase: self.phase,
            transitions,
            exit_requested: self.exit_requested,
        })
    }

    fn enter(&mut self, next: SessionPhase, runtime: &mut dyn XrRuntime) -> Result<(), XrError> {
        info!("Session state: {} -> {}", self.phase, next);
        self.phase = next;

        match next {
            SessionPhase::Ready => {
                if self.running {
                    self.protocol_violations += 1;
                    error!("Session entered READY while already running, begin not reissued");
                    return Ok(());
                }
                runtime.begin_session()?;
                self.running = true;
                self.begin_count += 1;
                info!("Session begun with mono view configuration");
            }
            SessionPhase::Stopping => {
                if self.running {
                    runtime.end_session()?;
                    self.running = false;
                    info!("Session ended, input reads suspended");
                } else {
                    warn!("Session entered STOPPING without a running session");
                }
            }
            SessionPhase::Exiting | SessionPhase::LossPending => {
                self.exit_requested = true;
                info!("Session reached {}, shutdown requested", next);
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xr::mock::{MockRuntime, RuntimeCall};

    fn changes(phases: &[SessionPhase]) -> Vec<RuntimeEvent> {
        phases
            .iter()
            .map(|p| RuntimeEvent::SessionStateChanged(*p))
            .collect()
    }

    #[test]
    fn starts_unknown_and_idle_on_empty_queue() {
        let mut runtime = MockRuntime::new();
        let mut lifecycle = SessionLifecycle::new();

        let report = lifecycle.pump(&mut runtime).unwrap();

        assert_eq!(report.phase, SessionPhase::Unknown);
        assert!(!report.changed());
        assert!(!report.exit_requested);
    }

    #[test]
    fn activation_sequence_in_one_drain_ends_focused() {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut runtime = runtime;
        handle.push_events(changes(&[
            SessionPhase::Idle,
            SessionPhase::Ready,
            SessionPhase::Synchronized,
            SessionPhase::Visible,
            SessionPhase::Focused,
        ]));
        let mut lifecycle = SessionLifecycle::new();

        let report = lifecycle.pump(&mut runtime).unwrap();

        assert_eq!(report.phase, SessionPhase::Focused);
        assert_eq!(report.transitions.len(), 5);
        assert_eq!(lifecycle.begin_count(), 1);
        assert_eq!(handle.count(|c| *c == RuntimeCall::BeginSession), 1);
        assert!(lifecycle.is_running());
        assert!(lifecycle.is_focused());
    }

    #[test]
    fn stopping_ends_session() {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut runtime = runtime;
        let mut lifecycle = SessionLifecycle::new();
        handle.push_events(changes(&[SessionPhase::Ready, SessionPhase::Focused]));
        lifecycle.pump(&mut runtime).unwrap();

        handle.push_events(changes(&[SessionPhase::Visible, SessionPhase::Stopping]));
        let report = lifecycle.pump(&mut runtime).unwrap();

        assert_eq!(report.phase, SessionPhase::Stopping);
        assert!(!lifecycle.is_running());
        assert_eq!(handle.count(|c| *c == RuntimeCall::EndSession), 1);
    }

    #[test]
    fn ready_while_running_is_logged_not_retried() {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut runtime = runtime;
        let mut lifecycle = SessionLifecycle::new();
        handle.push_events(changes(&[SessionPhase::Ready, SessionPhase::Ready]));

        lifecycle.pump(&mut runtime).unwrap();

        assert_eq!(lifecycle.begin_count(), 1);
        assert_eq!(lifecycle.protocol_violations(), 1);
        assert_eq!(handle.count(|c| *c == RuntimeCall::BeginSession), 1);
    }

    #[test]
    fn session_can_begin_again_after_stop() {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut runtime = runtime;
        let mut lifecycle = SessionLifecycle::new();
        handle.push_events(changes(&[
            SessionPhase::Ready,
            SessionPhase::Stopping,
            SessionPhase::Idle,
            SessionPhase::Ready,
        ]));

        lifecycle.pump(&mut runtime).unwrap();

        assert_eq!(lifecycle.begin_count(), 2);
        assert_eq!(lifecycle.protocol_violations(), 0);
    }

    #[test]
    fn exiting_requests_shutdown() {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut runtime = runtime;
        let mut lifecycle = SessionLifecycle::new();
        handle.push_events(changes(&[SessionPhase::Idle, SessionPhase::Exiting]));

        let report = lifecycle.pump(&mut runtime).unwrap();

        assert!(report.exit_requested);
        assert!(report.phase.is_terminal());
    }

    #[test]
    fn instance_loss_requests_shutdown() {
        let runtime = MockRuntime::new();
        let handle = runtime.handle();
        let mut runtime = runtime;
        handle.push_events(vec![RuntimeEvent::EventsLost(3), RuntimeEvent::InstanceLossPending]);
        let mut lifecycle = SessionLifecycle::new();

        let report = lifecycle.pump(&mut runtime).unwrap();

        assert!(report.exit_requested);
        assert_eq!(report.phase, SessionPhase::Unknown);
    }

    #[test]
    fn failed_begin_is_propagated() {
        let runtime = MockRuntime::new().fail_begin();
        let handle = runtime.handle();
        let mut runtime = runtime;
        handle.push_events(changes(&[SessionPhase::Ready]));
        let mut lifecycle = SessionLifecycle::new();

        let err = lifecycle.pump(&mut runtime).unwrap_err();

        assert!(matches!(err, XrError::Transition { call: "begin", .. }));
        assert!(!lifecycle.is_running());
    }
}
