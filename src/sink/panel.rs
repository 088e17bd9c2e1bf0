//! Headless status panel
//!
//! Periodically renders the latest snapshot as a key/value table into the log.

use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::snapshot::{Reading, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

fn format_reading(reading: &Reading) -> String {
    match reading {
        Reading::Pose(pose) => format!(
            "pos ({:+.3}, {:+.3}, {:+.3}) rot ({:+.3}, {:+.3}, {:+.3}, {:+.3})",
            pose.position[0],
            pose.position[1],
            pose.position[2],
            pose.orientation[0],
            pose.orientation[1],
            pose.orientation[2],
            pose.orientation[3]
        ),
        Reading::Boolean(button) if button.just_pressed() => "pressed (edge)".to_string(),
        Reading::Boolean(button) if button.pressed => "pressed".to_string(),
        Reading::Boolean(_) => "released".to_string(),
        Reading::Scalar(value) => format!("{:.3}", value),
        Reading::Vector2(value) => format!("({:+.3}, {:+.3})", value[0], value[1]),
        Reading::Absent => "-".to_string(),
    }
}

/// Renders the snapshot as an aligned table, one control per line
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = format!(
        "frame {} | {} | {}",
        snapshot.frame,
        snapshot.phase,
        snapshot.captured_at.format("%H:%M:%S%.3f")
    );
    if snapshot.is_empty() {
        out.push_str("\n  (no input, session not focused)");
        return out;
    }

    let width = snapshot.entries.keys().map(String::len).max().unwrap_or(0);
    for (key, reading) in &snapshot.entries {
        let _ = write!(out, "\n  {:<width$}  {}", key, format_reading(reading), width = width);
    }
    out
}

pub struct PanelHandle {
    task: JoinHandle<()>,
}

impl PanelHandle {
    /// Spawns the render loop on the current tokio runtime
    pub fn spawn(
        settings: PanelSettings,
        receiver: watch::Receiver<Snapshot>,
        cancel: CancellationToken,
    ) -> Self {
        info!("Starting status panel every {} ms", settings.interval_ms);
        let task = tokio::spawn(run_panel(settings, receiver, cancel));
        Self { task }
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            debug!("Panel task ended abnormally: {}", e);
        }
    }
}

async fn run_panel(
    settings: PanelSettings,
    mut receiver: watch::Receiver<Snapshot>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(settings.interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        match receiver.has_changed() {
            Ok(true) => {
                let table = render(&receiver.borrow_and_update());
                info!("\n{}", table);
            }
            Ok(false) => debug!("No new snapshot since last render"),
            Err(_) => {
                debug!("Snapshot channel closed, stopping panel");
                break;
            }
        }
    }
    debug!("Status panel stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ButtonReading;
    use crate::xr::types::{Pose, SessionPhase};

    #[test]
    fn renders_every_entry() {
        let mut snapshot = Snapshot::metadata_only(12, SessionPhase::Focused);
        snapshot.insert("pose_left", Reading::Pose(Pose::IDENTITY));
        snapshot.insert("a_click", Reading::Boolean(ButtonReading { pressed: true, changed: true }));
        snapshot.insert("grip_right", Reading::Absent);

        let table = render(&snapshot);

        assert!(table.starts_with("frame 12 | FOCUSED"));
        assert!(table.contains("pressed (edge)"));
        assert!(table.lines().any(|l| l.contains("grip_right") && l.ends_with('-')));
        assert_eq!(table.lines().count(), 4);
    }

    #[test]
    fn unfocused_snapshot_renders_placeholder() {
        let table = render(&Snapshot::metadata_only(1, SessionPhase::Idle));
        assert!(table.contains("not focused"));
    }

    #[tokio::test]
    async fn panel_stops_on_cancel() {
        let (_sender, receiver) = watch::channel(Snapshot::metadata_only(0, SessionPhase::Unknown));
        let cancel = CancellationToken::new();
        let panel = PanelHandle::spawn(
            PanelSettings {
                enabled: true,
                interval_ms: 5,
            },
            receiver,
            cancel.clone(),
        );

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), panel.join())
            .await
            .unwrap();
    }
}
