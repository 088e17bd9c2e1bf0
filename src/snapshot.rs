//! Per-frame output contract
//!
//! A [`Snapshot`] is rebuilt every tick and handed to sinks as a full
//! replacement. An [`Reading::Absent`] entry means the value could not be
//! resolved this frame; it never stands for zero.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::xr::types::{Hand, Pose, RuntimeTime, SessionPhase};

/// Level and edge of a boolean control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonReading {
    pub pressed: bool,
    /// The value differs from the one latched by the previous sync
    pub changed: bool,
}

impl ButtonReading {
    /// Rising edge: pressed now and not pressed at the previous sync
    pub fn just_pressed(&self) -> bool {
        self.pressed && self.changed
    }

    pub fn just_released(&self) -> bool {
        !self.pressed && self.changed
    }
}

/// Resolved value of one control
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Pose(Pose),
    Boolean(ButtonReading),
    Scalar(f32),
    Vector2([f32; 2]),
    Absent,
}

impl Reading {
    pub fn is_absent(&self) -> bool {
        matches!(self, Reading::Absent)
    }

    pub fn as_pose(&self) -> Option<&Pose> {
        match self {
            Reading::Pose(pose) => Some(pose),
            _ => None,
        }
    }

    pub fn as_button(&self) -> Option<ButtonReading> {
        match self {
            Reading::Boolean(button) => Some(*button),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Reading::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_vector2(&self) -> Option<[f32; 2]> {
        match self {
            Reading::Vector2(value) => Some(*value),
            _ => None,
        }
    }
}

/// Everything resolved in one tick plus the lifecycle metadata of that tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub frame: u64,
    pub phase: SessionPhase,
    pub captured_at: DateTime<Local>,
    /// Runtime time used to locate the poses, if one was obtained
    pub sample_time: Option<RuntimeTime>,
    pub entries: BTreeMap<String, Reading>,
}

impl Snapshot {
    /// Snapshot carrying lifecycle metadata only
    pub fn metadata_only(frame: u64, phase: SessionPhase) -> Self {
        Self {
            frame,
            phase,
            captured_at: Local::now(),
            sample_time: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, reading: Reading) {
        self.entries.insert(key.into(), reading);
    }

    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn pose_key(hand: Hand) -> String {
        format!("pose_{}", hand.suffix())
    }

    pub fn pose(&self, hand: Hand) -> Option<&Pose> {
        self.entries
            .get(&Self::pose_key(hand))
            .and_then(Reading::as_pose)
    }

    pub fn absent_count(&self) -> usize {
        self.entries.values().filter(|r| r.is_absent()).count()
    }

    /// Keys of buttons with a rising edge this tick
    pub fn pressed_this_tick(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, r)| r.as_button().is_some_and(|b| b.just_pressed()))
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_button_counts_as_one_press() {
        let reads = [
            ButtonReading { pressed: true, changed: true },
            ButtonReading { pressed: true, changed: false },
            ButtonReading { pressed: true, changed: false },
        ];

        let presses = reads.iter().filter(|r| r.just_pressed()).count();

        assert_eq!(presses, 1);
        assert!(reads[0].just_pressed());
        assert!(!reads[1].just_pressed());
        assert!(!reads[2].just_pressed());
    }

    #[test]
    fn release_edge_is_not_a_press() {
        let release = ButtonReading { pressed: false, changed: true };
        assert!(release.just_released());
        assert!(!release.just_pressed());
    }

    #[test]
    fn metadata_only_snapshot_has_no_entries() {
        let snapshot = Snapshot::metadata_only(7, SessionPhase::Idle);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.frame, 7);
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(snapshot.pose(Hand::Left).is_none());
    }

    #[test]
    fn pressed_this_tick_lists_rising_edges() {
        let mut snapshot = Snapshot::metadata_only(1, SessionPhase::Focused);
        snapshot.insert("a_click", Reading::Boolean(ButtonReading { pressed: true, changed: true }));
        snapshot.insert("b_click", Reading::Boolean(ButtonReading { pressed: true, changed: false }));
        snapshot.insert("trigger_left", Reading::Scalar(0.4));
        snapshot.insert("menu", Reading::Absent);

        assert_eq!(snapshot.pressed_this_tick(), vec!["a_click"]);
        assert_eq!(snapshot.absent_count(), 1);
    }

    #[test]
    fn absent_serializes_as_null() {
        let mut snapshot = Snapshot::metadata_only(3, SessionPhase::Focused);
        snapshot.insert("grip_left", Reading::Absent);
        snapshot.insert("thumbstick_right", Reading::Vector2([0.25, -1.0]));

        let json = serde_json::to_value(&snapshot).unwrap();

        assert!(json["entries"]["grip_left"].is_null());
        assert_eq!(json["entries"]["thumbstick_right"][1], -1.0);
        assert_eq!(json["phase"], "focused");
    }
}
