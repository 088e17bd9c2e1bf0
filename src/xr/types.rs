use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller hand. Index 0 is left, index 1 is right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub const BOTH: [Hand; 2] = [Hand::Left, Hand::Right];

    pub fn index(self) -> usize {
        match self {
            Hand::Left => 0,
            Hand::Right => 1,
        }
    }

    /// Top-level user path used as sub-action path
    pub fn user_path(self) -> &'static str {
        match self {
            Hand::Left => "/user/hand/left",
            Hand::Right => "/user/hand/right",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            Hand::Left => "left",
            Hand::Right => "right",
        }
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Runtime time in nanoseconds on the runtime's own monotonic clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuntimeTime(pub i64);

impl RuntimeTime {
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

/// Rigid pose: position in meters and a unit orientation quaternion (x, y, z, w)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: [f32; 3],
    pub orientation: [f32; 4],
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: [0.0, 0.0, 0.0],
        orientation: [0.0, 0.0, 0.0, 1.0],
    };
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Result of locating a space. Validity travels next to the pose, not inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceLocation {
    pub pose: Pose,
    pub position_valid: bool,
    pub orientation_valid: bool,
    pub position_tracked: bool,
}

/// State of a typed action after the last sync
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionState<T> {
    pub current: T,
    pub changed_since_last_sync: bool,
    pub is_active: bool,
}

/// Session phase as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionPhase {
    /// Phases after which the driver must shut down
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Exiting | SessionPhase::LossPending)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Unknown => "UNKNOWN",
            SessionPhase::Idle => "IDLE",
            SessionPhase::Ready => "READY",
            SessionPhase::Synchronized => "SYNCHRONIZED",
            SessionPhase::Visible => "VISIBLE",
            SessionPhase::Focused => "FOCUSED",
            SessionPhase::Stopping => "STOPPING",
            SessionPhase::LossPending => "LOSS_PENDING",
            SessionPhase::Exiting => "EXITING",
        };
        f.write_str(name)
    }
}

/// Notification drained from the runtime event queue
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    SessionStateChanged(SessionPhase),
    InstanceLossPending,
    EventsLost(u32),
    Other,
}
