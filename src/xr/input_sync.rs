//! Per-frame sync, locate and read
//!
//! One generic routine walks the bound action table and resolves every entry.
//! A failure is contained to the entry it belongs to.

use tracing::{debug, error, warn};

use super::actions::{ActionKind, BoundAction, BoundActions, Handedness};
use super::error::XrError;
use super::runtime::XrRuntime;
use super::time_bridge::TimeBridge;
use super::types::{ActionState, Hand, SessionPhase};
use crate::snapshot::{ButtonReading, Reading, Snapshot};

/// Resolves bound actions into snapshots while the session is focused
pub struct InputSyncEngine {
    bound: BoundActions,
}

impl InputSyncEngine {
    pub fn new(bound: BoundActions) -> Self {
        Self { bound }
    }

    pub fn bound(&self) -> &BoundActions {
        &self.bound
    }

    /// Runs sync, then locate, then every state query, and returns a fresh snapshot
    pub fn tick(
        &self,
        runtime: &mut dyn XrRuntime,
        clock: &mut TimeBridge,
        frame: u64,
    ) -> Snapshot {
        let mut snapshot = Snapshot::metadata_only(frame, SessionPhase::Focused);

        if let Err(e) = runtime.sync_actions(&[self.bound.action_set]) {
            warn!("Action sync failed, frame {} published without input: {}", frame, e);
            self.fill_absent(&mut snapshot);
            return snapshot;
        }

        self.resolve_poses(runtime, clock, &mut snapshot);

        for action in self.bound.input_actions() {
            match action.descriptor.handedness {
                Handedness::PerHand => {
                    for hand in Hand::BOTH {
                        let reading = read_action(runtime, action, Some(hand));
                        snapshot.insert(action.descriptor.key(Some(hand)), reading);
                    }
                }
                Handedness::Single => {
                    let reading = read_action(runtime, action, None);
                    snapshot.insert(action.descriptor.key(None), reading);
                }
            }
        }

        snapshot
    }

    fn resolve_poses(
        &self,
        runtime: &mut dyn XrRuntime,
        clock: &mut TimeBridge,
        snapshot: &mut Snapshot,
    ) {
        let time = match clock.now() {
            Ok(time) => time,
            Err(e) => {
                error!("Cannot locate controllers without a runtime time: {}", e);
                for hand in Hand::BOTH {
                    snapshot.insert(Snapshot::pose_key(hand), Reading::Absent);
                }
                return;
            }
        };
        snapshot.sample_time = Some(time);

        for hand in Hand::BOTH {
            let space = self.bound.hand_space(hand);
            let reading = match runtime.locate_space(space, self.bound.reference_space, time) {
                Ok(location) if location.position_valid => Reading::Pose(location.pose),
                Ok(_) => {
                    debug!("No valid {} controller position this frame", hand);
                    Reading::Absent
                }
                Err(e) => {
                    debug!("{}", e);
                    Reading::Absent
                }
            };
            snapshot.insert(Snapshot::pose_key(hand), reading);
        }
    }

    fn fill_absent(&self, snapshot: &mut Snapshot) {
        for hand in Hand::BOTH {
            snapshot.insert(Snapshot::pose_key(hand), Reading::Absent);
        }
        for action in self.bound.input_actions() {
            match action.descriptor.handedness {
                Handedness::PerHand => {
                    for hand in Hand::BOTH {
                        snapshot.insert(action.descriptor.key(Some(hand)), Reading::Absent);
                    }
                }
                Handedness::Single => snapshot.insert(action.descriptor.key(None), Reading::Absent),
            }
        }
    }
}

/// Queries one action for one sub-action path. Errors and inactive actions read as absent.
fn read_action(runtime: &mut dyn XrRuntime, action: &BoundAction, hand: Option<Hand>) -> Reading {
    let result = match action.descriptor.kind {
        ActionKind::Boolean => runtime.boolean_state(action.id, hand).map(|s| {
            active_or_absent(s, |state| {
                Reading::Boolean(ButtonReading {
                    pressed: state.current,
                    changed: state.changed_since_last_sync,
                })
            })
        }),
        ActionKind::Scalar => runtime
            .scalar_state(action.id, hand)
            .map(|s| active_or_absent(s, |state| Reading::Scalar(state.current))),
        ActionKind::Vector2 => runtime
            .vector2_state(action.id, hand)
            .map(|s| active_or_absent(s, |state| Reading::Vector2(state.current))),
        ActionKind::Pose => Err(XrError::Query {
            control: action.descriptor.name.to_string(),
            reason: "pose actions are located, not queried".to_string(),
        }),
    };

    result.unwrap_or_else(|e| {
        debug!("{} read as absent: {}", action.descriptor.key(hand), e);
        Reading::Absent
    })
}

fn active_or_absent<T: Copy>(
    state: ActionState<T>,
    convert: impl FnOnce(ActionState<T>) -> Reading,
) -> Reading {
    if state.is_active {
        convert(state)
    } else {
        Reading::Absent
    }
}
