//! Action declarations and the binder that registers them with a session
//!
//! Controls are described once in [`TOUCH_CONTROLS`]. Physical paths live in
//! per-profile tables so that one descriptor can be suggested under several
//! interaction profiles. The binder turns both into runtime handles:
//!
//! ```text
//! descriptors ──► action set + actions ──► profile suggestions ──► attach ──► spaces
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::XrError;
use super::runtime::{ActionId, ActionSetId, ReferenceSpaceKind, SpaceId, SuggestedBinding, XrRuntime};
use super::types::Hand;

/// Semantic type of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Pose,
    Boolean,
    Scalar,
    Vector2,
}

/// Whether an action is read per hand through sub-action paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handedness {
    PerHand,
    Single,
}

/// One logical control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub name: &'static str,
    pub localized_name: &'static str,
    pub kind: ActionKind,
    pub handedness: Handedness,
}

impl ActionDescriptor {
    pub const fn per_hand(name: &'static str, localized_name: &'static str, kind: ActionKind) -> Self {
        Self {
            name,
            localized_name,
            kind,
            handedness: Handedness::PerHand,
        }
    }

    pub const fn single(name: &'static str, localized_name: &'static str, kind: ActionKind) -> Self {
        Self {
            name,
            localized_name,
            kind,
            handedness: Handedness::Single,
        }
    }

    /// Hands passed as sub-action paths on creation
    pub fn sub_action_hands(&self) -> &'static [Hand] {
        match self.handedness {
            Handedness::PerHand => &Hand::BOTH,
            Handedness::Single => &[],
        }
    }

    /// Snapshot key for this control, hand qualified when per hand
    pub fn key(&self, hand: Option<Hand>) -> String {
        match hand {
            Some(hand) => format!("{}_{}", self.name, hand.suffix()),
            None => self.name.to_string(),
        }
    }
}

pub const POSE_ACTION: &str = "pose";

/// Controls of a touch-style controller pair
pub const TOUCH_CONTROLS: &[ActionDescriptor] = &[
    ActionDescriptor::single("a_click", "A Click", ActionKind::Boolean),
    ActionDescriptor::single("a_touch", "A Touch", ActionKind::Boolean),
    ActionDescriptor::single("b_click", "B Click", ActionKind::Boolean),
    ActionDescriptor::single("b_touch", "B Touch", ActionKind::Boolean),
    ActionDescriptor::single("x_click", "X Click", ActionKind::Boolean),
    ActionDescriptor::single("x_touch", "X Touch", ActionKind::Boolean),
    ActionDescriptor::single("y_click", "Y Click", ActionKind::Boolean),
    ActionDescriptor::single("y_touch", "Y Touch", ActionKind::Boolean),
    ActionDescriptor::per_hand("trigger", "Trigger", ActionKind::Scalar),
    ActionDescriptor::per_hand("trigger_touch", "Trigger Touch", ActionKind::Boolean),
    ActionDescriptor::per_hand("grip", "Grip", ActionKind::Scalar),
    ActionDescriptor::per_hand("thumbstick", "Thumbstick", ActionKind::Vector2),
    ActionDescriptor::per_hand("thumbstick_click", "Thumbstick Click", ActionKind::Boolean),
    ActionDescriptor::per_hand("thumbstick_touch", "Thumbstick Touch", ActionKind::Boolean),
    ActionDescriptor::single("menu", "Menu", ActionKind::Boolean),
    ActionDescriptor::single("system", "System", ActionKind::Boolean),
    ActionDescriptor::per_hand(POSE_ACTION, "Controller Pose", ActionKind::Pose),
];

/// Physical paths suggested for one action under one profile
#[derive(Debug, Clone, Copy)]
pub struct ProfileBinding {
    pub action: &'static str,
    pub paths: &'static [&'static str],
}

/// Named hardware-family binding namespace
#[derive(Debug, Clone, Copy)]
pub struct InteractionProfile {
    pub path: &'static str,
    pub bindings: &'static [ProfileBinding],
}

impl InteractionProfile {
    pub fn suggestion_count(&self) -> usize {
        self.bindings.iter().map(|b| b.paths.len()).sum()
    }
}

const fn bind(action: &'static str, paths: &'static [&'static str]) -> ProfileBinding {
    ProfileBinding { action, paths }
}

pub const OCULUS_TOUCH: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/oculus/touch_controller",
    bindings: &[
        bind("a_click", &["/user/hand/right/input/a/click"]),
        bind("a_touch", &["/user/hand/right/input/a/touch"]),
        bind("b_click", &["/user/hand/right/input/b/click"]),
        bind("b_touch", &["/user/hand/right/input/b/touch"]),
        bind("x_click", &["/user/hand/left/input/x/click"]),
        bind("x_touch", &["/user/hand/left/input/x/touch"]),
        bind("y_click", &["/user/hand/left/input/y/click"]),
        bind("y_touch", &["/user/hand/left/input/y/touch"]),
        bind(
            "trigger",
            &[
                "/user/hand/left/input/trigger/value",
                "/user/hand/right/input/trigger/value",
            ],
        ),
        bind(
            "trigger_touch",
            &[
                "/user/hand/left/input/trigger/touch",
                "/user/hand/right/input/trigger/touch",
            ],
        ),
        bind(
            "grip",
            &[
                "/user/hand/left/input/squeeze/value",
                "/user/hand/right/input/squeeze/value",
            ],
        ),
        bind(
            "thumbstick",
            &[
                "/user/hand/left/input/thumbstick",
                "/user/hand/right/input/thumbstick",
            ],
        ),
        bind(
            "thumbstick_click",
            &[
                "/user/hand/left/input/thumbstick/click",
                "/user/hand/right/input/thumbstick/click",
            ],
        ),
        bind(
            "thumbstick_touch",
            &[
                "/user/hand/left/input/thumbstick/touch",
                "/user/hand/right/input/thumbstick/touch",
            ],
        ),
        bind("menu", &["/user/hand/left/input/menu/click"]),
        bind("system", &["/user/hand/right/input/system/click"]),
        bind(
            POSE_ACTION,
            &[
                "/user/hand/left/input/grip/pose",
                "/user/hand/right/input/grip/pose",
            ],
        ),
    ],
};

/// Generic fallback understood by every conformant runtime
pub const KHR_SIMPLE: InteractionProfile = InteractionProfile {
    path: "/interaction_profiles/khr/simple_controller",
    bindings: &[
        bind("x_click", &["/user/hand/left/input/select/click"]),
        bind("a_click", &["/user/hand/right/input/select/click"]),
        bind("menu", &["/user/hand/left/input/menu/click"]),
        bind(
            POSE_ACTION,
            &[
                "/user/hand/left/input/grip/pose",
                "/user/hand/right/input/grip/pose",
            ],
        ),
    ],
};

/// Profile selector used in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    OculusTouch,
    KhrSimple,
}

impl ProfileKind {
    pub fn profile(self) -> &'static InteractionProfile {
        match self {
            ProfileKind::OculusTouch => &OCULUS_TOUCH,
            ProfileKind::KhrSimple => &KHR_SIMPLE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindingSettings {
    pub action_set_name: String,
    pub localized_action_set_name: String,
    pub priority: u32,
    pub profiles: Vec<ProfileKind>,
    pub reference_space: ReferenceSpaceKind,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            action_set_name: "controller_set".to_string(),
            localized_action_set_name: "Controller Set".to_string(),
            priority: 0,
            profiles: vec![ProfileKind::OculusTouch],
            reference_space: ReferenceSpaceKind::Stage,
        }
    }
}

/// A created action together with its descriptor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundAction {
    pub descriptor: ActionDescriptor,
    pub id: ActionId,
}

/// Outcome of the fire-and-forget suggestion pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingReport {
    pub accepted: Vec<&'static str>,
    pub rejected: Vec<(&'static str, XrError)>,
}

impl BindingReport {
    pub fn any_accepted(&self) -> bool {
        !self.accepted.is_empty()
    }
}

/// Handles produced by [`ActionBinder::bind`]
#[derive(Debug, Clone, PartialEq)]
pub struct BoundActions {
    pub action_set: ActionSetId,
    pub actions: Vec<BoundAction>,
    pub pose: BoundAction,
    /// Pose spaces, index 0 left and index 1 right
    pub hand_spaces: [SpaceId; 2],
    pub reference_space: SpaceId,
    pub report: BindingReport,
}

impl BoundActions {
    pub fn hand_space(&self, hand: Hand) -> SpaceId {
        self.hand_spaces[hand.index()]
    }

    /// Every action except the pose action, in declaration order
    pub fn input_actions(&self) -> impl Iterator<Item = &BoundAction> {
        self.actions
            .iter()
            .filter(|a| a.descriptor.kind != ActionKind::Pose)
    }
}

/// Declares actions, suggests bindings and attaches the action set
pub struct ActionBinder {
    controls: &'static [ActionDescriptor],
    attached: bool,
}

impl ActionBinder {
    pub fn new(controls: &'static [ActionDescriptor]) -> Self {
        Self {
            controls,
            attached: false,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Runs the full binding sequence against a live session
    ///
    /// Action set, action, attach and space failures are fatal. Rejected
    /// profile suggestions are logged and recorded in the report.
    pub fn bind(
        &mut self,
        runtime: &mut dyn XrRuntime,
        settings: &BindingSettings,
    ) -> Result<BoundActions, XrError> {
        info!(
            "Creating action set '{}' with {} controls",
            settings.action_set_name,
            self.controls.len()
        );
        let action_set = runtime.create_action_set(
            &settings.action_set_name,
            &settings.localized_action_set_name,
            settings.priority,
        )?;

        let mut actions = Vec::with_capacity(self.controls.len());
        for descriptor in self.controls {
            let id = runtime.create_action(action_set, descriptor)?;
            debug!("Created {:?} action '{}'", descriptor.kind, descriptor.name);
            actions.push(BoundAction {
                descriptor: *descriptor,
                id,
            });
        }

        let pose = actions
            .iter()
            .copied()
            .find(|a| a.descriptor.kind == ActionKind::Pose)
            .ok_or_else(|| XrError::ActionSetup {
                target: "pose".to_string(),
                reason: "no pose control declared".to_string(),
            })?;

        let report = self.suggest(runtime, &actions, &settings.profiles);
        if !report.any_accepted() {
            error!("No interaction profile accepted the suggested bindings, controller input will stay inactive");
        }

        self.attach(runtime, action_set)?;

        let hand_spaces = [
            runtime.create_action_space(pose.id, Hand::Left)?,
            runtime.create_action_space(pose.id, Hand::Right)?,
        ];
        let reference_space = runtime.create_reference_space(settings.reference_space)?;
        info!(
            "Action spaces ready, poses resolved against {:?} space",
            settings.reference_space
        );

        Ok(BoundActions {
            action_set,
            actions,
            pose,
            hand_spaces,
            reference_space,
            report,
        })
    }

    /// Submits one suggestion per profile. A rejected profile never aborts the rest.
    pub fn suggest(
        &self,
        runtime: &mut dyn XrRuntime,
        actions: &[BoundAction],
        profiles: &[ProfileKind],
    ) -> BindingReport {
        let mut report = BindingReport::default();

        for kind in profiles {
            let profile = kind.profile();
            let bindings = suggestions_for(profile, actions);
            if bindings.is_empty() {
                warn!("Profile {} has no bindings for the declared controls", profile.path);
                continue;
            }

            match runtime.suggest_bindings(profile.path, &bindings) {
                Ok(()) => {
                    info!(
                        "Suggested {} bindings for {}",
                        bindings.len(),
                        profile.path
                    );
                    report.accepted.push(profile.path);
                }
                Err(e) => {
                    warn!("Binding suggestion for {} rejected: {}", profile.path, e);
                    report.rejected.push((profile.path, e));
                }
            }
        }

        report
    }

    /// Attaches the action set. Attaching twice is a programming error.
    pub fn attach(
        &mut self,
        runtime: &mut dyn XrRuntime,
        action_set: ActionSetId,
    ) -> Result<(), XrError> {
        if self.attached {
            error!("Action set attach requested twice, attachment is permanent per session");
            return Err(XrError::ProtocolViolation(
                "action set already attached to this session".to_string(),
            ));
        }

        runtime.attach_action_sets(&[action_set])?;
        self.attached = true;
        info!("Action set attached to session");
        Ok(())
    }
}

/// Flattens a profile table into (action, path) pairs for the created actions
fn suggestions_for(profile: &InteractionProfile, actions: &[BoundAction]) -> Vec<SuggestedBinding> {
    let mut bindings = Vec::with_capacity(profile.suggestion_count());

    for entry in profile.bindings {
        match actions.iter().find(|a| a.descriptor.name == entry.action) {
            Some(action) => {
                bindings.extend(entry.paths.iter().map(|path| SuggestedBinding {
                    action: action.id,
                    path: (*path).to_string(),
                }));
            }
            None => debug!(
                "Skipping {} binding for undeclared action '{}'",
                profile.path, entry.action
            ),
        }
    }

    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xr::mock::{MockRuntime, RuntimeCall};

    #[test]
    fn touch_table_covers_every_control() {
        for descriptor in TOUCH_CONTROLS {
            let entry = OCULUS_TOUCH
                .bindings
                .iter()
                .find(|b| b.action == descriptor.name)
                .unwrap_or_else(|| panic!("{} has no touch binding", descriptor.name));
            let expected = match descriptor.handedness {
                Handedness::PerHand => 2,
                Handedness::Single => 1,
            };
            assert_eq!(entry.paths.len(), expected, "{}", descriptor.name);
        }
    }

    #[test]
    fn touch_paths_are_exact() {
        let all: Vec<&str> = OCULUS_TOUCH
            .bindings
            .iter()
            .flat_map(|b| b.paths.iter().copied())
            .collect();
        assert!(all.contains(&"/user/hand/right/input/a/click"));
        assert!(all.contains(&"/user/hand/left/input/trigger/value"));
        assert!(all.contains(&"/user/hand/right/input/thumbstick"));
        assert!(all.contains(&"/user/hand/left/input/grip/pose"));
        assert!(all.contains(&"/user/hand/left/input/menu/click"));
        assert!(all.contains(&"/user/hand/right/input/system/click"));
        assert_eq!(all.len(), OCULUS_TOUCH.suggestion_count());
    }

    #[test]
    fn bind_creates_spaces_left_then_right() {
        let runtime = MockRuntime::new();
        let log = runtime.handle();
        let mut runtime = runtime;
        let mut binder = ActionBinder::new(TOUCH_CONTROLS);

        let bound = binder.bind(&mut runtime, &BindingSettings::default()).unwrap();

        assert!(binder.is_attached());
        assert_eq!(bound.actions.len(), TOUCH_CONTROLS.len());
        assert_eq!(bound.pose.descriptor.name, POSE_ACTION);
        assert_eq!(bound.input_actions().count(), TOUCH_CONTROLS.len() - 1);

        let calls = log.calls();
        let spaces: Vec<&RuntimeCall> = calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::CreateActionSpace(_)))
            .collect();
        assert_eq!(
            spaces,
            vec![
                &RuntimeCall::CreateActionSpace(Hand::Left),
                &RuntimeCall::CreateActionSpace(Hand::Right)
            ]
        );
        assert_eq!(
            calls
                .iter()
                .filter(|c| matches!(c, RuntimeCall::AttachActionSets))
                .count(),
            1
        );
    }

    #[test]
    fn rejected_profile_does_not_block_attach() {
        let runtime = MockRuntime::new().reject_profile(KHR_SIMPLE.path);
        let log = runtime.handle();
        let mut runtime = runtime;
        let mut binder = ActionBinder::new(TOUCH_CONTROLS);
        let settings = BindingSettings {
            profiles: vec![ProfileKind::KhrSimple, ProfileKind::OculusTouch],
            ..BindingSettings::default()
        };

        let bound = binder.bind(&mut runtime, &settings).unwrap();

        assert_eq!(bound.report.accepted, vec![OCULUS_TOUCH.path]);
        assert_eq!(bound.report.rejected.len(), 1);
        assert_eq!(bound.report.rejected[0].0, KHR_SIMPLE.path);
        assert!(log
            .calls()
            .contains(&RuntimeCall::AttachActionSets));
    }

    #[test]
    fn second_attach_is_a_protocol_violation() {
        let mut runtime = MockRuntime::new();
        let mut binder = ActionBinder::new(TOUCH_CONTROLS);
        let bound = binder.bind(&mut runtime, &BindingSettings::default()).unwrap();

        let err = binder.attach(&mut runtime, bound.action_set).unwrap_err();

        assert!(matches!(err, XrError::ProtocolViolation(_)));
    }

    #[test]
    fn failed_action_set_creation_is_fatal() {
        let mut runtime = MockRuntime::new().fail_action_set_creation();
        let mut binder = ActionBinder::new(TOUCH_CONTROLS);

        let err = binder
            .bind(&mut runtime, &BindingSettings::default())
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(!binder.is_attached());
    }

    #[test]
    fn keys_are_hand_qualified_for_per_hand_controls() {
        let trigger = ActionDescriptor::per_hand("trigger", "Trigger", ActionKind::Scalar);
        assert_eq!(trigger.key(Some(Hand::Left)), "trigger_left");
        assert_eq!(trigger.key(Some(Hand::Right)), "trigger_right");
        assert_eq!(trigger.sub_action_hands(), &[Hand::Left, Hand::Right]);

        let menu = ActionDescriptor::single("menu", "Menu", ActionKind::Boolean);
        assert_eq!(menu.key(None), "menu");
        assert!(menu.sub_action_hands().is_empty());
    }
}
