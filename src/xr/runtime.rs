//! Seam between the driver and the native XR runtime
//!
//! Every call the driver makes into the runtime goes through [`XrRuntime`].
//! Handles are small typed indices owned by the implementation, so the core
//! never touches native objects directly and can be driven by the scripted
//! [`crate::xr::mock::MockRuntime`] in tests.

use serde::{Deserialize, Serialize};

use super::actions::ActionDescriptor;
use super::error::XrError;
use super::types::{ActionState, Hand, RuntimeEvent, RuntimeTime, SpaceLocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionSetId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub usize);

/// World anchor the controller poses are expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpaceKind {
    #[default]
    Stage,
    Local,
}

/// One (action, physical input path) pair inside a profile suggestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestedBinding {
    pub action: ActionId,
    pub path: String,
}

/// Host clock converted into runtime time
///
/// Implementations resolve their conversion entry point once on creation and
/// reuse it for every read.
pub trait ClockSource: Send {
    fn read(&mut self) -> Result<RuntimeTime, XrError>;

    /// Short name of the conversion path, for logs
    fn name(&self) -> &'static str;
}

/// Lifecycle, action and query surface of an XR runtime with one session
pub trait XrRuntime: Send {
    /// Name and version of the runtime, for logs
    fn describe(&self) -> String;

    /// Pops one pending notification, `None` when the queue is empty
    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError>;

    /// Starts the session with a mono primary view configuration
    fn begin_session(&mut self) -> Result<(), XrError>;

    fn end_session(&mut self) -> Result<(), XrError>;

    /// Resolves the host-to-runtime time conversion for this platform
    fn clock_source(&self) -> Result<Box<dyn ClockSource>, XrError>;

    fn create_action_set(
        &mut self,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> Result<ActionSetId, XrError>;

    fn create_action(
        &mut self,
        set: ActionSetId,
        descriptor: &ActionDescriptor,
    ) -> Result<ActionId, XrError>;

    fn suggest_bindings(
        &mut self,
        profile: &str,
        bindings: &[SuggestedBinding],
    ) -> Result<(), XrError>;

    fn attach_action_sets(&mut self, sets: &[ActionSetId]) -> Result<(), XrError>;

    fn create_action_space(&mut self, action: ActionId, hand: Hand) -> Result<SpaceId, XrError>;

    fn create_reference_space(&mut self, kind: ReferenceSpaceKind) -> Result<SpaceId, XrError>;

    /// Latches current device input into every action of the given sets
    fn sync_actions(&mut self, active: &[ActionSetId]) -> Result<(), XrError>;

    fn locate_space(
        &mut self,
        space: SpaceId,
        base: SpaceId,
        time: RuntimeTime,
    ) -> Result<SpaceLocation, XrError>;

    fn boolean_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<bool>, XrError>;

    fn scalar_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<f32>, XrError>;

    fn vector2_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<[f32; 2]>, XrError>;

    /// Releases the session and every handle derived from it
    fn destroy_session(&mut self);

    fn destroy_instance(&mut self);
}
