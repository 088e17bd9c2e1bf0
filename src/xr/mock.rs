//! Scripted runtime for tests
//!
//! [`MockRuntime`] records every call it receives and replays queued events.
//! Control values, pose locations and failures are set through a cloneable
//! [`MockHandle`], which stays usable after the runtime has been moved into a
//! driver.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::actions::{ActionDescriptor, Handedness};
use super::error::XrError;
use super::runtime::{
    ActionId, ActionSetId, ClockSource, ReferenceSpaceKind, SpaceId, SuggestedBinding, XrRuntime,
};
use super::types::{ActionState, Hand, Pose, RuntimeEvent, RuntimeTime, SpaceLocation};

/// Call observed by the mock, in order
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    CreateActionSet(String),
    CreateAction(String),
    SuggestBindings { profile: String, count: usize },
    AttachActionSets,
    CreateActionSpace(Hand),
    CreateReferenceSpace(ReferenceSpaceKind),
    BeginSession,
    EndSession,
    SyncActions,
    Locate { hand: Hand, time: RuntimeTime },
    Query { control: String, hand: Option<Hand> },
    /// The clock handed out by `clock_source` was dropped
    ReleaseClock,
    DestroySession,
    DestroyInstance,
}

type ControlKey = (String, Option<Hand>);

#[derive(Default)]
struct MockState {
    calls: Vec<RuntimeCall>,
    events: VecDeque<RuntimeEvent>,
    poll_failures: VecDeque<XrError>,
    actions: Vec<ActionDescriptor>,
    spaces: Vec<Option<Hand>>,
    locations: HashMap<Hand, SpaceLocation>,
    booleans: HashMap<ControlKey, ActionState<bool>>,
    scalars: HashMap<ControlKey, ActionState<f32>>,
    vectors: HashMap<ControlKey, ActionState<[f32; 2]>>,
    inactive: HashSet<ControlKey>,
    failing_queries: HashSet<ControlKey>,
    rejected_profiles: HashSet<String>,
    fail_action_set: bool,
    fail_begin: bool,
    fail_sync: bool,
    attached: bool,
    running: bool,
    session_alive: bool,
    instance_alive: bool,
}

/// Shared view into a [`MockRuntime`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_events(&self, events: impl IntoIterator<Item = RuntimeEvent>) {
        self.lock().events.extend(events);
    }

    /// The next event poll fails with `error` instead of returning an event
    pub fn fail_poll(&self, error: XrError) {
        self.lock().poll_failures.push_back(error);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn set_location(&self, hand: Hand, location: SpaceLocation) {
        self.lock().locations.insert(hand, location);
    }

    pub fn set_button(&self, control: &str, hand: Option<Hand>, pressed: bool, changed: bool) {
        self.lock().booleans.insert(
            (control.to_string(), hand),
            ActionState {
                current: pressed,
                changed_since_last_sync: changed,
                is_active: true,
            },
        );
    }

    pub fn set_scalar(&self, control: &str, hand: Option<Hand>, value: f32) {
        self.lock().scalars.insert(
            (control.to_string(), hand),
            ActionState {
                current: value,
                changed_since_last_sync: true,
                is_active: true,
            },
        );
    }

    pub fn set_vector2(&self, control: &str, hand: Option<Hand>, value: [f32; 2]) {
        self.lock().vectors.insert(
            (control.to_string(), hand),
            ActionState {
                current: value,
                changed_since_last_sync: true,
                is_active: true,
            },
        );
    }

    pub fn set_inactive(&self, control: &str, hand: Option<Hand>) {
        self.lock().inactive.insert((control.to_string(), hand));
    }

    pub fn fail_query(&self, control: &str, hand: Option<Hand>) {
        self.lock().failing_queries.insert((control.to_string(), hand));
    }

    pub fn fail_sync(&self, fail: bool) {
        self.lock().fail_sync = fail;
    }

    pub fn session_alive(&self) -> bool {
        self.lock().session_alive
    }

    pub fn instance_alive(&self) -> bool {
        self.lock().instance_alive
    }
}

/// In-memory [`XrRuntime`] with recorded calls
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
    clock_start: i64,
    clock_step: i64,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        let state = MockState {
            session_alive: true,
            instance_alive: true,
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock_start: 1_000_000,
            clock_step: 11_111_111,
        }
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }

    pub fn reject_profile(self, profile: &str) -> Self {
        self.lock().rejected_profiles.insert(profile.to_string());
        self
    }

    pub fn fail_action_set_creation(self) -> Self {
        self.lock().fail_action_set = true;
        self
    }

    pub fn fail_begin(self) -> Self {
        self.lock().fail_begin = true;
        self
    }

    pub fn with_clock(mut self, start: i64, step: i64) -> Self {
        self.clock_start = start;
        self.clock_step = step;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn query<T: Copy + Default>(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
        table: impl Fn(&MockState) -> &HashMap<ControlKey, ActionState<T>>,
    ) -> Result<ActionState<T>, XrError> {
        let mut state = self.lock();
        let descriptor = *state
            .actions
            .get(action.0)
            .ok_or_else(|| XrError::UnknownHandle(format!("action {}", action.0)))?;
        let control = descriptor.name.to_string();
        state.calls.push(RuntimeCall::Query {
            control: control.clone(),
            hand,
        });

        if !state.session_alive {
            return Err(XrError::UnknownHandle("session destroyed".to_string()));
        }
        if hand.is_some() && descriptor.handedness == Handedness::Single {
            return Err(XrError::Query {
                control,
                reason: "sub-action path not declared for this action".to_string(),
            });
        }

        let key = (control, hand);
        if state.failing_queries.contains(&key) {
            return Err(XrError::Query {
                control: key.0,
                reason: "path unsupported".to_string(),
            });
        }

        let mut value = table(&*state).get(&key).copied().unwrap_or(ActionState {
            current: T::default(),
            changed_since_last_sync: false,
            is_active: true,
        });
        if state.inactive.contains(&key) {
            value.is_active = false;
        }
        Ok(value)
    }
}

impl XrRuntime for MockRuntime {
    fn describe(&self) -> String {
        "mock runtime".to_string()
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError> {
        let mut state = self.lock();
        if let Some(error) = state.poll_failures.pop_front() {
            return Err(error);
        }
        Ok(state.events.pop_front())
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::BeginSession);
        if state.fail_begin || state.running {
            return Err(XrError::Transition {
                call: "begin",
                reason: "session not ready".to_string(),
            });
        }
        state.running = true;
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::EndSession);
        if !state.running {
            return Err(XrError::Transition {
                call: "end",
                reason: "session not running".to_string(),
            });
        }
        state.running = false;
        Ok(())
    }

    fn clock_source(&self) -> Result<Box<dyn ClockSource>, XrError> {
        Ok(Box::new(MockClock {
            inner: SteppingClock::new(self.clock_start, self.clock_step),
            state: self.state.clone(),
        }))
    }

    fn create_action_set(
        &mut self,
        name: &str,
        _localized_name: &str,
        _priority: u32,
    ) -> Result<ActionSetId, XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::CreateActionSet(name.to_string()));
        if state.fail_action_set {
            return Err(XrError::ActionSetup {
                target: name.to_string(),
                reason: "runtime refused action set".to_string(),
            });
        }
        Ok(ActionSetId(0))
    }

    fn create_action(
        &mut self,
        _set: ActionSetId,
        descriptor: &ActionDescriptor,
    ) -> Result<ActionId, XrError> {
        let mut state = self.lock();
        state
            .calls
            .push(RuntimeCall::CreateAction(descriptor.name.to_string()));
        state.actions.push(*descriptor);
        Ok(ActionId(state.actions.len() - 1))
    }

    fn suggest_bindings(
        &mut self,
        profile: &str,
        bindings: &[SuggestedBinding],
    ) -> Result<(), XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::SuggestBindings {
            profile: profile.to_string(),
            count: bindings.len(),
        });
        if state.rejected_profiles.contains(profile) {
            return Err(XrError::BindingRejected {
                profile: profile.to_string(),
                reason: "path unsupported".to_string(),
            });
        }
        Ok(())
    }

    fn attach_action_sets(&mut self, _sets: &[ActionSetId]) -> Result<(), XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::AttachActionSets);
        if state.attached {
            return Err(XrError::Attach("action sets already attached".to_string()));
        }
        state.attached = true;
        Ok(())
    }

    fn create_action_space(&mut self, _action: ActionId, hand: Hand) -> Result<SpaceId, XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::CreateActionSpace(hand));
        state.spaces.push(Some(hand));
        Ok(SpaceId(state.spaces.len() - 1))
    }

    fn create_reference_space(&mut self, kind: ReferenceSpaceKind) -> Result<SpaceId, XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::CreateReferenceSpace(kind));
        state.spaces.push(None);
        Ok(SpaceId(state.spaces.len() - 1))
    }

    fn sync_actions(&mut self, _active: &[ActionSetId]) -> Result<(), XrError> {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::SyncActions);
        if !state.session_alive {
            return Err(XrError::UnknownHandle("session destroyed".to_string()));
        }
        if state.fail_sync {
            return Err(XrError::Sync("session lost focus".to_string()));
        }
        Ok(())
    }

    fn locate_space(
        &mut self,
        space: SpaceId,
        _base: SpaceId,
        time: RuntimeTime,
    ) -> Result<SpaceLocation, XrError> {
        let mut state = self.lock();
        let hand = state
            .spaces
            .get(space.0)
            .copied()
            .flatten()
            .ok_or_else(|| XrError::UnknownHandle(format!("space {}", space.0)))?;
        state.calls.push(RuntimeCall::Locate { hand, time });

        Ok(state.locations.get(&hand).copied().unwrap_or(SpaceLocation {
            pose: Pose::IDENTITY,
            position_valid: false,
            orientation_valid: false,
            position_tracked: false,
        }))
    }

    fn boolean_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<bool>, XrError> {
        self.query(action, hand, |s| &s.booleans)
    }

    fn scalar_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<f32>, XrError> {
        self.query(action, hand, |s| &s.scalars)
    }

    fn vector2_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<[f32; 2]>, XrError> {
        self.query(action, hand, |s| &s.vectors)
    }

    fn destroy_session(&mut self) {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::DestroySession);
        state.session_alive = false;
        state.running = false;
    }

    fn destroy_instance(&mut self) {
        let mut state = self.lock();
        state.calls.push(RuntimeCall::DestroyInstance);
        state.instance_alive = false;
    }
}

/// Clock handed out by [`MockRuntime`], records [`RuntimeCall::ReleaseClock`] when dropped
struct MockClock {
    inner: SteppingClock,
    state: Arc<Mutex<MockState>>,
}

impl ClockSource for MockClock {
    fn read(&mut self) -> Result<RuntimeTime, XrError> {
        self.inner.read()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

impl Drop for MockClock {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.push(RuntimeCall::ReleaseClock);
    }
}

/// Steady clock advancing a fixed step per read
#[derive(Debug, Clone)]
pub struct SteppingClock {
    next: i64,
    step: i64,
    reads: u64,
    fail_after: Option<u64>,
}

impl SteppingClock {
    pub fn new(start: i64, step: i64) -> Self {
        Self {
            next: start,
            step,
            reads: 0,
            fail_after: None,
        }
    }

    /// Every read after `reads` successful ones fails
    pub fn fail_after(&mut self, reads: u64) {
        self.fail_after = Some(reads);
    }
}

impl ClockSource for SteppingClock {
    fn read(&mut self) -> Result<RuntimeTime, XrError> {
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(XrError::TimeConversion("conversion rejected".to_string()));
        }
        let time = RuntimeTime::from_nanos(self.next);
        self.next += self.step;
        self.reads += 1;
        Ok(time)
    }

    fn name(&self) -> &'static str {
        "stepping clock"
    }
}
