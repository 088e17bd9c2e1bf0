//! [`XrRuntime`] backed by the system OpenXR loader
//!
//! The instance is created with `XR_MND_headless` plus the host time
//! conversion extension. No graphics binding is used; the frame waiter and
//! frame stream of the headless session are never driven.

use openxr as xr;
use std::ptr;
use tracing::{debug, info, warn};

use super::actions::{ActionDescriptor, ActionKind, Handedness};
use super::error::XrError;
use super::runtime::{
    ActionId, ActionSetId, ClockSource, ReferenceSpaceKind, SpaceId, SuggestedBinding, XrRuntime,
};
use super::types::{ActionState, Hand, Pose, RuntimeEvent, RuntimeTime, SessionPhase, SpaceLocation};

/// Identity reported to the runtime on instance creation
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub application_name: String,
    pub application_version: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            application_name: "xr-broadcaster".to_string(),
            application_version: 1,
        }
    }
}

enum TypedAction {
    Pose(xr::Action<xr::Posef>),
    Boolean(xr::Action<bool>),
    Scalar(xr::Action<f32>),
    Vector2(xr::Action<xr::Vector2f>),
}

impl TypedAction {
    fn binding(&self, path: xr::Path) -> xr::Binding<'_> {
        match self {
            TypedAction::Pose(a) => xr::Binding::new(a, path),
            TypedAction::Boolean(a) => xr::Binding::new(a, path),
            TypedAction::Scalar(a) => xr::Binding::new(a, path),
            TypedAction::Vector2(a) => xr::Binding::new(a, path),
        }
    }
}

/// Session binding for `XR_MND_headless`: `xrCreateSession` with an empty `next` chain
///
/// There are no swapchains, so the format and image types are placeholders.
pub enum Headless {}

impl xr::Graphics for Headless {
    type Requirements = ();
    type SessionCreateInfo = ();
    type Format = i64;
    type SwapchainImage = ();

    fn raise_format(x: i64) -> i64 {
        x
    }

    fn lower_format(x: i64) -> i64 {
        x
    }

    fn requirements(_instance: &xr::Instance, _system: xr::SystemId) -> xr::Result<()> {
        Ok(())
    }

    unsafe fn create_session(
        instance: &xr::Instance,
        system: xr::SystemId,
        _info: &(),
    ) -> xr::Result<xr::sys::Session> {
        let info = xr::sys::SessionCreateInfo {
            ty: xr::sys::SessionCreateInfo::TYPE,
            next: ptr::null(),
            create_flags: Default::default(),
            system_id: system,
        };
        let mut out = xr::sys::Session::NULL;
        let result = unsafe { (instance.fp().create_session)(instance.as_raw(), &info, &mut out) };
        if result.into_raw() < 0 {
            return Err(result);
        }
        Ok(out)
    }

    fn enumerate_swapchain_images(
        _swapchain: &xr::Swapchain<Self>,
    ) -> xr::Result<Vec<()>> {
        Err(xr::sys::Result::ERROR_FUNCTION_UNSUPPORTED)
    }
}

struct NamedAction {
    name: &'static str,
    action: TypedAction,
}

pub struct OpenXrRuntime {
    instance: Option<xr::Instance>,
    session: Option<xr::Session<Headless>>,
    hand_paths: [xr::Path; 2],
    action_sets: Vec<xr::ActionSet>,
    actions: Vec<NamedAction>,
    /// Created spaces with the hand they track, `None` for the reference space
    spaces: Vec<(xr::Space, Option<Hand>)>,
    description: String,
}

fn raw(context: &str, e: xr::sys::Result) -> String {
    format!("{}: {:?}", context, e)
}

impl OpenXrRuntime {
    /// Loads the runtime and creates instance, system and headless session
    pub fn create(settings: &RuntimeSettings) -> Result<Self, XrError> {
        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| XrError::InstanceCreation(format!("OpenXR loader: {:?}", e)))?;
        let available = entry
            .enumerate_extensions()
            .map_err(|e| XrError::InstanceCreation(raw("enumerate extensions", e)))?;

        if !available.mnd_headless {
            return Err(XrError::ExtensionUnavailable("XR_MND_headless".to_string()));
        }
        let mut extensions = xr::ExtensionSet::default();
        extensions.mnd_headless = true;

        #[cfg(unix)]
        {
            if !available.khr_convert_timespec_time {
                return Err(XrError::ExtensionUnavailable(
                    "XR_KHR_convert_timespec_time".to_string(),
                ));
            }
            extensions.khr_convert_timespec_time = true;
        }
        #[cfg(windows)]
        {
            if !available.khr_win32_convert_performance_counter_time {
                return Err(XrError::ExtensionUnavailable(
                    "XR_KHR_win32_convert_performance_counter_time".to_string(),
                ));
            }
            extensions.khr_win32_convert_performance_counter_time = true;
        }

        let app_info = xr::ApplicationInfo {
            application_name: &settings.application_name,
            application_version: settings.application_version,
            engine_name: "xr-broadcaster",
            engine_version: 1,
            api_version: xr::Version::new(1, 0, 0),
        };
        let instance = entry
            .create_instance(&app_info, &extensions, &[])
            .map_err(|e| XrError::InstanceCreation(raw("create instance", e)))?;

        let description = match instance.properties() {
            Ok(props) => format!("{} {}", props.runtime_name, props.runtime_version),
            Err(e) => {
                warn!("Cannot read runtime properties: {:?}", e);
                "unknown runtime".to_string()
            }
        };
        info!("Loaded OpenXR runtime: {}", description);

        let system = instance
            .system(xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .map_err(|e| XrError::SystemUnavailable(raw("head mounted display", e)))?;

        // Headless sessions take no graphics binding
        let (session, _frame_waiter, _frame_stream) = unsafe {
            instance
                .create_session::<Headless>(system, &())
                .map_err(|e| XrError::SessionCreation(raw("create session", e)))?
        };
        debug!("Headless session created");

        let hand_paths = [
            string_path(&instance, Hand::Left.user_path())?,
            string_path(&instance, Hand::Right.user_path())?,
        ];

        Ok(Self {
            instance: Some(instance),
            session: Some(session),
            hand_paths,
            action_sets: Vec::new(),
            actions: Vec::new(),
            spaces: Vec::new(),
            description,
        })
    }

    fn instance(&self) -> Result<&xr::Instance, XrError> {
        self.instance
            .as_ref()
            .ok_or_else(|| XrError::UnknownHandle("instance destroyed".to_string()))
    }

    fn session(&self) -> Result<&xr::Session<Headless>, XrError> {
        self.session
            .as_ref()
            .ok_or_else(|| XrError::UnknownHandle("session destroyed".to_string()))
    }

    fn sub_path(&self, hand: Option<Hand>) -> xr::Path {
        hand.map_or(xr::Path::NULL, |h| self.hand_paths[h.index()])
    }

    fn action(&self, id: ActionId) -> Result<&NamedAction, XrError> {
        self.actions
            .get(id.0)
            .ok_or_else(|| XrError::UnknownHandle(format!("action {}", id.0)))
    }

    fn space(&self, id: SpaceId) -> Result<&(xr::Space, Option<Hand>), XrError> {
        self.spaces
            .get(id.0)
            .ok_or_else(|| XrError::UnknownHandle(format!("space {}", id.0)))
    }

    fn query_error(name: &str, e: xr::sys::Result) -> XrError {
        XrError::Query {
            control: name.to_string(),
            reason: format!("{:?}", e),
        }
    }
}

fn string_path(instance: &xr::Instance, path: &str) -> Result<xr::Path, XrError> {
    instance.string_to_path(path).map_err(|e| XrError::ActionSetup {
        target: path.to_string(),
        reason: format!("{:?}", e),
    })
}

fn phase_of(state: xr::SessionState) -> SessionPhase {
    match state {
        xr::SessionState::IDLE => SessionPhase::Idle,
        xr::SessionState::READY => SessionPhase::Ready,
        xr::SessionState::SYNCHRONIZED => SessionPhase::Synchronized,
        xr::SessionState::VISIBLE => SessionPhase::Visible,
        xr::SessionState::FOCUSED => SessionPhase::Focused,
        xr::SessionState::STOPPING => SessionPhase::Stopping,
        xr::SessionState::LOSS_PENDING => SessionPhase::LossPending,
        xr::SessionState::EXITING => SessionPhase::Exiting,
        _ => SessionPhase::Unknown,
    }
}

fn state_of<T, U>(state: xr::ActionState<T>, convert: impl FnOnce(T) -> U) -> ActionState<U>
where
    T: xr::ActionInput,
{
    ActionState {
        current: convert(state.current_state),
        changed_since_last_sync: state.changed_since_last_sync,
        is_active: state.is_active,
    }
}

impl XrRuntime for OpenXrRuntime {
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError> {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| XrError::UnknownHandle("instance destroyed".to_string()))?;
        // The buffer is not Send, so it lives only for this call
        let mut buffer = xr::EventDataBuffer::new();
        let event = instance
            .poll_event(&mut buffer)
            .map_err(|e| XrError::EventPoll(format!("{:?}", e)))?;

        Ok(event.map(|event| match event {
            xr::Event::SessionStateChanged(e) => RuntimeEvent::SessionStateChanged(phase_of(e.state())),
            xr::Event::InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
            xr::Event::EventsLost(e) => RuntimeEvent::EventsLost(e.lost_event_count()),
            _ => RuntimeEvent::Other,
        }))
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        self.session()?
            .begin(xr::ViewConfigurationType::PRIMARY_MONO)
            .map(|_| ())
            .map_err(|e| XrError::Transition {
                call: "begin",
                reason: format!("{:?}", e),
            })
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        self.session()?
            .end()
            .map(|_| ())
            .map_err(|e| XrError::Transition {
                call: "end",
                reason: format!("{:?}", e),
            })
    }

    fn clock_source(&self) -> Result<Box<dyn ClockSource>, XrError> {
        Ok(Box::new(NativeClock::resolve(self.instance()?)?))
    }

    fn create_action_set(
        &mut self,
        name: &str,
        localized_name: &str,
        priority: u32,
    ) -> Result<ActionSetId, XrError> {
        let set = self
            .instance()?
            .create_action_set(name, localized_name, priority)
            .map_err(|e| XrError::ActionSetup {
                target: name.to_string(),
                reason: format!("{:?}", e),
            })?;
        self.action_sets.push(set);
        Ok(ActionSetId(self.action_sets.len() - 1))
    }

    fn create_action(
        &mut self,
        set: ActionSetId,
        descriptor: &ActionDescriptor,
    ) -> Result<ActionId, XrError> {
        let action_set = self
            .action_sets
            .get(set.0)
            .ok_or_else(|| XrError::UnknownHandle(format!("action set {}", set.0)))?;
        let sub_paths: Vec<xr::Path> = match descriptor.handedness {
            Handedness::PerHand => self.hand_paths.to_vec(),
            Handedness::Single => Vec::new(),
        };
        let name = descriptor.name;
        let localized = descriptor.localized_name;
        let setup_error = |e: xr::sys::Result| XrError::ActionSetup {
            target: name.to_string(),
            reason: format!("{:?}", e),
        };

        let action = match descriptor.kind {
            ActionKind::Pose => TypedAction::Pose(
                action_set
                    .create_action(name, localized, &sub_paths)
                    .map_err(setup_error)?,
            ),
            ActionKind::Boolean => TypedAction::Boolean(
                action_set
                    .create_action(name, localized, &sub_paths)
                    .map_err(setup_error)?,
            ),
            ActionKind::Scalar => TypedAction::Scalar(
                action_set
                    .create_action(name, localized, &sub_paths)
                    .map_err(setup_error)?,
            ),
            ActionKind::Vector2 => TypedAction::Vector2(
                action_set
                    .create_action(name, localized, &sub_paths)
                    .map_err(setup_error)?,
            ),
        };
        self.actions.push(NamedAction { name, action });
        Ok(ActionId(self.actions.len() - 1))
    }

    fn suggest_bindings(
        &mut self,
        profile: &str,
        bindings: &[SuggestedBinding],
    ) -> Result<(), XrError> {
        let rejected = |reason: String| XrError::BindingRejected {
            profile: profile.to_string(),
            reason,
        };
        let instance = self.instance()?;
        let profile_path = instance
            .string_to_path(profile)
            .map_err(|e| rejected(format!("{:?}", e)))?;

        let mut native = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let path = instance
                .string_to_path(&binding.path)
                .map_err(|e| rejected(format!("{}: {:?}", binding.path, e)))?;
            native.push(self.action(binding.action)?.action.binding(path));
        }

        instance
            .suggest_interaction_profile_bindings(profile_path, &native)
            .map_err(|e| rejected(format!("{:?}", e)))
    }

    fn attach_action_sets(&mut self, sets: &[ActionSetId]) -> Result<(), XrError> {
        let mut attach = Vec::with_capacity(sets.len());
        for id in sets {
            let set = self
                .action_sets
                .get(id.0)
                .ok_or_else(|| XrError::UnknownHandle(format!("action set {}", id.0)))?;
            attach.push(set);
        }
        self.session()?
            .attach_action_sets(&attach)
            .map_err(|e| XrError::Attach(format!("{:?}", e)))
    }

    fn create_action_space(&mut self, action: ActionId, hand: Hand) -> Result<SpaceId, XrError> {
        let session = self.session()?.clone();
        let named = self.action(action)?;
        let TypedAction::Pose(pose) = &named.action else {
            return Err(XrError::ActionSetup {
                target: named.name.to_string(),
                reason: "spaces can only be created from pose actions".to_string(),
            });
        };
        let space = pose
            .create_space(session, self.hand_paths[hand.index()], xr::Posef::IDENTITY)
            .map_err(|e| XrError::ActionSetup {
                target: format!("{} space", hand),
                reason: format!("{:?}", e),
            })?;
        self.spaces.push((space, Some(hand)));
        Ok(SpaceId(self.spaces.len() - 1))
    }

    fn create_reference_space(&mut self, kind: ReferenceSpaceKind) -> Result<SpaceId, XrError> {
        let space_type = match kind {
            ReferenceSpaceKind::Stage => xr::ReferenceSpaceType::STAGE,
            ReferenceSpaceKind::Local => xr::ReferenceSpaceType::LOCAL,
        };
        let space = self
            .session()?
            .create_reference_space(space_type, xr::Posef::IDENTITY)
            .map_err(|e| XrError::ActionSetup {
                target: format!("{:?} reference space", kind),
                reason: format!("{:?}", e),
            })?;
        self.spaces.push((space, None));
        Ok(SpaceId(self.spaces.len() - 1))
    }

    fn sync_actions(&mut self, active: &[ActionSetId]) -> Result<(), XrError> {
        let mut sets = Vec::with_capacity(active.len());
        for id in active {
            let set = self
                .action_sets
                .get(id.0)
                .ok_or_else(|| XrError::UnknownHandle(format!("action set {}", id.0)))?;
            sets.push(xr::ActiveActionSet::new(set));
        }
        self.session()?
            .sync_actions(&sets)
            .map_err(|e| XrError::Sync(format!("{:?}", e)))
    }

    fn locate_space(
        &mut self,
        space: SpaceId,
        base: SpaceId,
        time: RuntimeTime,
    ) -> Result<SpaceLocation, XrError> {
        let (target, hand) = self.space(space)?;
        let hand = hand.ok_or_else(|| {
            XrError::UnknownHandle(format!("space {} is not a controller space", space.0))
        })?;
        let (base, _) = self.space(base)?;
        let location = target
            .locate(base, xr::Time::from_nanos(time.as_nanos()))
            .map_err(|e| XrError::Locate {
                hand,
                reason: format!("{:?}", e),
            })?;

        let flags = location.location_flags;
        let p = location.pose;
        Ok(SpaceLocation {
            pose: Pose {
                position: [p.position.x, p.position.y, p.position.z],
                orientation: [p.orientation.x, p.orientation.y, p.orientation.z, p.orientation.w],
            },
            position_valid: flags.contains(xr::SpaceLocationFlags::POSITION_VALID),
            orientation_valid: flags.contains(xr::SpaceLocationFlags::ORIENTATION_VALID),
            position_tracked: flags.contains(xr::SpaceLocationFlags::POSITION_TRACKED),
        })
    }

    fn boolean_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<bool>, XrError> {
        let path = self.sub_path(hand);
        let named = self.action(action)?;
        match &named.action {
            TypedAction::Boolean(a) => a
                .state(self.session()?, path)
                .map(|s| state_of(s, |v| v))
                .map_err(|e| Self::query_error(named.name, e)),
            _ => Err(Self::query_error(named.name, xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH)),
        }
    }

    fn scalar_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<f32>, XrError> {
        let path = self.sub_path(hand);
        let named = self.action(action)?;
        match &named.action {
            TypedAction::Scalar(a) => a
                .state(self.session()?, path)
                .map(|s| state_of(s, |v| v))
                .map_err(|e| Self::query_error(named.name, e)),
            _ => Err(Self::query_error(named.name, xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH)),
        }
    }

    fn vector2_state(
        &mut self,
        action: ActionId,
        hand: Option<Hand>,
    ) -> Result<ActionState<[f32; 2]>, XrError> {
        let path = self.sub_path(hand);
        let named = self.action(action)?;
        match &named.action {
            TypedAction::Vector2(a) => a
                .state(self.session()?, path)
                .map(|s| state_of(s, |v| [v.x, v.y]))
                .map_err(|e| Self::query_error(named.name, e)),
            _ => Err(Self::query_error(named.name, xr::sys::Result::ERROR_ACTION_TYPE_MISMATCH)),
        }
    }

    fn destroy_session(&mut self) {
        // Spaces and actions hold references to the session and go first
        self.spaces.clear();
        self.actions.clear();
        self.action_sets.clear();
        if self.session.take().is_some() {
            info!("OpenXR session destroyed");
        }
    }

    fn destroy_instance(&mut self) {
        if self.instance.take().is_some() {
            info!("OpenXR instance destroyed");
        }
    }
}

/// Host monotonic clock converted through the runtime's KHR conversion extension
///
/// Holds the raw instance handle only, so it never keeps the instance alive.
/// It must be dropped before [`XrRuntime::destroy_instance`].
pub struct NativeClock {
    instance: xr::sys::Instance,
    #[cfg(unix)]
    convert: xr::sys::pfn::ConvertTimespecTimeToTimeKHR,
    #[cfg(windows)]
    convert: xr::sys::pfn::ConvertWin32PerformanceCounterToTimeKHR,
}

impl NativeClock {
    #[cfg(unix)]
    pub fn resolve(instance: &xr::Instance) -> Result<Self, XrError> {
        let ext = instance.exts().khr_convert_timespec_time.as_ref().ok_or_else(|| {
            XrError::ExtensionUnavailable("XR_KHR_convert_timespec_time".to_string())
        })?;
        Ok(Self {
            instance: instance.as_raw(),
            convert: ext.convert_timespec_time_to_time,
        })
    }

    #[cfg(windows)]
    pub fn resolve(instance: &xr::Instance) -> Result<Self, XrError> {
        let ext = instance
            .exts()
            .khr_win32_convert_performance_counter_time
            .as_ref()
            .ok_or_else(|| {
                XrError::ExtensionUnavailable(
                    "XR_KHR_win32_convert_performance_counter_time".to_string(),
                )
            })?;
        Ok(Self {
            instance: instance.as_raw(),
            convert: ext.convert_win32_performance_counter_to_time,
        })
    }
}

impl ClockSource for NativeClock {
    #[cfg(unix)]
    fn read(&mut self) -> Result<RuntimeTime, XrError> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
            return Err(XrError::TimeConversion(
                "clock_gettime(CLOCK_MONOTONIC) failed".to_string(),
            ));
        }

        let mut time = xr::Time::from_nanos(0);
        let result = unsafe {
            (self.convert)(
                self.instance,
                &ts as *const libc::timespec as *const _,
                &mut time,
            )
        };
        if result.into_raw() < 0 {
            return Err(XrError::TimeConversion(format!("{:?}", result)));
        }
        Ok(RuntimeTime::from_nanos(time.as_nanos()))
    }

    #[cfg(windows)]
    fn read(&mut self) -> Result<RuntimeTime, XrError> {
        use windows::Win32::System::Performance::QueryPerformanceCounter;

        let mut counter: i64 = 0;
        unsafe { QueryPerformanceCounter(&mut counter) }
            .map_err(|e| XrError::TimeConversion(format!("QueryPerformanceCounter: {}", e)))?;

        let mut time = xr::Time::from_nanos(0);
        let result = unsafe {
            (self.convert)(
                self.instance,
                &counter as *const i64 as *const _,
                &mut time,
            )
        };
        if result.into_raw() < 0 {
            return Err(XrError::TimeConversion(format!("{:?}", result)));
        }
        Ok(RuntimeTime::from_nanos(time.as_nanos()))
    }

    fn name(&self) -> &'static str {
        if cfg!(windows) {
            "xrConvertWin32PerformanceCounterToTimeKHR"
        } else {
            "xrConvertTimespecTimeToTimeKHR"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn runtime_can_move_to_the_driver_thread() {
        assert_send::<OpenXrRuntime>();
        assert_send::<NativeClock>();
    }

    #[test]
    fn session_states_map_to_phases() {
        assert_eq!(phase_of(xr::SessionState::READY), SessionPhase::Ready);
        assert_eq!(phase_of(xr::SessionState::FOCUSED), SessionPhase::Focused);
        assert_eq!(phase_of(xr::SessionState::LOSS_PENDING), SessionPhase::LossPending);
        assert_eq!(phase_of(xr::SessionState::UNKNOWN), SessionPhase::Unknown);
    }

    #[test]
    fn headless_binding_has_no_swapchain_formats() {
        use xr::Graphics;
        assert_eq!(Headless::lower_format(Headless::raise_format(37)), 37);
    }
}
