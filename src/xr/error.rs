use super::types::Hand;

/// Errors raised while driving the XR runtime
///
/// Creation failures are fatal for the driver loop; query failures are
/// reported per control and turn into absent readings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum XrError {
    /// The runtime loader or instance could not be created
    #[error("Instance creation failed: {0}")]
    InstanceCreation(String),

    /// A required instance extension is not offered by the runtime
    #[error("Extension unavailable: {0}")]
    ExtensionUnavailable(String),

    /// No system of the requested form factor is connected
    #[error("System lookup failed: {0}")]
    SystemUnavailable(String),

    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    /// Action set, action, action space or reference space creation failed
    #[error("Action setup failed for {target}: {reason}")]
    ActionSetup { target: String, reason: String },

    /// A suggested binding was rejected for one interaction profile
    #[error("Binding suggestion rejected for {profile}: {reason}")]
    BindingRejected { profile: String, reason: String },

    #[error("Attaching action sets failed: {0}")]
    Attach(String),

    /// A lifecycle call (begin, end) failed
    #[error("Session transition {call} failed: {reason}")]
    Transition { call: &'static str, reason: String },

    #[error("Event poll failed: {0}")]
    EventPoll(String),

    #[error("Action sync failed: {0}")]
    Sync(String),

    #[error("Locating {hand} space failed: {reason}")]
    Locate { hand: Hand, reason: String },

    /// A single action state query failed
    #[error("State query for {control} failed: {reason}")]
    Query { control: String, reason: String },

    /// The host clock could not be read or converted into runtime time
    #[error("Time conversion failed: {0}")]
    TimeConversion(String),

    /// The program called the runtime out of protocol order
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A handle was used after teardown or was never created
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),
}

impl XrError {
    /// Returns true for failures that must stop the driver loop
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            XrError::BindingRejected { .. }
                | XrError::Sync(_)
                | XrError::Locate { .. }
                | XrError::Query { .. }
                | XrError::TimeConversion(_)
        )
    }
}
