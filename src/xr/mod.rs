//! Runtime-facing core: lifecycle, bindings, time and per-frame input
//!
//! 1. [`time_bridge`] - Host clock to runtime time conversion
//! 2. [`actions`] - Control descriptors, profile bindings and the binder
//! 3. [`lifecycle`] - Session phase machine fed by runtime events
//! 4. [`input_sync`] - Sync, locate and read into a snapshot
//! 5. [`driver`] - Frame loop tying the above to snapshot sinks
//!
//! # Architecture
//!
//! ```text
//! events ──► SessionLifecycle ──(Focused)──► InputSyncEngine ──► Snapshot ──► sinks
//!                                               ▲
//!                                          TimeBridge
//! ```
//!
//! Everything talks to the runtime through [`runtime::XrRuntime`]. The
//! [`openxr_runtime`] module implements it on the OpenXR loader and [`mock`]
//! provides a scripted stand-in.

pub mod actions;
pub mod driver;
pub mod error;
pub mod input_sync;
pub mod lifecycle;
pub mod mock;
pub mod openxr_runtime;
pub mod runtime;
pub mod time_bridge;
pub mod types;

pub use actions::{ActionBinder, BindingSettings, BoundActions};
pub use driver::{DriverSettings, DriverStats, TickOutcome, XrDriver};
pub use error::XrError;
pub use input_sync::InputSyncEngine;
pub use lifecycle::SessionLifecycle;
pub use runtime::XrRuntime;
pub use time_bridge::TimeBridge;
pub use types::{Hand, SessionPhase};
