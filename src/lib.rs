//! Headless OpenXR controller tracking
//!
//! Drives a headless runtime session through its lifecycle, reads both
//! controllers once per tick and hands the resulting [`snapshot::Snapshot`]
//! to sinks.

pub mod config;
pub mod sink;
pub mod snapshot;
pub mod xr;
