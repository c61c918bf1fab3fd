//! Host adapter trait interfaces for guardian
//!
//! This crate defines the capability-based interface between the policy
//! engine and platform-specific implementations: usage tracking, window
//! inspection, the interruption overlay, process termination, device
//! introspection and UI automation. It contains no platform code itself.

mod capabilities;
mod mock;
mod traits;

pub use capabilities::*;
pub use mock::*;
pub use traits::*;
