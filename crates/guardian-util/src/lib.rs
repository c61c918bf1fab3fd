//! Shared utilities for guardian
//!
//! This crate provides:
//! - ID types (TargetId, SubscriberId)
//! - Wall-clock helpers (mock time, epoch millis, day keys, schedule windows)
//! - Rate limiting helpers
//! - Default paths for config and data directories

mod ids;
mod paths;
mod rate_limit;
mod time;

pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
