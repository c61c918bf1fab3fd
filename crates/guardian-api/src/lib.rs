//! Protocol types shared by the guardian agent and controller
//!
//! This crate defines the stable contract between the two sides:
//! - The `Packet` envelope carried by every HTTP body and push frame
//! - Commands (controller -> agent) and their validated form
//! - Responses and events
//! - The policy data model and the agent's policy snapshot
//! - Endpoint paths and discovery constants

mod commands;
mod events;
mod routes;
mod snapshot;
mod types;

pub use commands::*;
pub use events::*;
pub use routes::*;
pub use snapshot::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;

/// Fixed TCP port the agent listens on
pub const AGENT_PORT: u16 = 8080;

/// mDNS service type advertised by agents
pub const SERVICE_TYPE: &str = "_parentalguard._tcp.local.";

/// Prefix of every advertised agent instance name
pub const SERVICE_NAME_PREFIX: &str = "PG_Child_";

/// Default length of an approved unlock when the controller gives none
pub const DEFAULT_UNLOCK_DURATION_MS: i64 = 10 * 60 * 1000;
