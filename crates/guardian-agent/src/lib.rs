//! guardian-agentd library
//!
//! The binary wires the Linux host, enforcement and the command server
//! together; this library holds the parts worth testing on their own:
//! - [`AgentService`]: executes controller commands against the policy store
//! - [`relay_events`]: turns host and enforcement notifications into pushed
//!   events

mod relay;
mod service;

pub use relay::*;
pub use service::*;
