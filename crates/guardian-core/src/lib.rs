//! Agent-side policy core
//!
//! This crate holds everything that decides and enforces:
//! - Policy store (single observable snapshot, copy-on-write)
//! - Category resolution and the system whitelist
//! - Usage accounting from the host's usage source
//! - Decision engine with one canonical precedence
//! - Enforcement loop and window guard

mod categories;
mod decision;
mod enforcement;
mod events;
mod policy_store;
mod usage;
mod window_guard;

pub use categories::*;
pub use decision::*;
pub use enforcement::*;
pub use events::*;
pub use policy_store::*;
pub use usage::*;
pub use window_guard::*;

use guardian_host_api::HostError;
use guardian_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A bounded host query did not answer in time
    #[error("Timed out querying {0}")]
    Timeout(&'static str),
}

pub type CoreResult<T> = Result<T, CoreError>;
