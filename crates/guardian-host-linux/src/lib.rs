//! Linux host adapter for guardian-agentd
//!
//! Provides:
//! - Window inspection and focus tracking through sway IPC
//! - Usage events and totals from the focus journal
//! - Interruption overlay as a managed process (swaylock by default)
//! - Force stop by closing windows and signalling processes
//! - Battery level from sysfs
//! - Installed applications and launcher hiding via XDG desktop entries

mod adapter;
mod desktop;
mod focus;
mod power;
mod process;
mod sway;

pub use adapter::*;
pub use desktop::*;
pub use focus::*;
pub use power::*;
pub use process::*;
pub use sway::{parse_tree, visible_windows};
