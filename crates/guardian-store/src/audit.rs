//! Audit event types

use chrono::{DateTime, Local};
use guardian_api::Category;
use guardian_util::TargetId;
use serde::{Deserialize, Serialize};

/// Stored kind of [`AuditEventType::TargetBlocked`]
pub const TARGET_BLOCKED_KIND: &str = "target_blocked";

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    AgentStarted,

    AgentStopped,

    /// A rule set replaced the stored rules
    RulesReplaced { rule_count: usize, limit_count: usize },

    LockChanged { locked: bool, until_ms: i64 },

    TargetTimerSet { target: TargetId, expires_at: i64 },

    CategoryTimerSet { category: Category, expires_at: i64 },

    TimerCleared { key: String },

    UnlockApproved {
        target: Option<TargetId>,
        until_ms: i64,
    },

    UnlockDenied { target: Option<TargetId> },

    UnlockRequested { target: Option<TargetId> },

    /// The enforcement loop interrupted a target
    TargetBlocked { target: TargetId, reason: String },

    WarningIssued { key: String, remaining_ms: i64 },

    PinReset,

    DeviceRenamed { name: String },

    LocaleChanged { code: String },

    LauncherVisibility { hidden: bool },
}

impl AuditEventType {
    /// Stable name stored alongside the payload for filtering
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentStarted => "agent_started",
            Self::AgentStopped => "agent_stopped",
            Self::RulesReplaced { .. } => "rules_replaced",
            Self::LockChanged { .. } => "lock_changed",
            Self::TargetTimerSet { .. } => "target_timer_set",
            Self::CategoryTimerSet { .. } => "category_timer_set",
            Self::TimerCleared { .. } => "timer_cleared",
            Self::UnlockApproved { .. } => "unlock_approved",
            Self::UnlockDenied { .. } => "unlock_denied",
            Self::UnlockRequested { .. } => "unlock_requested",
            Self::TargetBlocked { .. } => TARGET_BLOCKED_KIND,
            Self::WarningIssued { .. } => "warning_issued",
            Self::PinReset => "pin_reset",
            Self::DeviceRenamed { .. } => "device_renamed",
            Self::LocaleChanged { .. } => "locale_changed",
            Self::LauncherVisibility { .. } => "launcher_visibility",
        }
    }
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: guardian_util::now(),
            event,
        }
    }

    pub fn at(event: AuditEventType, timestamp: DateTime<Local>) -> Self {
        Self {
            id: 0,
            timestamp,
            event,
        }
    }
}
