//! Agent-originated events pushed over `/events`

use guardian_util::TargetId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    BatteryChanged,
    AppInstalled,
    AppRemoved,
    LockStatusChanged,
    UnlockRequested,
}

/// Scope of an unlock request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnlockScope {
    /// Whole device
    Device,
    /// A single target
    App,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_type: Option<UnlockScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_package_name: Option<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, timestamp: i64) -> Self {
        Self {
            event_type,
            payload: None,
            timestamp,
            device_name: None,
            request_type: None,
            app_package_name: None,
            app_name: None,
        }
    }

    pub fn battery_changed(level: u8, timestamp: i64) -> Self {
        Self {
            payload: Some(level.to_string()),
            ..Self::new(EventType::BatteryChanged, timestamp)
        }
    }

    pub fn app_installed(target: &TargetId, timestamp: i64) -> Self {
        Self {
            payload: Some(target.to_string()),
            app_package_name: Some(target.clone()),
            ..Self::new(EventType::AppInstalled, timestamp)
        }
    }

    pub fn app_removed(target: &TargetId, timestamp: i64) -> Self {
        Self {
            payload: Some(target.to_string()),
            app_package_name: Some(target.clone()),
            ..Self::new(EventType::AppRemoved, timestamp)
        }
    }

    pub fn lock_status_changed(locked: bool, timestamp: i64) -> Self {
        Self {
            payload: Some(locked.to_string()),
            ..Self::new(EventType::LockStatusChanged, timestamp)
        }
    }

    /// Unlock request; `target` carries the target id and its display name
    /// when the request is scoped to one target.
    pub fn unlock_requested(
        device_name: impl Into<String>,
        target: Option<(TargetId, String)>,
        message: Option<String>,
        timestamp: i64,
    ) -> Self {
        let (scope, package, name) = match target {
            Some((id, label)) => (UnlockScope::App, Some(id), Some(label)),
            None => (UnlockScope::Device, None, None),
        };
        Self {
            payload: message,
            device_name: Some(device_name.into()),
            request_type: Some(scope),
            app_package_name: package,
            app_name: name,
            ..Self::new(EventType::UnlockRequested, timestamp)
        }
    }

    /// Lock state carried by a `LOCK_STATUS_CHANGED` event
    pub fn locked(&self) -> Option<bool> {
        match self.event_type {
            EventType::LockStatusChanged => self.payload.as_deref()?.parse().ok(),
            _ => None,
        }
    }
}
