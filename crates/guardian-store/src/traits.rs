//! Store trait definitions

use chrono::{DateTime, Local};
use guardian_api::PolicySnapshot;
use serde::{Deserialize, Serialize};

use crate::{AuditEvent, StoreResult};

/// Agent-side store
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    /// Number of enforcement interruptions at or after `since`
    fn count_blocks_since(&self, since: DateTime<Local>) -> StoreResult<u32>;

    // Policy

    /// Load the last saved policy snapshot. Unreadable data yields `None`.
    fn load_policy(&self) -> StoreResult<Option<PolicySnapshot>>;

    fn save_policy(&self, snapshot: &PolicySnapshot) -> StoreResult<()>;

    // Profile

    fn load_profile(&self) -> StoreResult<AgentProfile>;

    fn save_profile(&self, profile: &AgentProfile) -> StoreResult<()>;

    // Local PIN

    /// Hex SHA-256 of the local PIN, if one is set
    fn pin_hash(&self) -> StoreResult<Option<String>>;

    /// Replace (or with `None`, clear) the stored PIN hash
    fn set_pin_hash(&self, hash: Option<&str>) -> StoreResult<()>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Agent settings changed by controller commands
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Name set by the controller; overrides the configured name
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub launcher_hidden: bool,
}

/// Controller-side cache of agents
pub trait DeviceCache: Send + Sync {
    fn load_devices(&self) -> StoreResult<Vec<DeviceRecord>>;

    /// Insert or refresh a device, keyed by address and port. The
    /// user-assigned name of an existing record is kept.
    fn upsert_device(&self, device: &DeviceRecord) -> StoreResult<()>;

    fn rename_device(&self, address: &str, port: u16, name: Option<&str>) -> StoreResult<()>;

    fn remove_device(&self, address: &str, port: u16) -> StoreResult<bool>;
}

/// A known agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Instance name seen during discovery (or given when added by hand)
    pub discovered_name: String,
    pub address: String,
    pub port: u16,
    pub user_assigned_name: Option<String>,
    /// Epoch milliseconds
    pub last_seen_ms: i64,
}

impl DeviceRecord {
    pub fn new(discovered_name: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            discovered_name: discovered_name.into(),
            address: address.into(),
            port,
            user_assigned_name: None,
            last_seen_ms: guardian_util::now_millis(),
        }
    }

    /// Name shown to the user
    pub fn display_name(&self) -> &str {
        self.user_assigned_name
            .as_deref()
            .unwrap_or(&self.discovered_name)
    }

    /// `host:port` suitable for building URLs
    pub fn authority(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_user_name() {
        let mut record = DeviceRecord::new("PG_Child_tablet", "192.168.1.20", 8080);
        assert_eq!(record.display_name(), "PG_Child_tablet");

        record.user_assigned_name = Some("Sam's tablet".into());
        assert_eq!(record.display_name(), "Sam's tablet");
    }

    #[test]
    fn authority_brackets_ipv6() {
        assert_eq!(
            DeviceRecord::new("a", "fe80::1", 8080).authority(),
            "[fe80::1]:8080"
        );
        assert_eq!(
            DeviceRecord::new("a", "10.0.0.2", 8080).authority(),
            "10.0.0.2:8080"
        );
    }
}
