//! SQLite-based store implementation

use chrono::{DateTime, Local};
use guardian_api::PolicySnapshot;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    AgentProfile, AuditEvent, AuditEventType, DeviceCache, DeviceRecord, Store, StoreResult,
    TARGET_BLOCKED_KIND,
};

const PROFILE_KEY: &str = "profile";
const PIN_KEY: &str = "pin_hash";

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp_ms INTEGER NOT NULL,
                kind TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Policy snapshot (single row)
            CREATE TABLE IF NOT EXISTS policy (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                snapshot_json TEXT NOT NULL
            );

            -- Small key/value settings (profile, PIN hash)
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Controller: known agents
            CREATE TABLE IF NOT EXISTS devices (
                address TEXT NOT NULL,
                port INTEGER NOT NULL,
                discovered_name TEXT NOT NULL,
                user_assigned_name TEXT,
                last_seen_ms INTEGER NOT NULL,
                PRIMARY KEY (address, port)
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_audit_kind_time ON audit_log(kind, timestamp_ms);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }

    fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put_setting(&self, key: &str, value: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        match value {
            Some(value) => {
                conn.execute(
                    r#"
                    INSERT INTO settings (key, value)
                    VALUES (?, ?)
                    ON CONFLICT(key)
                    DO UPDATE SET value = excluded.value
                    "#,
                    params![key, value],
                )?;
            }
            None => {
                conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
            }
        }
        Ok(())
    }
}

impl Store for SqliteStore {
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp_ms, kind, event_json) VALUES (?, ?, ?)",
            params![
                event.timestamp.timestamp_millis(),
                event.event.kind(),
                event_json
            ],
        )?;

        debug!(
            event_id = conn.last_insert_rowid(),
            kind = event.event.kind(),
            "Audit event appended"
        );

        Ok(())
    }

    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp_ms, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_ms: i64 = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_ms, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_ms, event_json) = row?;
            let timestamp =
                guardian_util::from_millis(timestamp_ms).unwrap_or_else(guardian_util::now);
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn count_blocks_since(&self, since: DateTime<Local>) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE kind = ? AND timestamp_ms >= ?",
            params![TARGET_BLOCKED_KIND, since.timestamp_millis()],
            |row| row.get(0),
        )?;

        Ok(count as u32)
    }

    fn load_policy(&self) -> StoreResult<Option<PolicySnapshot>> {
        let conn = self.conn.lock().unwrap();

        let json: Option<String> = conn
            .query_row("SELECT snapshot_json FROM policy WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        let Some(json) = json else {
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(error = %e, "Stored policy is unreadable, starting empty");
                Ok(None)
            }
        }
    }

    fn save_policy(&self, snapshot: &PolicySnapshot) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let json = serde_json::to_string(snapshot)?;

        conn.execute(
            r#"
            INSERT INTO policy (id, snapshot_json)
            VALUES (1, ?)
            ON CONFLICT(id)
            DO UPDATE SET snapshot_json = excluded.snapshot_json
            "#,
            [json],
        )?;

        debug!(rules = snapshot.rules.len(), "Policy saved");
        Ok(())
    }

    fn load_profile(&self) -> StoreResult<AgentProfile> {
        match self.get_setting(PROFILE_KEY)? {
            Some(json) => Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!(error = %e, "Stored profile is unreadable, using defaults");
                AgentProfile::default()
            })),
            None => Ok(AgentProfile::default()),
        }
    }

    fn save_profile(&self, profile: &AgentProfile) -> StoreResult<()> {
        let json = serde_json::to_string(profile)?;
        self.put_setting(PROFILE_KEY, Some(&json))
    }

    fn pin_hash(&self) -> StoreResult<Option<String>> {
        self.get_setting(PIN_KEY)
    }

    fn set_pin_hash(&self, hash: Option<&str>) -> StoreResult<()> {
        self.put_setting(PIN_KEY, hash)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

impl DeviceCache for SqliteStore {
    fn load_devices(&self) -> StoreResult<Vec<DeviceRecord>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            r#"
            SELECT discovered_name, address, port, user_assigned_name, last_seen_ms
            FROM devices
            ORDER BY COALESCE(user_assigned_name, discovered_name)
            "#,
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(DeviceRecord {
                discovered_name: row.get(0)?,
                address: row.get(1)?,
                port: row.get(2)?,
                user_assigned_name: row.get(3)?,
                last_seen_ms: row.get(4)?,
            })
        })?;

        let mut devices = Vec::new();
        for row in rows {
            devices.push(row?);
        }
        Ok(devices)
    }

    fn upsert_device(&self, device: &DeviceRecord) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            INSERT INTO devices (address, port, discovered_name, user_assigned_name, last_seen_ms)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(address, port)
            DO UPDATE SET
                discovered_name = excluded.discovered_name,
                user_assigned_name = COALESCE(devices.user_assigned_name, excluded.user_assigned_name),
                last_seen_ms = excluded.last_seen_ms
            "#,
            params![
                device.address,
                device.port,
                device.discovered_name,
                device.user_assigned_name,
                device.last_seen_ms
            ],
        )?;

        debug!(address = %device.address, port = device.port, "Device cached");
        Ok(())
    }

    fn rename_device(&self, address: &str, port: u16, name: Option<&str>) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE devices SET user_assigned_name = ? WHERE address = ? AND port = ?",
            params![name, address, port],
        )?;

        if changed == 0 {
            return Err(crate::StoreError::NotFound(format!("{}:{}", address, port)));
        }
        Ok(())
    }

    fn remove_device(&self, address: &str, port: u16) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM devices WHERE address = ? AND port = ?",
            params![address, port],
        )?;
        Ok(removed > 0)
    }
}
