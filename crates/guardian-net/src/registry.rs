//! Controller-side view of known agents
//!
//! The cache is authoritative for *which* agents exist and what the user
//! called them; live state is always fetched on demand and a failed fetch
//! simply shows the agent as offline.

use futures_util::future::join_all;
use guardian_store::{DeviceCache, DeviceRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    Backoff, ClientOptions, DeviceClient, DiscoveredAgent, NetResult, PushMessage,
    PushSubscription,
};

/// One line of the device overview
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSummary {
    pub record: DeviceRecord,
    pub online: bool,
    pub locked: bool,
    pub battery_level: Option<u8>,
    pub rule_count: usize,
    pub screen_time_ms: i64,
    /// Why the agent is shown offline
    pub error: Option<String>,
}

impl DeviceSummary {
    fn offline(record: DeviceRecord, error: String) -> Self {
        Self {
            record,
            online: false,
            locked: false,
            battery_level: None,
            rule_count: 0,
            screen_time_ms: 0,
            error: Some(error),
        }
    }
}

pub struct DeviceRegistry {
    cache: Arc<dyn DeviceCache>,
    http: reqwest::Client,
    options: ClientOptions,
    backoff: Backoff,
    clients: Mutex<HashMap<String, DeviceClient>>,
    subscriptions: Mutex<HashMap<String, PushSubscription>>,
    updates_tx: mpsc::UnboundedSender<PushMessage>,
}

impl DeviceRegistry {
    /// Returns the registry and the stream every subscription reports into
    pub fn new(
        cache: Arc<dyn DeviceCache>,
        options: ClientOptions,
        backoff: Backoff,
    ) -> NetResult<(Self, mpsc::UnboundedReceiver<PushMessage>)> {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let registry = Self {
            cache,
            http: reqwest::Client::builder().build()?,
            options,
            backoff,
            clients: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            updates_tx,
        };
        Ok((registry, updates_rx))
    }

    pub fn devices(&self) -> NetResult<Vec<DeviceRecord>> {
        Ok(self.cache.load_devices()?)
    }

    /// Merge fresh discovery results into the cache by (address, port).
    /// Cached agents that were not seen stay; user-assigned names are kept.
    pub fn reconcile(&self, found: &[DiscoveredAgent]) -> NetResult<Vec<DeviceRecord>> {
        for agent in found {
            self.cache.upsert_device(&agent.to_record())?;
        }
        let devices = self.cache.load_devices()?;
        info!(found = found.len(), known = devices.len(), "Device cache reconciled");
        Ok(devices)
    }

    /// Add an agent by hand
    pub fn add(&self, name: &str, address: &str, port: u16) -> NetResult<DeviceRecord> {
        let mut record = DeviceRecord::new(name, address, port);
        record.user_assigned_name = Some(name.to_string());
        self.cache.upsert_device(&record)?;
        Ok(record)
    }

    pub fn rename(&self, record: &DeviceRecord, name: Option<&str>) -> NetResult<()> {
        self.cache.rename_device(&record.address, record.port, name)?;
        Ok(())
    }

    /// Forget an agent and stop listening to it
    pub fn remove(&self, record: &DeviceRecord) -> NetResult<bool> {
        let authority = record.authority();
        if let Some(subscription) = self.subscriptions.lock().unwrap().remove(&authority) {
            subscription.cancel();
        }
        self.clients.lock().unwrap().remove(&authority);
        Ok(self.cache.remove_device(&record.address, record.port)?)
    }

    /// Look an agent up by display name, discovered name or `host:port`
    pub fn find(&self, selector: &str) -> NetResult<Option<DeviceRecord>> {
        Ok(self.cache.load_devices()?.into_iter().find(|d| {
            d.display_name() == selector || d.discovered_name == selector || d.authority() == selector
        }))
    }

    /// Command client for `record`; one per agent so the concurrency bound
    /// holds across callers
    pub fn client(&self, record: &DeviceRecord) -> DeviceClient {
        let authority = record.authority();
        self.clients
            .lock()
            .unwrap()
            .entry(authority.clone())
            .or_insert_with(|| DeviceClient::with_http(self.http.clone(), &authority, self.options))
            .clone()
    }

    /// Live status of one agent
    pub async fn summary(&self, record: &DeviceRecord) -> DeviceSummary {
        match self.client(record).stats(false).await {
            Ok(stats) => {
                let mut seen = record.clone();
                seen.last_seen_ms = guardian_util::now_millis();
                if let Err(e) = self.cache.upsert_device(&seen) {
                    warn!(device = %record.display_name(), error = %e, "Failed to refresh device");
                }
                DeviceSummary {
                    record: seen,
                    online: true,
                    locked: stats.locked,
                    battery_level: stats.battery_level,
                    rule_count: stats.active_rules.len(),
                    screen_time_ms: stats.screen_time_ms(),
                    error: None,
                }
            }
            Err(e) => {
                debug!(device = %record.display_name(), error = %e, "Device offline");
                DeviceSummary::offline(record.clone(), e.to_string())
            }
        }
    }

    /// Status of every known agent, queried concurrently
    pub async fn summaries(&self) -> NetResult<Vec<DeviceSummary>> {
        let devices = self.cache.load_devices()?;
        Ok(join_all(devices.iter().map(|d| self.summary(d))).await)
    }

    /// Push a locale to every known agent; each outcome is reported
    pub async fn sync_locale(&self, code: &str) -> NetResult<Vec<(DeviceRecord, NetResult<()>)>> {
        let devices = self.cache.load_devices()?;
        let outcomes = join_all(devices.iter().map(|d| async move {
            self.client(d).set_language(code).await.map(|_| ())
        }))
        .await;
        Ok(devices.into_iter().zip(outcomes).collect())
    }

    /// Make sure every known agent has a running subscription. Returns how
    /// many were started.
    pub fn subscribe_all(&self) -> NetResult<usize> {
        let devices = self.cache.load_devices()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        subscriptions.retain(|_, s| !s.is_finished());

        let mut started = 0;
        for device in devices {
            let authority = device.authority();
            if subscriptions.contains_key(&authority) {
                continue;
            }
            let subscription =
                PushSubscription::spawn(&authority, self.backoff.clone(), self.updates_tx.clone());
            subscriptions.insert(authority, subscription);
            started += 1;
        }
        Ok(started)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Cancel every subscription
    pub fn unsubscribe_all(&self) {
        for (_, subscription) in self.subscriptions.lock().unwrap().drain() {
            subscription.cancel();
        }
    }
}
