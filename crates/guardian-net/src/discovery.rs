//! Zero-configuration discovery over mDNS

use guardian_api::{SERVICE_NAME_PREFIX, SERVICE_TYPE};
use guardian_store::DeviceRecord;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::NetResult;

/// Advertised instance name for a given uniqueness suffix
pub fn instance_name(suffix: i64) -> String {
    format!("{}{}", SERVICE_NAME_PREFIX, suffix)
}

/// Keeps the agent advertised for as long as it lives
pub struct Advertiser {
    daemon: ServiceDaemon,
    name: String,
    fullname: String,
}

impl Advertiser {
    /// Advertise `port` under a fresh `PG_Child_<millis>` name
    pub fn start(port: u16) -> NetResult<Self> {
        Self::start_named(instance_name(guardian_util::now_millis()), port)
    }

    pub fn start_named(name: String, port: u16) -> NetResult<Self> {
        let daemon = ServiceDaemon::new()?;
        let info = advertised_service(&name, port, &[])?;
        let fullname = info.get_fullname().to_string();

        daemon.register(info)?;
        info!(name = %name, port, "Advertising agent");

        Ok(Self {
            daemon,
            name,
            fullname,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Withdraw the advertisement
    pub fn stop(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!(error = %e, "Failed to withdraw advertisement");
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
        info!(name = %self.name, "Advertisement withdrawn");
    }
}

/// The record announced for agent `name`. With no `addresses` the daemon
/// fills in those of every interface.
pub fn advertised_service(name: &str, port: u16, addresses: &[IpAddr]) -> NetResult<ServiceInfo> {
    let host = format!("{}.local.", name);
    let info = ServiceInfo::new(
        SERVICE_TYPE,
        name,
        &host,
        addresses,
        port,
        HashMap::<String, String>::new(),
    )?;
    Ok(if addresses.is_empty() {
        info.enable_addr_auto()
    } else {
        info
    })
}

/// An agent found on the local network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAgent {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
}

impl DiscoveredAgent {
    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord::new(&self.name, self.address.to_string(), self.port)
    }
}

/// Turn a resolved service into an agent, if it is one of ours
fn agent_from(info: &ServiceInfo) -> Option<DiscoveredAgent> {
    let fullname = info.get_fullname();
    let name = fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|n| n.trim_end_matches('.'))
        .unwrap_or(fullname);
    if !name.starts_with(SERVICE_NAME_PREFIX) {
        return None;
    }

    // Prefer IPv4; pick deterministically among several
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort_by_key(|a| (a.is_ipv6(), *a));
    let address = addresses.into_iter().next()?;

    Some(DiscoveredAgent {
        name: name.to_string(),
        address,
        port: info.get_port(),
    })
}

/// Browse for agents for `timeout` and return everything resolved
pub async fn browse(timeout: Duration) -> NetResult<Vec<DiscoveredAgent>> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(SERVICE_TYPE)?;

    let found = tokio::task::spawn_blocking(move || {
        let deadline = Instant::now() + timeout;
        let mut found: BTreeMap<String, DiscoveredAgent> = BTreeMap::new();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    if let Some(agent) = agent_from(&info) {
                        debug!(name = %agent.name, address = %agent.address, port = agent.port, "Agent resolved");
                        found.insert(agent.name.clone(), agent);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        found.into_values().collect::<Vec<_>>()
    })
    .await
    .map_err(|e| crate::NetError::Discovery(e.to_string()))?;

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();

    info!(count = found.len(), "Discovery finished");
    Ok(found)
}
