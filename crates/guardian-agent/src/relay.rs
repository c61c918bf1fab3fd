//! Forwarding of host and enforcement notifications to push subscribers

use guardian_api::Event;
use guardian_core::CoreEvent;
use guardian_host_api::HostEvent;
use guardian_net::EventHub;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Wire event for a host notification, if subscribers care about it
pub fn host_event_to_wire(event: &HostEvent, now_ms: i64) -> Option<Event> {
    match event {
        HostEvent::BatteryChanged(level) => Some(Event::battery_changed(*level, now_ms)),
        HostEvent::TargetInstalled(target) => Some(Event::app_installed(target, now_ms)),
        HostEvent::TargetRemoved(target) => Some(Event::app_removed(target, now_ms)),
        HostEvent::WindowsChanged => None,
    }
}

/// Wire event for an enforcement outcome, if any
pub fn core_event_to_wire(event: &CoreEvent, now_ms: i64) -> Option<Event> {
    match event {
        CoreEvent::LockReleased => Some(Event::lock_status_changed(false, now_ms)),
        _ => None,
    }
}

/// Publish host and core notifications until shutdown or until both
/// sources close
pub async fn relay_events(
    hub: Arc<EventHub>,
    mut host_events: mpsc::UnboundedReceiver<HostEvent>,
    mut core_events: mpsc::UnboundedReceiver<CoreEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut host_open = true;
    let mut core_open = true;

    while host_open || core_open {
        tokio::select! {
            event = host_events.recv(), if host_open => match event {
                Some(event) => {
                    if let Some(wire) = host_event_to_wire(&event, guardian_util::now_millis()) {
                        hub.publish(wire);
                    }
                }
                None => host_open = false,
            },
            event = core_events.recv(), if core_open => match event {
                Some(event) => {
                    debug!(?event, "Enforcement event");
                    if let Some(wire) = core_event_to_wire(&event, guardian_util::now_millis()) {
                        hub.publish(wire);
                    }
                }
                None => core_open = false,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_api::EventType;
    use guardian_util::TargetId;
    use std::time::Duration;

    #[test]
    fn window_changes_stay_local() {
        assert!(host_event_to_wire(&HostEvent::WindowsChanged, 1).is_none());
        assert!(core_event_to_wire(&CoreEvent::OverlayHidden, 1).is_none());
    }

    #[tokio::test]
    async fn relays_to_subscribers() {
        let hub = Arc::new(EventHub::new());
        let (_id, mut rx) = hub.register("127.0.0.1:1".parse().unwrap()).await;
        let (host_tx, host_rx) = mpsc::unbounded_channel();
        let (core_tx, core_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let relay = tokio::spawn(relay_events(hub.clone(), host_rx, core_rx, shutdown_rx));

        host_tx.send(HostEvent::WindowsChanged).unwrap();
        host_tx
            .send(HostEvent::TargetInstalled(TargetId::new("game")))
            .unwrap();
        core_tx.send(CoreEvent::LockReleased).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let mut kinds = vec![first.event_type, second.event_type];
        kinds.sort_by_key(|k| format!("{:?}", k));
        assert_eq!(kinds, vec![EventType::AppInstalled, EventType::LockStatusChanged]);

        // Both sources closing ends the relay
        drop(host_tx);
        drop(core_tx);
        tokio::time::timeout(Duration::from_secs(2), relay)
            .await
            .unwrap()
            .unwrap();
    }
}
