//! Push fan-out for the `/events` channel

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use guardian_api::{Event, Packet};
use guardian_util::SubscriberId;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, broadcast, watch};
use tracing::{debug, info, warn};

/// Events buffered per session before a slow session starts losing them
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    pub connected_at_ms: i64,
}

/// Fans locally originated events out to every connected session.
///
/// Each session owns its own broadcast receiver and writer, so a slow or
/// broken session never delays delivery to the others.
pub struct EventHub {
    sessions: RwLock<HashMap<SubscriberId, SessionInfo>>,
    event_tx: broadcast::Sender<Event>,
    closed_tx: watch::Sender<bool>,
}

impl EventHub {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (closed_tx, _) = watch::channel(false);
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_tx,
            closed_tx,
        }
    }

    /// Deliver `event` to every session. Returns how many sessions it was
    /// queued for; having none is not an error.
    pub fn publish(&self, event: Event) -> usize {
        let event_type = event.event_type;
        match self.event_tx.send(event) {
            Ok(receivers) => {
                debug!(?event_type, receivers, "Event published");
                receivers
            }
            Err(_) => {
                debug!(?event_type, "Event published with no subscribers");
                0
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn sessions(&self) -> Vec<(SubscriberId, SessionInfo)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }

    /// Add a session to the fan-out set
    pub async fn register(&self, peer: SocketAddr) -> (SubscriberId, broadcast::Receiver<Event>) {
        let id = SubscriberId::new();
        let events = self.event_tx.subscribe();
        self.sessions.write().await.insert(
            id,
            SessionInfo {
                peer,
                connected_at_ms: guardian_util::now_millis(),
            },
        );
        info!(subscriber = %id, %peer, "Subscriber connected");
        (id, events)
    }

    pub async fn unregister(&self, id: SubscriberId) {
        if self.sessions.write().await.remove(&id).is_some() {
            info!(subscriber = %id, "Subscriber disconnected");
        }
    }

    /// Ask every session to close
    pub fn close_all(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Pump events into one upgraded WebSocket until either side goes away
    pub async fn serve_session(&self, socket: WebSocket, peer: SocketAddr) {
        let (id, mut events) = self.register(peer).await;
        let mut closed = self.closed_tx.subscribe();
        let (mut sink, mut incoming) = socket.split();

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        let frame = match Packet::from(event).to_json() {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(subscriber = %id, error = %e, "Failed to encode event");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            debug!(subscriber = %id, error = %e, "Send failed, dropping session");
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(subscriber = %id, skipped, "Subscriber lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
                frame = incoming.next() => match frame {
                    // The client never sends anything meaningful; pings are
                    // answered by the WebSocket layer
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(subscriber = %id, error = %e, "Receive failed, dropping session");
                        break;
                    }
                },
                _ = crate::raised(&mut closed) => break,
            }
        }

        self.unregister(id).await;
        let _ = sink.close().await;
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let hub = EventHub::new();
        assert_eq!(hub.publish(Event::battery_changed(50, 1)), 0);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn dropped_session_does_not_affect_others() {
        let hub = EventHub::new();
        let (first, first_rx) = hub.register(peer()).await;
        let (_second, mut second_rx) = hub.register(peer()).await;
        assert_eq!(hub.subscriber_count().await, 2);

        // First session goes away while the event is in flight
        drop(first_rx);
        hub.unregister(first).await;

        let event = Event::lock_status_changed(true, 42);
        assert_eq!(hub.publish(event.clone()), 1);
        assert_eq!(second_rx.recv().await.unwrap(), event);
        assert_eq!(hub.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn slow_session_lags_instead_of_blocking() {
        let hub = EventHub::new();
        let (_id, mut rx) = hub.register(peer()).await;

        for i in 0..(EVENT_CHANNEL_CAPACITY as i64 + 5) {
            hub.publish(Event::battery_changed(10, i));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(5))));
        assert_eq!(rx.recv().await.unwrap().timestamp, 5);
    }
}
