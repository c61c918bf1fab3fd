//! Controller-side push subscription to one agent's `/events` channel

use futures_util::StreamExt;
use guardian_api::{Event, Packet, Route};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::{NetError, NetResult};

/// Exponential reconnect delay: starts at `initial`, grows by `factor` after
/// each failure up to `max`, and goes back to `initial` on [`reset`].
///
/// [`reset`]: Backoff::reset
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            factor: factor.max(1.0),
            max,
            current: initial.min(max),
        }
    }

    /// Delay to wait now; the following one grows
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 1.5, Duration::from_secs(60))
    }
}

/// What a subscription reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum PushUpdate {
    Connected,
    Event(Event),
    Disconnected { error: String, retry_in: Duration },
}

/// An update tagged with the agent it came from
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub authority: String,
    pub update: PushUpdate,
}

/// Long-lived subscription that reconnects with backoff until cancelled.
/// Dropping it cancels it.
pub struct PushSubscription {
    authority: String,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PushSubscription {
    pub fn spawn(
        authority: impl Into<String>,
        backoff: Backoff,
        updates: mpsc::UnboundedSender<PushMessage>,
    ) -> Self {
        let authority = authority.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(run(authority.clone(), backoff, updates, cancel_rx));
        Self {
            authority,
            cancel_tx,
            handle,
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop reconnecting and close the current connection
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
        self.handle.abort();
    }
}

impl Drop for PushSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(
    authority: String,
    mut backoff: Backoff,
    updates: mpsc::UnboundedSender<PushMessage>,
    mut cancel: watch::Receiver<bool>,
) {
    let url = format!("ws://{}{}", authority, Route::Events.path());
    let send = |update: PushUpdate| {
        updates
            .send(PushMessage {
                authority: authority.clone(),
                update,
            })
            .is_ok()
    };

    loop {
        let outcome = tokio::select! {
            outcome = session(&url, &mut backoff, &send) => outcome,
            _ = crate::raised(&mut cancel) => return,
        };

        let error = match outcome {
            Ok(()) => "closed by agent".to_string(),
            Err(e) => e.to_string(),
        };
        let retry_in = backoff.next_delay();
        debug!(%url, %error, ?retry_in, "Push channel down");
        if !send(PushUpdate::Disconnected { error, retry_in }) {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_in) => {}
            _ = crate::raised(&mut cancel) => return,
        }
    }
}

async fn session(
    url: &str,
    backoff: &mut Backoff,
    send: &impl Fn(PushUpdate) -> bool,
) -> NetResult<()> {
    let (mut stream, _) = connect_async(url).await?;
    backoff.reset();
    info!(%url, "Push channel connected");
    if !send(PushUpdate::Connected) {
        return Ok(());
    }

    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match Packet::from_json(&text) {
                Ok(Packet::Event(event)) => {
                    if !send(PushUpdate::Event(event)) {
                        return Ok(());
                    }
                }
                Ok(other) => debug!(%url, ?other, "Ignoring non-event frame"),
                Err(e) => warn!(%url, error = %e, "Undecodable push frame"),
            },
            Message::Close(_) => return Ok(()),
            _ => {}
        }
    }

    Err(NetError::WebSocket("stream ended".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandHandler, CommandServer, EventHub};
    use async_trait::async_trait;
    use guardian_api::{AgentCommand, Response};
    use std::sync::Arc;

    #[test]
    fn backoff_grows_caps_and_resets() {
        let mut backoff = Backoff::default();

        assert_eq!(backoff.next_delay(), Duration::from_millis(5_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(7_500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(11_250));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    struct Idle;

    #[async_trait]
    impl CommandHandler for Idle {
        async fn stats(&self, _include_icons: bool) -> Response {
            Response::ok()
        }
        async fn daily_report(&self) -> Response {
            Response::ok()
        }
        async fn execute(&self, _command: AgentCommand) -> Response {
            Response::ok()
        }
    }

    async fn next_update(rx: &mut mpsc::UnboundedReceiver<PushMessage>) -> PushUpdate {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .update
    }

    #[tokio::test]
    async fn receives_published_events() {
        let hub = Arc::new(EventHub::new());
        let server = CommandServer::bind("127.0.0.1:0".parse().unwrap(), Arc::new(Idle), hub.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(server.serve(shutdown_rx));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = PushSubscription::spawn(addr.to_string(), Backoff::default(), tx);
        assert_eq!(next_update(&mut rx).await, PushUpdate::Connected);

        // The session registers right after the upgrade
        while hub.subscriber_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let event = Event::battery_changed(77, 1);
        hub.publish(event.clone());
        assert_eq!(next_update(&mut rx).await, PushUpdate::Event(event));

        subscription.cancel();
        assert!(tokio::time::timeout(Duration::from_secs(5), async {
            while hub.subscriber_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn unreachable_agent_is_retried_with_backoff() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backoff = Backoff::new(Duration::from_millis(10), 2.0, Duration::from_millis(40));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = PushSubscription::spawn(addr.to_string(), backoff, tx);

        let mut delays = Vec::new();
        for _ in 0..4 {
            match next_update(&mut rx).await {
                PushUpdate::Disconnected { retry_in, .. } => delays.push(retry_in.as_millis()),
                other => panic!("unexpected update {:?}", other),
            }
        }
        assert_eq!(delays, vec![10, 20, 40, 40]);
    }
}
