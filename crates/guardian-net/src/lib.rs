//! Network layer for guardian
//!
//! Agent side:
//! - HTTP command server (one route per command family)
//! - `/events` WebSocket push channel with best-effort fan-out
//! - mDNS advertisement
//!
//! Controller side:
//! - Per-agent command client (bounded concurrency, no retry)
//! - Push subscription with exponential backoff
//! - mDNS browsing and the cached device registry

mod client;
mod discovery;
mod hub;
mod registry;
mod server;
mod subscription;

pub use client::*;
pub use discovery::*;
pub use hub::*;
pub use registry::*;
pub use server::*;
pub use subscription::*;

use guardian_api::ApiError;
use guardian_store::StoreError;
use thiserror::Error;

/// Network errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ApiError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Timed out: {0}")]
    Timeout(&'static str),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<tokio_tungstenite::tungstenite::Error> for NetError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        NetError::WebSocket(e.to_string())
    }
}

impl From<mdns_sd::Error> for NetError {
    fn from(e: mdns_sd::Error) -> Self {
        NetError::Discovery(e.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;

/// Resolves once `flag` is `true` or its sender is gone. The guard returned
/// by `wait_for` is dropped inside, so the future stays `Send` when used in
/// a `select!` arm.
pub(crate) async fn raised(flag: &mut tokio::sync::watch::Receiver<bool>) {
    let _ = flag.wait_for(|v| *v).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::watch;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn raised_waits_for_true() {
        let (tx, mut rx) = watch::channel(false);
        assert_send(&raised(&mut rx));

        let waiter = tokio::spawn(async move { raised(&mut rx).await });
        tx.send_replace(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        tx.send_replace(true);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn raised_returns_when_sender_drops() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), raised(&mut rx))
            .await
            .unwrap();
    }
}
