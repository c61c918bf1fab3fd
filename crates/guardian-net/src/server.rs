//! HTTP command server
//!
//! Every body, in and out, is a [`Packet`]. Replies are always HTTP 200 with
//! a `success` flag; the only exception is the agent-local unlock request,
//! which is refused to non-loopback peers.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use guardian_api::{AgentCommand, Packet, Response, Route};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{EventHub, NetResult};

/// Executes validated commands on behalf of the server
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Full device status
    async fn stats(&self, include_icons: bool) -> Response;

    /// Today's usage report
    async fn daily_report(&self) -> Response;

    /// Apply one mutation (or ping)
    async fn execute(&self, command: AgentCommand) -> Response;
}

#[derive(Clone)]
struct ServerState {
    handler: Arc<dyn CommandHandler>,
    hub: Arc<EventHub>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    #[serde(default)]
    include_icons: Option<bool>,
}

fn reply(response: Response) -> Json<Packet> {
    Json(Packet::Response(response))
}

/// Parse, route-check and validate a body, then hand it to the handler.
/// Anything short of a well-formed command for this route is answered with
/// the generic invalid-command failure.
async fn dispatch(state: &ServerState, route: Route, body: &[u8]) -> Response {
    let command = match Packet::parse_command(body) {
        Ok(command) => command,
        Err(e) => {
            debug!(path = route.path(), error = %e, "Rejected body");
            return Response::invalid_command();
        }
    };

    if !route.accepts(command.command_type) {
        debug!(path = route.path(), command = ?command.command_type, "Command not accepted on route");
        return Response::invalid_command();
    }

    match AgentCommand::try_from(command) {
        Ok(command) => state.handler.execute(command).await,
        Err(e) => {
            debug!(path = route.path(), error = %e, "Invalid command");
            Response::invalid_command()
        }
    }
}

async fn stats(State(state): State<ServerState>, Query(query): Query<StatsQuery>) -> Json<Packet> {
    reply(state.handler.stats(query.include_icons.unwrap_or(false)).await)
}

async fn daily_report(State(state): State<ServerState>) -> Json<Packet> {
    reply(state.handler.daily_report().await)
}

async fn rules(State(state): State<ServerState>, body: Bytes) -> Json<Packet> {
    reply(dispatch(&state, Route::Rules, &body).await)
}

async fn lock(State(state): State<ServerState>, body: Bytes) -> Json<Packet> {
    reply(dispatch(&state, Route::Lock, &body).await)
}

async fn device_name(State(state): State<ServerState>, body: Bytes) -> Json<Packet> {
    reply(dispatch(&state, Route::DeviceName, &body).await)
}

async fn unlock_response(State(state): State<ServerState>, body: Bytes) -> Json<Packet> {
    reply(dispatch(&state, Route::UnlockResponse, &body).await)
}

async fn hide(State(state): State<ServerState>) -> Json<Packet> {
    reply(
        state
            .handler
            .execute(AgentCommand::SetLauncherHidden { hidden: true })
            .await,
    )
}

async fn unhide(State(state): State<ServerState>) -> Json<Packet> {
    reply(
        state
            .handler
            .execute(AgentCommand::SetLauncherHidden { hidden: false })
            .await,
    )
}

async fn reset_pin(State(state): State<ServerState>) -> Json<Packet> {
    reply(state.handler.execute(AgentCommand::ResetPin).await)
}

async fn ping(State(state): State<ServerState>) -> Json<Packet> {
    reply(state.handler.execute(AgentCommand::Ping).await)
}

async fn request_unlock(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> impl IntoResponse {
    if !peer.ip().is_loopback() {
        warn!(%peer, "Refused unlock request from remote peer");
        return (
            StatusCode::FORBIDDEN,
            reply(Response::failure("Local requests only")),
        );
    }
    (
        StatusCode::OK,
        reply(dispatch(&state, Route::RequestUnlock, &body).await),
    )
}

async fn events(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move { hub.serve_session(socket, peer).await })
}

/// Build the agent's router
pub fn router(handler: Arc<dyn CommandHandler>, hub: Arc<EventHub>) -> Router {
    Router::new()
        .route(Route::Stats.path(), get(stats))
        .route(Route::DailyReport.path(), get(daily_report))
        .route(Route::Rules.path(), post(rules))
        .route(Route::Lock.path(), post(lock))
        .route(Route::Hide.path(), post(hide))
        .route(Route::Unhide.path(), post(unhide))
        .route(Route::DeviceName.path(), post(device_name))
        .route(Route::UnlockResponse.path(), post(unlock_response))
        .route(Route::ResetPin.path(), post(reset_pin))
        .route(Route::Ping.path(), get(ping))
        .route(Route::RequestUnlock.path(), post(request_unlock))
        .route(Route::Events.path(), get(events))
        .with_state(ServerState { handler, hub })
}

/// The agent's HTTP + WebSocket server
pub struct CommandServer {
    listener: TcpListener,
    router: Router,
    hub: Arc<EventHub>,
}

impl CommandServer {
    /// Bind `addr`; port 0 picks an ephemeral port
    pub async fn bind(
        addr: SocketAddr,
        handler: Arc<dyn CommandHandler>,
        hub: Arc<EventHub>,
    ) -> NetResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let router = router(handler, hub.clone());
        Ok(Self {
            listener,
            router,
            hub,
        })
    }

    pub fn local_addr(&self) -> NetResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` flips to `true`. Open push sessions are closed
    /// on the way out.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> NetResult<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, "Command server listening");

        let hub = self.hub;
        axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|s| *s).await;
            hub.close_all();
        })
        .await?;

        info!("Command server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_api::{Command, CommandType};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        executed: Mutex<Vec<AgentCommand>>,
    }

    #[async_trait]
    impl CommandHandler for Recorder {
        async fn stats(&self, _include_icons: bool) -> Response {
            Response::ok()
        }

        async fn daily_report(&self) -> Response {
            Response::ok()
        }

        async fn execute(&self, command: AgentCommand) -> Response {
            self.executed.lock().unwrap().push(command);
            Response::ok_with_message("done")
        }
    }

    fn state() -> (ServerState, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            ServerState {
                handler: recorder.clone(),
                hub: Arc::new(EventHub::new()),
            },
            recorder,
        )
    }

    fn body(command: Command) -> Vec<u8> {
        Packet::from(command).to_json().unwrap().into_bytes()
    }

    #[tokio::test]
    async fn dispatch_executes_accepted_command() {
        let (state, recorder) = state();

        let response = dispatch(&state, Route::Lock, &body(Command::set_lock(true))).await;

        assert!(response.success);
        assert_eq!(
            recorder.executed.lock().unwrap().as_slice(),
            &[AgentCommand::SetLock { locked: true }]
        );
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_command() {
        let (state, recorder) = state();

        let response = dispatch(&state, Route::Rules, b"{not json").await;

        assert_eq!(response, Response::invalid_command());
        assert!(recorder.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_companion_field_is_invalid_command() {
        let (state, recorder) = state();

        // UPDATE_DEVICE_NAME without a deviceName
        let command = Command::new(CommandType::UpdateDeviceName);
        let response = dispatch(&state, Route::DeviceName, &body(command)).await;

        assert_eq!(response, Response::invalid_command());
        assert!(recorder.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn command_on_wrong_route_is_rejected() {
        let (state, recorder) = state();

        let response = dispatch(&state, Route::Rules, &body(Command::set_lock(true))).await;

        assert!(!response.success);
        assert!(recorder.executed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn response_packet_is_not_a_command() {
        let (state, _) = state();
        let raw = Packet::from(Response::ok()).to_json().unwrap();

        let response = dispatch(&state, Route::Lock, raw.as_bytes()).await;

        assert_eq!(response, Response::invalid_command());
    }
}
