//! guardian-agentd - on-device policy enforcement
//!
//! Wires together:
//! - Configuration loading
//! - Store initialization and policy restore
//! - Linux host adapter and its monitor
//! - Enforcement loop and window guard
//! - HTTP command server, push channel and mDNS advertisement

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guardian_agent::{AgentService, relay_events};
use guardian_config::{AgentConfig, load_config_or_default};
use guardian_core::{CategoryResolver, Enforcer, PolicyEngine, PolicyStore, UsageAccounting, WindowGuard};
use guardian_host_api::{HostAdapter, NoAutomation};
use guardian_host_linux::{LinuxHost, LinuxHostConfig};
use guardian_net::{Advertiser, ClientOptions, CommandServer, DeviceClient, EventHub};
use guardian_store::{AuditEvent, AuditEventType, PinVault, SqliteStore, Store};
use guardian_util::{TargetId, default_config_path};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How long background tasks get to finish after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// guardian-agentd - parental-control agent
#[derive(Parser, Debug)]
#[command(name = "guardian-agentd")]
#[command(about = "On-device policy enforcement and command server", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/guardian/config.toml)
    #[arg(short, long, env = "GUARDIAN_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override
    #[arg(short, long, env = "GUARDIAN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Run the agent (default)
    Run,

    /// Set the local PIN protecting on-device settings
    SetPin { pin: String },

    /// Ask the controller for more time, through the running agent
    RequestUnlock {
        /// Scope the request to one target instead of the whole device
        #[arg(long)]
        target: Option<String>,

        /// Message shown to the controller
        #[arg(long)]
        message: Option<String>,
    },
}

fn load_agent_config(args: &Args) -> Result<AgentConfig> {
    let mut config = load_config_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?
        .agent;

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if config.device_name.is_none() {
        config.device_name = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok());
    }
    Ok(config)
}

fn open_store(config: &AgentConfig) -> Result<Arc<SqliteStore>> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

    let db_path = config.database_path();
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    info!(db_path = %db_path.display(), "Store initialized");
    Ok(Arc::new(store))
}

async fn run(config: AgentConfig) -> Result<()> {
    let store: Arc<dyn Store> = open_store(&config)?;
    store.append_audit(AuditEvent::new(AuditEventType::AgentStarted))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Host adapter
    let linux = Arc::new(LinuxHost::new(LinuxHostConfig::new(
        config.overlay_command.clone(),
        config.query_timeout,
        config.self_target.clone(),
    )));
    let host_events = linux
        .subscribe()
        .context("Host event stream already taken")?;
    let monitor = linux.start_monitor(config.sample_interval, shutdown_rx.clone());
    let host: Arc<dyn HostAdapter> = linux.clone();

    // Policy and enforcement
    let policy = Arc::new(PolicyStore::with_persistence(store.clone()));
    let resolver = CategoryResolver::new(config.categories.clone(), config.whitelist.clone());
    let engine = Arc::new(
        PolicyEngine::new(
            policy,
            UsageAccounting::new(host.clone(), config.query_timeout),
            resolver,
            config.self_target.clone(),
            config.warning_threshold,
        )
        .with_store(store.clone()),
    );

    let (core_tx, core_rx) = mpsc::unbounded_channel();
    let enforcer = Arc::new(
        Enforcer::new(host.clone(), engine.clone(), &config)
            .with_store(store.clone())
            .with_events(core_tx),
    );
    let guard = Arc::new(WindowGuard::new(
        host.clone(),
        Arc::new(NoAutomation),
        enforcer.clone(),
        &config,
    ));
    if config.settings_automation && !guard.settings_automation() {
        warn!("Settings automation requested but this host has no UI automation backend, force-stop flow disabled");
    }

    // Command server and push channel
    let hub = Arc::new(EventHub::new());
    let service = Arc::new(AgentService::new(
        host.clone(),
        engine,
        store.clone(),
        hub.clone(),
        &config,
    ));
    service.restore_profile().await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let server = CommandServer::bind(addr, service.clone(), hub.clone())
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let advertiser = match Advertiser::start(config.port) {
        Ok(advertiser) => Some(advertiser),
        Err(e) => {
            warn!(error = %e, "mDNS advertisement unavailable, controllers must add this device by address");
            None
        }
    };

    let (forward_tx, forward_rx) = mpsc::unbounded_channel();
    let tasks = vec![
        monitor,
        tokio::spawn(enforcer.run(shutdown_rx.clone())),
        tokio::spawn(guard.run(host_events, forward_tx, shutdown_rx.clone())),
        tokio::spawn(relay_events(hub, forward_rx, core_rx, shutdown_rx.clone())),
        tokio::spawn(async move {
            if let Err(e) = server.serve(shutdown_rx).await {
                warn!(error = %e, "Command server failed");
            }
        }),
    ];

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    info!(
        device_name = %service.device_name(),
        port = config.port,
        "Agent running"
    );

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        // Sent by sway on exit
        _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
    }

    shutdown_tx.send_replace(true);
    if let Some(advertiser) = advertiser {
        advertiser.stop();
    }

    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            abort.abort();
        }
    }

    // Never leave the screen covered once the agent is gone
    if host.overlay_visible()
        && let Err(e) = host.hide_overlay().await
    {
        warn!(error = %e, "Failed to remove overlay on shutdown");
    }

    if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::AgentStopped)) {
        warn!(error = %e, "Failed to log agent shutdown");
    }

    info!("Shutdown complete");
    Ok(())
}

fn set_pin(config: &AgentConfig, pin: &str) -> Result<()> {
    let store = open_store(config)?;
    PinVault::new(store).set(pin).context("Failed to set PIN")?;
    println!("PIN set");
    Ok(())
}

async fn request_unlock(config: &AgentConfig, target: Option<String>, message: Option<String>) -> Result<()> {
    let client = DeviceClient::new(&format!("127.0.0.1:{}", config.port), ClientOptions::default())?;
    let response = client
        .request_unlock(target.map(TargetId::new), message)
        .await
        .context("Unlock request failed")?;
    println!("{}", response.message.unwrap_or_else(|| "Request sent".into()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "guardian-agentd starting");

    if guardian_util::is_mock_time_active() {
        warn!(now = %guardian_util::now(), "Mock time is active, schedules and quotas follow it");
    }

    let config = load_agent_config(&args)?;

    match args.action.unwrap_or(Action::Run) {
        Action::Run => run(config).await,
        Action::SetPin { pin } => set_pin(&config, &pin),
        Action::RequestUnlock { target, message } => request_unlock(&config, target, message).await,
    }
}
