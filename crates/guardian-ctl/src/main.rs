//! guardian-ctl - controller command line
//!
//! Discovers agents on the local network, keeps a cache of known devices,
//! pushes policy to them and follows their push events.

mod render;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use guardian_api::Category;
use guardian_config::{ControllerConfig, load_config_or_default, load_rule_set};
use guardian_net::{Backoff, ClientOptions, DeviceClient, DeviceRegistry, browse};
use guardian_store::{DeviceRecord, SqliteStore};
use guardian_util::{TargetId, default_config_path};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

const MINUTE_MS: i64 = 60_000;

/// guardian-ctl - manage agents from the controller
#[derive(Parser, Debug)]
#[command(name = "guardian-ctl")]
#[command(about = "Discover agents, push policy and follow their events", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/guardian/config.toml)
    #[arg(short, long, env = "GUARDIAN_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override
    #[arg(short, long, env = "GUARDIAN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Browse the local network for agents and merge them into the cache
    Discover {
        /// Browse time in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// List cached devices
    List,

    /// Add a device by address
    Add {
        name: String,
        address: String,
        #[arg(long, default_value_t = guardian_api::AGENT_PORT)]
        port: u16,
    },

    /// Give a device a local name; omit the name to go back to the discovered one
    Rename { device: String, name: Option<String> },

    /// Forget a device
    Remove { device: String },

    /// Overview of every device, or details of one
    Status { device: Option<String> },

    /// Today's usage report
    Report { device: String },

    /// Engage the device-wide lock
    Lock { device: String },

    /// Release the device-wide lock
    Unlock { device: String },

    /// Rule sets
    Rules {
        #[command(subcommand)]
        action: RulesCmd,
    },

    /// Allowance timers; zero minutes clears the timer
    Timer {
        #[command(subcommand)]
        action: TimerCmd,
    },

    /// Override the category of a target
    Category {
        device: String,
        target: String,
        #[arg(value_parser = parse_category)]
        category: Category,
    },

    /// Approve an unlock request
    Approve {
        device: String,
        /// Scope the approval to one target
        #[arg(long)]
        target: Option<String>,
        /// Length of the unlock (default 10 minutes)
        #[arg(long)]
        minutes: Option<i64>,
    },

    /// Deny an unlock request
    Deny {
        device: String,
        #[arg(long)]
        target: Option<String>,
    },

    /// Hide the agent's launcher entry
    Hide { device: String },

    /// Show the agent's launcher entry again
    Unhide { device: String },

    /// Change the name the agent reports for itself
    Name { device: String, name: String },

    /// Set the agent locale; every device when none is given
    Locale {
        code: String,
        #[arg(long)]
        device: Option<String>,
    },

    /// Clear the agent's local PIN
    ResetPin { device: String },

    /// Check that a device answers
    Ping { device: String },

    /// Follow push events from every cached device until interrupted
    Watch,
}

#[derive(Subcommand, Debug)]
enum RulesCmd {
    /// Replace the device's rules with those in a TOML or JSON file
    Push { device: String, file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum TimerCmd {
    App {
        device: String,
        target: String,
        minutes: i64,
    },
    Category {
        device: String,
        #[arg(value_parser = parse_category)]
        category: Category,
        minutes: i64,
    },
}

fn parse_category(s: &str) -> Result<Category, String> {
    guardian_config::parse_category(s).map_err(|e| e.to_string())
}

struct Controller {
    registry: DeviceRegistry,
    updates: tokio::sync::mpsc::UnboundedReceiver<guardian_net::PushMessage>,
    config: ControllerConfig,
}

impl Controller {
    fn open(config: ControllerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;
        let db_path = config.database_path();
        let cache = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open device cache {:?}", db_path))?;
        debug!(db_path = %db_path.display(), "Device cache opened");

        let options = ClientOptions {
            request_timeout: config.request_timeout,
            max_concurrent: config.max_requests_per_agent,
        };
        let backoff = Backoff::new(
            config.backoff_initial,
            config.backoff_factor,
            config.backoff_max,
        );
        let (registry, updates) = DeviceRegistry::new(Arc::new(cache), options, backoff)?;

        Ok(Self {
            registry,
            updates,
            config,
        })
    }

    fn device(&self, selector: &str) -> Result<DeviceRecord> {
        self.registry
            .find(selector)?
            .ok_or_else(|| anyhow!("Unknown device '{}' (see `guardian-ctl list`)", selector))
    }

    fn client(&self, selector: &str) -> Result<DeviceClient> {
        Ok(self.registry.client(&self.device(selector)?))
    }

    async fn run(mut self, command: Cmd) -> Result<()> {
        match command {
            Cmd::Discover { timeout } => {
                let timeout = timeout
                    .map(std::time::Duration::from_secs)
                    .unwrap_or(self.config.discovery_timeout);
                let found = browse(timeout).await.context("Discovery failed")?;
                println!("Found {} agent(s)", found.len());
                for device in self.registry.reconcile(&found)? {
                    println!("{}", render::device_line(&device));
                }
            }

            Cmd::List => {
                let devices = self.registry.devices()?;
                if devices.is_empty() {
                    println!("No devices; run `guardian-ctl discover` or `guardian-ctl add`");
                }
                for device in devices {
                    println!("{}", render::device_line(&device));
                }
            }

            Cmd::Add {
                name,
                address,
                port,
            } => {
                let record = self.registry.add(&name, &address, port)?;
                println!("Added {}", render::device_line(&record));
            }

            Cmd::Rename { device, name } => {
                let record = self.device(&device)?;
                self.registry.rename(&record, name.as_deref())?;
                println!("Renamed {}", record.authority());
            }

            Cmd::Remove { device } => {
                let record = self.device(&device)?;
                self.registry.remove(&record)?;
                println!("Removed {}", record.display_name());
            }

            Cmd::Status { device: None } => {
                for summary in self.registry.summaries().await? {
                    println!("{}", render::summary_line(&summary));
                }
            }

            Cmd::Status {
                device: Some(device),
            } => {
                let stats = self.client(&device)?.stats(false).await?;
                print!("{}", render::stats(&stats, guardian_util::now_millis()));
            }

            Cmd::Report { device } => {
                let report = self.client(&device)?.daily_report().await?;
                print!("{}", render::report(&report));
            }

            Cmd::Lock { device } => acknowledge(self.client(&device)?.set_lock(true).await?),
            Cmd::Unlock { device } => acknowledge(self.client(&device)?.set_lock(false).await?),

            Cmd::Rules {
                action: RulesCmd::Push { device, file },
            } => {
                let rule_set = load_rule_set(&file, &guardian_util::now())
                    .with_context(|| format!("Invalid rule file {:?}", file))?;
                let count = rule_set.rules.len();
                acknowledge(self.client(&device)?.update_rules(rule_set).await?);
                println!("{} rule(s) pushed", count);
            }

            Cmd::Timer {
                action:
                    TimerCmd::App {
                        device,
                        target,
                        minutes,
                    },
            } => acknowledge(
                self.client(&device)?
                    .set_app_timer(TargetId::new(target), minutes.saturating_mul(MINUTE_MS))
                    .await?,
            ),

            Cmd::Timer {
                action:
                    TimerCmd::Category {
                        device,
                        category,
                        minutes,
                    },
            } => acknowledge(
                self.client(&device)?
                    .set_category_timer(category, minutes.saturating_mul(MINUTE_MS))
                    .await?,
            ),

            Cmd::Category {
                device,
                target,
                category,
            } => acknowledge(
                self.client(&device)?
                    .set_app_category(TargetId::new(target), category)
                    .await?,
            ),

            Cmd::Approve {
                device,
                target,
                minutes,
            } => {
                if minutes.is_some_and(|m| m <= 0) {
                    bail!("--minutes must be positive");
                }
                acknowledge(
                    self.client(&device)?
                        .approve_unlock(minutes.map(|m| m.saturating_mul(MINUTE_MS)), target.map(TargetId::new))
                        .await?,
                )
            }

            Cmd::Deny { device, target } => acknowledge(
                self.client(&device)?
                    .deny_unlock(target.map(TargetId::new))
                    .await?,
            ),

            Cmd::Hide { device } => {
                acknowledge(self.client(&device)?.set_launcher_hidden(true).await?)
            }
            Cmd::Unhide { device } => {
                acknowledge(self.client(&device)?.set_launcher_hidden(false).await?)
            }

            Cmd::Name { device, name } => {
                acknowledge(self.client(&device)?.rename(&name).await?)
            }

            Cmd::Locale {
                code,
                device: Some(device),
            } => acknowledge(self.client(&device)?.set_language(&code).await?),

            Cmd::Locale { code, device: None } => {
                let mut failed = 0;
                for (record, outcome) in self.registry.sync_locale(&code).await? {
                    match outcome {
                        Ok(()) => println!("{:<24} ok", record.display_name()),
                        Err(e) => {
                            failed += 1;
                            println!("{:<24} failed: {}", record.display_name(), e);
                        }
                    }
                }
                if failed > 0 {
                    bail!("{} device(s) did not take the new locale", failed);
                }
            }

            Cmd::ResetPin { device } => acknowledge(self.client(&device)?.reset_pin().await?),

            Cmd::Ping { device } => {
                let started = std::time::Instant::now();
                let reply = self.client(&device)?.ping().await?;
                println!("{} in {} ms", reply, started.elapsed().as_millis());
            }

            Cmd::Watch => self.watch().await?,
        }

        Ok(())
    }

    async fn watch(&mut self) -> Result<()> {
        let started = self.registry.subscribe_all()?;
        if started == 0 {
            bail!("No devices to watch; run `guardian-ctl discover` first");
        }

        let names: std::collections::HashMap<String, String> = self
            .registry
            .devices()?
            .into_iter()
            .map(|d| (d.authority(), d.display_name().to_string()))
            .collect();

        loop {
            tokio::select! {
                message = self.updates.recv() => {
                    let Some(message) = message else { break };
                    let name = names
                        .get(&message.authority)
                        .map(String::as_str)
                        .unwrap_or(&message.authority);
                    println!(
                        "{} {:<24} {}",
                        render::timestamp(guardian_util::now_millis()),
                        name,
                        render::push_update(&message.update)
                    );
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.registry.unsubscribe_all();
        Ok(())
    }
}

fn acknowledge(response: guardian_api::Response) {
    println!("{}", response.message.as_deref().unwrap_or("OK"));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config_or_default(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?
        .controller;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    Controller::open(config)?.run(args.command).await
}
