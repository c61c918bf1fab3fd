//! Command handling on the agent

use async_trait::async_trait;
use chrono::{DateTime, Local};
use guardian_api::{
    AgentCommand, DEFAULT_UNLOCK_DURATION_MS, DailyUsageReport, DeviceStats, Event, Response,
    RuleSet, TargetInfo, WarningKey,
};
use guardian_config::AgentConfig;
use guardian_core::{PolicyEngine, UsageView, build_report, hourly_breakdown};
use guardian_host_api::{HostAdapter, HostError};
use guardian_net::{CommandHandler, EventHub};
use guardian_store::{AgentProfile, AuditEvent, AuditEventType, PinVault, Store};
use guardian_util::{RateLimiter, TargetId, day_key, start_of_day};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Name used when neither the controller nor the config gave one
pub const FALLBACK_DEVICE_NAME: &str = "Guardian device";

/// Everything a controller command can touch
pub struct AgentService {
    host: Arc<dyn HostAdapter>,
    engine: Arc<PolicyEngine>,
    store: Arc<dyn Store>,
    pins: PinVault,
    hub: Arc<EventHub>,
    configured_name: String,
    profile: Mutex<AgentProfile>,
    /// Keyed by request scope: `None` for the whole device
    unlock_requests: Mutex<RateLimiter<Option<TargetId>>>,
}

impl AgentService {
    pub fn new(
        host: Arc<dyn HostAdapter>,
        engine: Arc<PolicyEngine>,
        store: Arc<dyn Store>,
        hub: Arc<EventHub>,
        config: &AgentConfig,
    ) -> Self {
        let profile = store.load_profile().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load agent profile, using defaults");
            AgentProfile::default()
        });

        Self {
            host,
            engine,
            pins: PinVault::new(store.clone()),
            store,
            hub,
            configured_name: config
                .device_name
                .clone()
                .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string()),
            profile: Mutex::new(profile),
            unlock_requests: Mutex::new(RateLimiter::new(1, config.unlock_request_cooldown)),
        }
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    /// Controller-assigned name, else the configured one
    pub fn device_name(&self) -> String {
        self.profile
            .lock()
            .unwrap()
            .device_name
            .clone()
            .unwrap_or_else(|| self.configured_name.clone())
    }

    /// Re-apply persisted profile settings to the host after a restart
    pub async fn restore_profile(&self) {
        let profile = self.profile.lock().unwrap().clone();

        if profile.launcher_hidden
            && let Err(e) = self.host.set_launcher_visible(false).await
        {
            warn!(error = %e, "Failed to re-hide launcher entry");
        }
        if let Some(code) = &profile.language_code {
            self.apply_locale(code).await;
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    fn update_profile(&self, f: impl FnOnce(&mut AgentProfile)) {
        let profile = {
            let mut profile = self.profile.lock().unwrap();
            f(&mut profile);
            profile.clone()
        };
        if let Err(e) = self.store.save_profile(&profile) {
            warn!(error = %e, "Failed to persist agent profile");
        }
    }

    async fn usage_today(&self, now: &DateTime<Local>) -> UsageView {
        match self.engine.usage().today(now).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Usage unavailable");
                UsageView::new(day_key(now), Vec::new())
            }
        }
    }

    async fn hourly_today(&self, now: &DateTime<Local>) -> Vec<guardian_api::HourlyUsage> {
        match self.engine.usage().hourly(now).await {
            Ok(hourly) => hourly,
            Err(e) => {
                warn!(error = %e, "Hourly usage unavailable");
                hourly_breakdown(&[], &start_of_day(now), now.timestamp_millis())
            }
        }
    }

    /// Full status snapshot
    pub async fn build_stats(&self, include_icons: bool) -> DeviceStats {
        let now = guardian_util::now();
        let now_ms = now.timestamp_millis();
        let snapshot = self.engine.policy().snapshot();
        let resolver = self.engine.resolver();

        let usage = self.usage_today(&now).await;
        let hourly = self.hourly_today(&now).await;
        let installed = match self.host.installed_targets(include_icons).await {
            Ok(installed) => installed,
            Err(e) => {
                warn!(error = %e, "Failed to list installed targets");
                Vec::new()
            }
        };
        let profile = self.profile.lock().unwrap().clone();

        DeviceStats {
            battery_level: self.host.battery_level().await,
            last_seen_timestamp: now_ms,
            usage_logs: usage.logs(resolver, &snapshot),
            installed_apps: installed
                .into_iter()
                .map(|i| TargetInfo {
                    category: resolver.resolve(&snapshot, &i.target),
                    target: i.target,
                    label: i.label,
                    system: i.system,
                    icon_base64: i.icon_base64,
                })
                .collect(),
            hourly_breakdown: hourly,
            active_rules: snapshot.rules.clone(),
            category_limits: snapshot.category_limits.clone(),
            global_lock_until: snapshot.global_lock.until_ms,
            temporary_unlock_until: snapshot.temporary_unlock_until,
            locked: snapshot.global_lock.is_active(now_ms),
            icon_hidden: profile.launcher_hidden,
            app_timers: snapshot.target_timers.clone(),
            category_timers: snapshot.category_timers.clone(),
            device_name: profile
                .device_name
                .unwrap_or_else(|| self.configured_name.clone()),
            language_code: profile.language_code,
        }
    }

    /// Today's report; blocked attempts come from the audit log
    pub async fn build_report(&self) -> DailyUsageReport {
        let now = guardian_util::now();
        let snapshot = self.engine.policy().snapshot();

        let usage = self.usage_today(&now).await;
        let hourly = self.hourly_today(&now).await;
        let blocked = self
            .store
            .count_blocks_since(start_of_day(&now))
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count blocks");
                0
            });

        build_report(
            day_key(&now),
            self.device_name(),
            usage.logs(self.engine.resolver(), &snapshot),
            hourly,
            blocked,
        )
    }

    fn publish_lock(&self, locked: bool, now_ms: i64) {
        self.hub.publish(Event::lock_status_changed(locked, now_ms));
    }

    async fn apply_locale(&self, code: &str) {
        match self.host.apply_locale(code).await {
            Ok(()) => {}
            Err(HostError::Unsupported) => debug!(code, "Host has no locale support"),
            Err(e) => warn!(code, error = %e, "Failed to apply locale"),
        }
    }

    fn replace_rules(&self, set: RuleSet, now_ms: i64) -> Response {
        let rule_count = set.rules.len();
        let limit_count = set.category_limits.len();

        let lock_engaged = self.engine.policy().replace_rule_set(set, now_ms);
        info!(rule_count, limit_count, "Rules replaced");
        self.audit(AuditEventType::RulesReplaced {
            rule_count,
            limit_count,
        });

        if lock_engaged {
            let until_ms = self.engine.policy().snapshot().global_lock.until_ms;
            self.audit(AuditEventType::LockChanged {
                locked: true,
                until_ms,
            });
            self.publish_lock(true, now_ms);
        }
        Response::ok_with_message("Rules updated")
    }

    fn set_lock(&self, locked: bool, now_ms: i64) -> Response {
        let flipped = self.engine.policy().set_global_lock(locked, 0);
        info!(locked, "Global lock set");
        self.audit(AuditEventType::LockChanged {
            locked,
            until_ms: 0,
        });
        if flipped {
            self.publish_lock(locked, now_ms);
        }
        Response::ok_with_message(if locked { "Device Locked" } else { "Device Unlocked" })
    }

    fn set_target_timer(&self, target: TargetId, duration_ms: i64, now_ms: i64) -> Response {
        let policy = self.engine.policy();
        if duration_ms > 0 {
            let expires_at = now_ms.saturating_add(duration_ms);
            policy.set_target_timer(&target, Some(expires_at));
            info!(target_id = %target, expires_at, "Target timer set");
            self.audit(AuditEventType::TargetTimerSet { target, expires_at });
            Response::ok_with_message("Timer set")
        } else {
            policy.set_target_timer(&target, None);
            info!(target_id = %target, "Target timer cleared");
            self.audit(AuditEventType::TimerCleared {
                key: WarningKey::Target(target).to_string(),
            });
            Response::ok_with_message("Timer cleared")
        }
    }

    fn set_category_timer(
        &self,
        category: guardian_api::Category,
        duration_ms: i64,
        now_ms: i64,
    ) -> Response {
        let policy = self.engine.policy();
        if duration_ms > 0 {
            let expires_at = now_ms.saturating_add(duration_ms);
            policy.set_category_timer(category, Some(expires_at));
            info!(?category, expires_at, "Category timer set");
            self.audit(AuditEventType::CategoryTimerSet {
                category,
                expires_at,
            });
            Response::ok_with_message("Category timer set")
        } else {
            policy.set_category_timer(category, None);
            info!(?category, "Category timer cleared");
            self.audit(AuditEventType::TimerCleared {
                key: WarningKey::Category(category).to_string(),
            });
            Response::ok_with_message("Category timer cleared")
        }
    }

    fn approve_unlock(&self, duration_ms: Option<i64>, target: Option<TargetId>, now_ms: i64) -> Response {
        let duration_ms = duration_ms
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_UNLOCK_DURATION_MS);
        let policy = self.engine.policy();

        let (until_ms, message) = match &target {
            Some(target) => {
                let until_ms = now_ms.saturating_add(duration_ms);
                policy.set_target_timer(target, Some(until_ms));
                (until_ms, "App unlock approved")
            }
            None => (
                policy.extend_temporary_unlock(now_ms.saturating_add(duration_ms)),
                "Device unlock approved",
            ),
        };

        info!(target_id = ?target, until_ms, "Unlock approved");
        self.audit(AuditEventType::UnlockApproved { target, until_ms });
        Response::ok_with_message(message)
    }

    async fn request_unlock(
        &self,
        target: Option<TargetId>,
        message: Option<String>,
        now_ms: i64,
    ) -> Response {
        if !self.unlock_requests.lock().unwrap().check(&target) {
            debug!(target_id = ?target, "Unlock request throttled");
            return Response::failure("Unlock already requested, try again later");
        }

        let scoped = match target.clone() {
            Some(id) => {
                let label = self
                    .host
                    .installed_targets(false)
                    .await
                    .ok()
                    .and_then(|all| all.into_iter().find(|i| i.target == id))
                    .map(|i| i.label)
                    .unwrap_or_else(|| id.to_string());
                Some((id, label))
            }
            None => None,
        };

        let delivered = self.hub.publish(Event::unlock_requested(
            self.device_name(),
            scoped,
            message,
            now_ms,
        ));
        info!(target_id = ?target, delivered, "Unlock requested");
        self.audit(AuditEventType::UnlockRequested { target });
        Response::ok_with_message("Unlock request sent")
    }

    async fn set_launcher_hidden(&self, hidden: bool) -> Response {
        if let Err(e) = self.host.set_launcher_visible(!hidden).await {
            warn!(hidden, error = %e, "Failed to change launcher visibility");
            return Response::failure(e.to_string());
        }
        self.update_profile(|p| p.launcher_hidden = hidden);
        self.audit(AuditEventType::LauncherVisibility { hidden });
        Response::ok_with_message(if hidden { "App hidden" } else { "App unhidden" })
    }
}

#[async_trait]
impl CommandHandler for AgentService {
    async fn stats(&self, include_icons: bool) -> Response {
        Response::with_stats(self.build_stats(include_icons).await)
    }

    async fn daily_report(&self) -> Response {
        Response::with_report(self.build_report().await)
    }

    async fn execute(&self, command: AgentCommand) -> Response {
        let now_ms = guardian_util::now_millis();

        match command {
            AgentCommand::GetStats { include_icons } => self.stats(include_icons).await,
            AgentCommand::DailyReport => self.daily_report().await,
            AgentCommand::ReplaceRules(set) => self.replace_rules(set, now_ms),
            AgentCommand::SetLock { locked } => self.set_lock(locked, now_ms),
            AgentCommand::SetLocale { code } => {
                self.apply_locale(&code).await;
                self.update_profile(|p| p.language_code = Some(code.clone()));
                info!(code = %code, "Locale changed");
                self.audit(AuditEventType::LocaleChanged { code });
                Response::ok_with_message("Language updated")
            }
            AgentCommand::SetLauncherHidden { hidden } => self.set_launcher_hidden(hidden).await,
            AgentCommand::Rename { name } => {
                self.update_profile(|p| p.device_name = Some(name.clone()));
                info!(name = %name, "Device renamed");
                self.audit(AuditEventType::DeviceRenamed { name });
                Response::ok_with_message("Device renamed")
            }
            AgentCommand::SetTargetCategory { target, category } => {
                self.engine.policy().set_custom_category(&target, category);
                info!(target_id = %target, ?category, "Category override set");
                Response::ok_with_message("Category updated")
            }
            AgentCommand::SetTargetTimer {
                target,
                duration_ms,
            } => self.set_target_timer(target, duration_ms, now_ms),
            AgentCommand::SetCategoryTimer {
                category,
                duration_ms,
            } => self.set_category_timer(category, duration_ms, now_ms),
            AgentCommand::ApproveUnlock {
                duration_ms,
                target,
            } => self.approve_unlock(duration_ms, target, now_ms),
            AgentCommand::DenyUnlock { target } => {
                info!(target_id = ?target, "Unlock denied");
                self.audit(AuditEventType::UnlockDenied { target });
                Response::ok_with_message("Unlock denied")
            }
            AgentCommand::RequestUnlock { target, message } => {
                self.request_unlock(target, message, now_ms).await
            }
            AgentCommand::ResetPin => match self.pins.reset() {
                Ok(()) => Response::ok_with_message("PIN reset successfully"),
                Err(e) => {
                    warn!(error = %e, "PIN reset failed");
                    Response::failure(e.to_string())
                }
            },
            AgentCommand::Ping => Response::ok_with_message("Pong"),
        }
    }
}
