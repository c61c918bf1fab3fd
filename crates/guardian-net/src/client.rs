//! Controller-side command client for one agent

use guardian_api::{
    Category, Command, DailyUsageReport, DeviceStats, Packet, Response, Route, RuleSet,
};
use guardian_util::TargetId;
use reqwest::Method;
use reqwest::header::CONTENT_TYPE;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::{NetError, NetResult};

/// Limits applied to every call made through a [`DeviceClient`]
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    /// Requests allowed in flight against one agent at a time
    pub max_concurrent: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_concurrent: 2,
        }
    }
}

fn failed(e: impl Display) -> NetError {
    NetError::OperationFailed(e.to_string())
}

/// Short-lived request/response calls against one agent. Calls are never
/// retried; a failure is returned to the caller as-is.
#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl DeviceClient {
    /// Client for the agent at `authority` (`host:port`)
    pub fn new(authority: &str, options: ClientOptions) -> NetResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_http(http, authority, options))
    }

    /// Share one HTTP connection pool across agents
    pub fn with_http(http: reqwest::Client, authority: &str, options: ClientOptions) -> Self {
        Self {
            http,
            base_url: format!("http://{}", authority),
            permits: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            timeout: options.request_timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, method: Method, path: &str, command: Option<Command>) -> NetResult<Response> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| failed("client closed"))?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).timeout(self.timeout);
        if let Some(command) = command {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(Packet::from(command).to_json()?);
        }

        let reply = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout("agent request")
            } else {
                failed(e)
            }
        })?;
        let text = reply.text().await.map_err(failed)?;

        match Packet::from_json(&text)? {
            Packet::Response(response) => {
                debug!(%url, success = response.success, "Agent replied");
                Ok(response)
            }
            other => Err(failed(format!("expected a response, got {:?}", other))),
        }
    }

    /// Call and turn an unsuccessful reply into an error
    async fn expect_ok(
        &self,
        method: Method,
        route: Route,
        command: Option<Command>,
    ) -> NetResult<Response> {
        let response = self.call(method, route.path(), command).await?;
        if response.success {
            Ok(response)
        } else {
            Err(failed(
                response.message.unwrap_or_else(|| "request rejected".into()),
            ))
        }
    }

    pub async fn stats(&self, include_icons: bool) -> NetResult<DeviceStats> {
        let path = format!("{}?includeIcons={}", Route::Stats.path(), include_icons);
        let response = self.call(Method::GET, &path, None).await?;
        match (response.success, response.stats) {
            (true, Some(stats)) => Ok(stats),
            (_, _) => Err(failed(response.message.unwrap_or_else(|| "no stats".into()))),
        }
    }

    pub async fn daily_report(&self) -> NetResult<DailyUsageReport> {
        let response = self
            .expect_ok(Method::GET, Route::DailyReport, None)
            .await?;
        response
            .daily_report
            .ok_or_else(|| failed("no report in reply"))
    }

    pub async fn update_rules(&self, rule_set: RuleSet) -> NetResult<Response> {
        self.expect_ok(Method::POST, Route::Rules, Some(Command::update_rules(rule_set)))
            .await
    }

    pub async fn set_lock(&self, locked: bool) -> NetResult<Response> {
        self.expect_ok(Method::POST, Route::Lock, Some(Command::set_lock(locked)))
            .await
    }

    pub async fn set_language(&self, code: &str) -> NetResult<Response> {
        self.expect_ok(Method::POST, Route::Lock, Some(Command::set_language(code)))
            .await
    }

    pub async fn rename(&self, name: &str) -> NetResult<Response> {
        self.expect_ok(Method::POST, Route::DeviceName, Some(Command::rename(name)))
            .await
    }

    pub async fn set_app_category(&self, target: TargetId, category: Category) -> NetResult<Response> {
        self.expect_ok(
            Method::POST,
            Route::DeviceName,
            Some(Command::set_app_category(target, category)),
        )
        .await
    }

    /// `duration_ms <= 0` clears the timer
    pub async fn set_app_timer(&self, target: TargetId, duration_ms: i64) -> NetResult<Response> {
        self.expect_ok(
            Method::POST,
            Route::DeviceName,
            Some(Command::set_app_timer(target, duration_ms)),
        )
        .await
    }

    /// `duration_ms <= 0` clears the timer
    pub async fn set_category_timer(&self, category: Category, duration_ms: i64) -> NetResult<Response> {
        self.expect_ok(
            Method::POST,
            Route::DeviceName,
            Some(Command::set_category_timer(category, duration_ms)),
        )
        .await
    }

    pub async fn approve_unlock(
        &self,
        duration_ms: Option<i64>,
        target: Option<TargetId>,
    ) -> NetResult<Response> {
        self.expect_ok(
            Method::POST,
            Route::UnlockResponse,
            Some(Command::approve_unlock(duration_ms, target)),
        )
        .await
    }

    pub async fn deny_unlock(&self, target: Option<TargetId>) -> NetResult<Response> {
        self.expect_ok(
            Method::POST,
            Route::UnlockResponse,
            Some(Command::deny_unlock(target)),
        )
        .await
    }

    pub async fn set_launcher_hidden(&self, hidden: bool) -> NetResult<Response> {
        let route = if hidden { Route::Hide } else { Route::Unhide };
        self.expect_ok(Method::POST, route, None).await
    }

    pub async fn reset_pin(&self) -> NetResult<Response> {
        self.expect_ok(Method::POST, Route::ResetPin, None).await
    }

    /// Raise an unlock request. Agents only accept this from loopback.
    pub async fn request_unlock(
        &self,
        target: Option<TargetId>,
        message: Option<String>,
    ) -> NetResult<Response> {
        self.expect_ok(
            Method::POST,
            Route::RequestUnlock,
            Some(Command::request_unlock(target, message)),
        )
        .await
    }

    pub async fn ping(&self) -> NetResult<String> {
        let response = self.expect_ok(Method::GET, Route::Ping, None).await?;
        Ok(response.message.unwrap_or_default())
    }
}
