//! Packet envelope, commands and responses

use guardian_util::TargetId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Category, DailyUsageReport, DeviceStats, Event, RuleSet};

/// Message returned for any malformed or incomplete command
pub const INVALID_COMMAND: &str = "Invalid command";

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("expected a command packet")]
    NotACommand,

    #[error("{command:?} is missing required field `{field}`")]
    MissingField {
        command: CommandType,
        field: &'static str,
    },

    #[error("{0:?} is not accepted here")]
    Unexpected(CommandType),

    #[error("invalid rule set: {0}")]
    InvalidRuleSet(String),

    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Single self-describing envelope used for every HTTP body and push frame.
/// The discriminator is `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Packet {
    Command(Command),
    Response(Response),
    Event(Event),
}

impl Packet {
    pub fn to_json(&self) -> ApiResult<String> {
        serde_json::to_string(self).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    pub fn from_json(raw: &str) -> ApiResult<Self> {
        serde_json::from_str(raw).map_err(|e| ApiError::Malformed(e.to_string()))
    }

    /// Parse a body that must contain a command
    pub fn parse_command(raw: &[u8]) -> ApiResult<Command> {
        match serde_json::from_slice::<Packet>(raw) {
            Ok(Packet::Command(command)) => Ok(command),
            Ok(_) => Err(ApiError::NotACommand),
            Err(e) => Err(ApiError::Malformed(e.to_string())),
        }
    }
}

impl From<Command> for Packet {
    fn from(command: Command) -> Self {
        Packet::Command(command)
    }
}

impl From<Response> for Packet {
    fn from(response: Response) -> Self {
        Packet::Response(response)
    }
}

impl From<Event> for Packet {
    fn from(event: Event) -> Self {
        Packet::Event(event)
    }
}

/// Discriminator of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    GetStats,
    UpdateRules,
    LockDevice,
    UnlockDevice,
    Ping,
    RequestUnlock,
    ApproveUnlock,
    DenyUnlock,
    SendDailyReport,
    UpdateDeviceName,
    UnhideApp,
    HideApp,
    SetAppCategory,
    SetAppTimer,
    SetCategoryTimer,
    SetLanguage,
    ResetPin,
}

/// Raw command as it appears on the wire: a kind plus optional companion
/// fields. Use [`AgentCommand::try_from`] to validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub command_type: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_set: Option<RuleSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock_duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_icons: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer_duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
}

impl Command {
    pub fn new(command_type: CommandType) -> Self {
        Self {
            command_type,
            rule_set: None,
            unlock_duration_ms: None,
            request_message: None,
            approved: None,
            device_name: None,
            include_icons: None,
            package_name: None,
            category: None,
            timer_duration_ms: None,
            language_code: None,
        }
    }

    pub fn update_rules(rule_set: RuleSet) -> Self {
        Self {
            rule_set: Some(rule_set),
            ..Self::new(CommandType::UpdateRules)
        }
    }

    pub fn set_lock(locked: bool) -> Self {
        Self::new(if locked {
            CommandType::LockDevice
        } else {
            CommandType::UnlockDevice
        })
    }

    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Self::new(CommandType::UpdateDeviceName)
        }
    }

    pub fn set_language(code: impl Into<String>) -> Self {
        Self {
            language_code: Some(code.into()),
            ..Self::new(CommandType::SetLanguage)
        }
    }

    pub fn set_app_category(target: TargetId, category: Category) -> Self {
        Self {
            package_name: Some(target),
            category: Some(category),
            ..Self::new(CommandType::SetAppCategory)
        }
    }

    pub fn set_app_timer(target: TargetId, duration_ms: i64) -> Self {
        Self {
            package_name: Some(target),
            timer_duration_ms: Some(duration_ms),
            ..Self::new(CommandType::SetAppTimer)
        }
    }

    pub fn set_category_timer(category: Category, duration_ms: i64) -> Self {
        Self {
            category: Some(category),
            timer_duration_ms: Some(duration_ms),
            ..Self::new(CommandType::SetCategoryTimer)
        }
    }

    pub fn approve_unlock(duration_ms: Option<i64>, target: Option<TargetId>) -> Self {
        Self {
            approved: Some(true),
            unlock_duration_ms: duration_ms,
            package_name: target,
            ..Self::new(CommandType::ApproveUnlock)
        }
    }

    pub fn deny_unlock(target: Option<TargetId>) -> Self {
        Self {
            approved: Some(false),
            package_name: target,
            ..Self::new(CommandType::DenyUnlock)
        }
    }

    pub fn request_unlock(target: Option<TargetId>, message: Option<String>) -> Self {
        Self {
            package_name: target,
            request_message: message,
            ..Self::new(CommandType::RequestUnlock)
        }
    }

    fn require<T>(&self, value: Option<T>, field: &'static str) -> ApiResult<T> {
        value.ok_or(ApiError::MissingField {
            command: self.command_type,
            field,
        })
    }
}

/// A command whose required companion fields have been checked
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCommand {
    GetStats { include_icons: bool },
    DailyReport,
    ReplaceRules(RuleSet),
    SetLock { locked: bool },
    SetLocale { code: String },
    SetLauncherHidden { hidden: bool },
    Rename { name: String },
    SetTargetCategory { target: TargetId, category: Category },
    /// `duration_ms <= 0` clears the timer
    SetTargetTimer { target: TargetId, duration_ms: i64 },
    /// `duration_ms <= 0` clears the timer
    SetCategoryTimer { category: Category, duration_ms: i64 },
    ApproveUnlock {
        duration_ms: Option<i64>,
        target: Option<TargetId>,
    },
    DenyUnlock { target: Option<TargetId> },
    RequestUnlock {
        target: Option<TargetId>,
        message: Option<String>,
    },
    ResetPin,
    Ping,
}

impl TryFrom<Command> for AgentCommand {
    type Error = ApiError;

    fn try_from(command: Command) -> ApiResult<Self> {
        let parsed = match command.command_type {
            CommandType::GetStats => AgentCommand::GetStats {
                include_icons: command.include_icons.unwrap_or(false),
            },
            CommandType::SendDailyReport => AgentCommand::DailyReport,
            CommandType::UpdateRules => {
                let rule_set = command.require(command.rule_set.clone(), "ruleSet")?;
                let problems = rule_set.problems();
                if !problems.is_empty() {
                    return Err(ApiError::InvalidRuleSet(problems.join("; ")));
                }
                AgentCommand::ReplaceRules(rule_set)
            }
            CommandType::LockDevice => AgentCommand::SetLock { locked: true },
            CommandType::UnlockDevice => AgentCommand::SetLock { locked: false },
            CommandType::SetLanguage => {
                let code = command.require(command.language_code.clone(), "languageCode")?;
                if code.trim().is_empty() {
                    return Err(ApiError::MissingField {
                        command: command.command_type,
                        field: "languageCode",
                    });
                }
                AgentCommand::SetLocale { code }
            }
            CommandType::HideApp => AgentCommand::SetLauncherHidden { hidden: true },
            CommandType::UnhideApp => AgentCommand::SetLauncherHidden { hidden: false },
            CommandType::UpdateDeviceName => {
                let name = command.require(command.device_name.clone(), "deviceName")?;
                if name.trim().is_empty() {
                    return Err(ApiError::MissingField {
                        command: command.command_type,
                        field: "deviceName",
                    });
                }
                AgentCommand::Rename { name }
            }
            CommandType::SetAppCategory => AgentCommand::SetTargetCategory {
                target: command.require(command.package_name.clone(), "packageName")?,
                category: command.require(command.category, "category")?,
            },
            CommandType::SetAppTimer => AgentCommand::SetTargetTimer {
                target: command.require(command.package_name.clone(), "packageName")?,
                duration_ms: command.require(command.timer_duration_ms, "timerDurationMs")?,
            },
            CommandType::SetCategoryTimer => AgentCommand::SetCategoryTimer {
                category: command.require(command.category, "category")?,
                duration_ms: command.require(command.timer_duration_ms, "timerDurationMs")?,
            },
            CommandType::ApproveUnlock => AgentCommand::ApproveUnlock {
                duration_ms: command.unlock_duration_ms,
                target: command.package_name,
            },
            CommandType::DenyUnlock => AgentCommand::DenyUnlock {
                target: command.package_name,
            },
            CommandType::RequestUnlock => AgentCommand::RequestUnlock {
                target: command.package_name,
                message: command.request_message,
            },
            CommandType::ResetPin => AgentCommand::ResetPin,
            CommandType::Ping => AgentCommand::Ping,
        };
        Ok(parsed)
    }
}

/// Reply to every request: a success flag and either a payload or a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<DeviceStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_report: Option<DailyUsageReport>,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            stats: None,
            daily_report: None,
        }
    }

    pub fn ok_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn with_stats(stats: DeviceStats) -> Self {
        Self {
            stats: Some(stats),
            ..Self::ok()
        }
    }

    pub fn with_report(report: DailyUsageReport) -> Self {
        Self {
            daily_report: Some(report),
            ..Self::ok()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            stats: None,
            daily_report: None,
        }
    }

    pub fn invalid_command() -> Self {
        Self::failure(INVALID_COMMAND)
    }
}
