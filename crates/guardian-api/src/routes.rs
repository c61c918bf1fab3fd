//! Agent endpoint paths

use crate::CommandType;

/// Endpoints exposed by the agent's command server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Stats,
    DailyReport,
    Rules,
    Lock,
    Hide,
    Unhide,
    DeviceName,
    UnlockResponse,
    ResetPin,
    Ping,
    /// Agent-local: raised by the lock screen, loopback peers only
    RequestUnlock,
    Events,
}

impl Route {
    pub const fn path(self) -> &'static str {
        match self {
            Route::Stats => "/stats",
            Route::DailyReport => "/daily-report",
            Route::Rules => "/rules",
            Route::Lock => "/lock",
            Route::Hide => "/hide",
            Route::Unhide => "/unhide",
            Route::DeviceName => "/device-name",
            Route::UnlockResponse => "/unlock-response",
            Route::ResetPin => "/reset-pin",
            Route::Ping => "/ping",
            Route::RequestUnlock => "/request-unlock",
            Route::Events => "/events",
        }
    }

    /// Command kinds a body-carrying route accepts. Routes without a request
    /// body accept nothing.
    pub fn accepts(self, command_type: CommandType) -> bool {
        use CommandType::*;
        match self {
            Route::Rules => matches!(command_type, UpdateRules),
            Route::Lock => matches!(command_type, LockDevice | UnlockDevice | SetLanguage),
            Route::DeviceName => matches!(
                command_type,
                UpdateDeviceName | SetAppCategory | SetAppTimer | SetCategoryTimer | SetLanguage
            ),
            Route::UnlockResponse => matches!(command_type, ApproveUnlock | DenyUnlock),
            Route::RequestUnlock => matches!(command_type, RequestUnlock),
            _ => false,
        }
    }
}
