//! Core events emitted by enforcement

use guardian_util::TargetId;

use crate::{BlockReason, QuotaWarning};

/// Observable outcomes of an enforcement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Blocking overlay went up over `target`
    OverlayShown {
        target: TargetId,
        reason: BlockReason,
    },

    OverlayHidden,

    /// `target` was stopped by the host
    TargetTerminated {
        target: TargetId,
    },

    /// A quota is close to running out
    WarningIssued {
        target: TargetId,
        warning: QuotaWarning,
    },

    /// A timed global lock reached its deadline
    LockReleased,
}
