// src/agent/types.rs
// The AgentSession state machine (spec §4.5), implemented as an enum so
// illegal transitions are unrepresentable rather than tracked via
// scattered booleans.

use crate::parsers::block::Block;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Idle,
    Awaiting,
    AwaitingApproval,
    Suspended,
    Ending,
    Ended,
}

impl SessionState {
    pub fn has_live_pty(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Idle | SessionState::Awaiting | SessionState::AwaitingApproval
        )
    }
}

/// Commands sent from the `SessionManager`/`Hub` into a running
/// `AgentSession` task. Each carries a reply channel so the caller can
/// surface `Busy`/`NotFound` synchronously, the way a direct method call
/// would, without the session task needing a back-pointer to anything.
#[derive(Debug)]
pub enum SessionCommand {
    SendMessage {
        text: String,
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
    Approve {
        block_id: String,
        approved: bool,
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
    Cancel {
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
    End {
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
    Resize {
        cols: u16,
        rows: u16,
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
    Suspend {
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
    /// Raw keystroke passthrough (spec §4.7 `chatInput`, distinct from the
    /// structured `chatMessage`): written directly to the PTY without the
    /// `Busy` gate or an `Awaiting` transition, for interactive prompts the
    /// parser did not surface as a typed `approvalRequest`.
    RawInput {
        bytes: Vec<u8>,
        reply: tokio::sync::oneshot::Sender<Result<(), crate::error::AppError>>,
    },
}

/// Events an `AgentSession` emits outward. The `Hub` consumes these
/// through one channel per session; there is no back-pointer from the
/// session to the Hub (spec §9 "one-way ownership... no back-pointers").
#[derive(Debug, Clone)]
pub enum SessionEvent {
    BlockEmitted(Block),
    StateChanged(SessionState),
    Suspended { reason: String },
    Ended { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_live_pty() {
        assert!(SessionState::Starting.has_live_pty());
        assert!(SessionState::AwaitingApproval.has_live_pty());
        assert!(!SessionState::Suspended.has_live_pty());
        assert!(!SessionState::Ended.has_live_pty());
    }
}
