// src/model.rs
// Shared domain types (spec §3). Kept in one module because Store,
// SessionManager, AgentSession, and Hub all need the same shapes and
// none of them owns the type definitions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tool {
    Claude,
    CursorAgent,
    Gemini,
    Custom,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Claude => "claude",
            Tool::CursorAgent => "cursor-agent",
            Tool::Gemini => "gemini",
            Tool::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(Tool::Claude),
            "cursor-agent" => Some(Tool::CursorAgent),
            "gemini" => Some(Tool::Gemini),
            "custom" => Some(Tool::Custom),
            _ => None,
        }
    }

    /// Whether this tool's CLI supports resuming a prior session via a
    /// token, as opposed to a fresh process plus transcript replay.
    pub fn supports_session_resume(&self) -> bool {
        matches!(self, Tool::Claude | Tool::CursorAgent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Agent,
    Plan,
    Ask,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Agent => "agent",
            Mode::Plan => "plan",
            Mode::Ask => "ask",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Mode::Agent),
            "plan" => Some(Mode::Plan),
            "ask" => Some(Mode::Ask),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Bypass,
    DontAsk,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Bypass => "bypass",
            PermissionMode::DontAsk => "dontAsk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(PermissionMode::Default),
            "acceptEdits" => Some(PermissionMode::AcceptEdits),
            "bypass" => Some(PermissionMode::Bypass),
            "dontAsk" => Some(PermissionMode::DontAsk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Suspended,
    Ended,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Suspended => "suspended",
            ConversationStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConversationStatus::Active),
            "suspended" => Some(ConversationStatus::Suspended),
            "ended" => Some(ConversationStatus::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub tool: Tool,
    pub topic: String,
    pub model: Option<String>,
    pub mode: Mode,
    pub permission_mode: PermissionMode,
    pub project_path: String,
    pub status: ConversationStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_activity: i64,
    pub session_id: Option<String>,
}

/// Fields accepted by `POST /conversations`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub tool: String,
    pub project_path: String,
    pub topic: Option<String>,
    pub model: Option<String>,
    pub mode: String,
    pub permission_mode: String,
    pub initial_prompt: Option<String>,
}

/// Patch accepted by `PATCH /conversations/:id` and internal merges.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    pub topic: Option<String>,
    pub status: Option<String>,
    pub session_id: Option<String>,
    pub last_activity: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    All,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFilter {
    pub project_path: Option<String>,
    pub status: Option<String>,
    pub active_since: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub conversation_id: String,
    pub block_id: String,
    pub tool_name: String,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingNotification {
    pub conversation_id: String,
    pub topic: String,
    pub is_turn_complete: bool,
    pub created_at: i64,
}

/// Mutable session policy knobs (spec's expanded §3 `SessionConfig`),
/// persisted as a single-row table so it survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub inactivity_timeout_ms: i64,
    pub max_concurrent_sessions: i64,
    pub auto_resume_enabled: bool,
    pub history_buffer_capacity: i64,
    pub outbound_queue_capacity: i64,
}

impl SessionConfig {
    pub fn from_defaults(d: &crate::config::SessionDefaults) -> Self {
        Self {
            inactivity_timeout_ms: d.inactivity_timeout_ms,
            max_concurrent_sessions: d.max_concurrent_sessions,
            auto_resume_enabled: d.auto_resume_enabled,
            history_buffer_capacity: d.history_buffer_capacity as i64,
            outbound_queue_capacity: d.outbound_queue_capacity as i64,
        }
    }
}

/// Partial update accepted by `PUT /conversations/sessions/config`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigPatch {
    pub inactivity_timeout_ms: Option<i64>,
    pub max_concurrent_sessions: Option<i64>,
    pub auto_resume_enabled: Option<bool>,
    pub history_buffer_capacity: Option<i64>,
    pub outbound_queue_capacity: Option<i64>,
}

impl SessionConfig {
    pub fn apply(&self, patch: &SessionConfigPatch) -> Self {
        Self {
            inactivity_timeout_ms: patch.inactivity_timeout_ms.unwrap_or(self.inactivity_timeout_ms),
            max_concurrent_sessions: patch.max_concurrent_sessions.unwrap_or(self.max_concurrent_sessions),
            auto_resume_enabled: patch.auto_resume_enabled.unwrap_or(self.auto_resume_enabled),
            history_buffer_capacity: patch.history_buffer_capacity.unwrap_or(self.history_buffer_capacity),
            outbound_queue_capacity: patch.outbound_queue_capacity.unwrap_or(self.outbound_queue_capacity),
        }
    }
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
