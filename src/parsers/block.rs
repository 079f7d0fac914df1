// src/parsers/block.rs
// The normalized content block emitted by every parser, and the dynamic
// value type used to carry tool inputs without committing to per-tool
// schemas at the parser boundary (spec §9, "Dynamic JSON").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tagged value used for tool `input`/`content` fields whose shape is
/// defined by the tool, not by us. Mirrors `serde_json::Value` but keeps
/// the wire representation untagged so unknown fields round-trip as-is.
pub type DynValue = Value;

/// The closed set of block types a parser may emit (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    Text,
    ToolUseStart,
    ToolUseResult,
    ApprovalRequest,
    Error,
    SessionStart,
    SessionEnd,
    ChatCancelled,
}

/// Who produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single normalized unit of agent output (spec §3 "Message (a.k.a.
/// ContentBlock)"). Unknown wire fields are preserved by intermediaries;
/// within the server, the type is closed to the fields the spec lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    /// Monotonic within a conversation; ties are broken by insertion
    /// order. Set once at first emission and never changed by later
    /// partial updates (spec §4.4 tie-break rule).
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_partial: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<DynValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suspended: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
}

impl Block {
    /// Build a minimal block of the given type, timestamped now.
    pub fn new(id: impl Into<String>, block_type: BlockType, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            block_type,
            timestamp,
            role: None,
            is_partial: None,
            content: None,
            tool_id: None,
            tool_name: None,
            input: None,
            is_error: None,
            path: None,
            diff: None,
            command: None,
            exit_code: None,
            prompt: None,
            options: None,
            language: None,
            code: None,
            message: None,
            error_code: None,
            model: None,
            suspended: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn text(id: impl Into<String>, timestamp: i64, role: Role, content: impl Into<String>, is_partial: bool) -> Self {
        let mut b = Self::new(id, BlockType::Text, timestamp);
        b.role = Some(role);
        b.content = Some(content.into());
        b.is_partial = Some(is_partial);
        b
    }

    pub fn error(id: impl Into<String>, timestamp: i64, message: impl Into<String>) -> Self {
        let mut b = Self::new(id, BlockType::Error, timestamp);
        b.message = Some(message.into());
        b.is_partial = Some(false);
        b
    }

    /// Whether this block is terminal, i.e. `isPartial:false` has been
    /// observed (or never applied, for block types that are not
    /// incrementally built). Treated as terminal in any downstream
    /// mutation path (spec §9: "treat `isPartial:false` as terminal").
    pub fn is_terminal(&self) -> bool {
        !self.is_partial.unwrap_or(false)
    }
}
