// src/hub/messages.rs
// The closed WebSocket message-kind sets (spec §4.7, §6). Tagged enums
// mirror the teacher's `api/ws/message.rs` shape (`WsClientMessage`/
// `WsServerMessage` with `#[serde(tag = "type", ...)]`).

use crate::parsers::block::Block;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WsClientMessage {
    Auth { token: String },
    ChatAttach { conversation_id: String },
    ChatDetach { conversation_id: String },
    ChatMessage { conversation_id: String, text: String },
    ChatCancel { conversation_id: String },
    ChatApproval { conversation_id: String, block_id: String, approved: bool },
    ChatInput { conversation_id: String, text: String },
    Watch { conversation_id: String },
    Unwatch { conversation_id: String },
    #[serde(rename = "terminalAttach", alias = "terminalDetach", alias = "terminalInput", alias = "terminalResize")]
    Terminal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WsServerMessage {
    Auth {
        ok: bool,
    },
    ChatAttached {
        conversation_id: String,
    },
    ChatContentBlocks {
        conversation_id: String,
        blocks: Vec<Block>,
    },
    ChatHistory {
        conversation_id: String,
        blocks: Vec<Block>,
    },
    ChatEvent {
        conversation_id: String,
        block: Block,
    },
    ChatData {
        conversation_id: String,
        data: String,
    },
    ChatMessageSent {
        conversation_id: String,
    },
    ChatSessionSuspended {
        conversation_id: String,
        reason: String,
    },
    ChatSessionEnded {
        conversation_id: String,
        reason: String,
    },
    ChatCancelled {
        conversation_id: String,
    },
    ChatError {
        conversation_id: Option<String>,
        code: &'static str,
        message: String,
    },
}
