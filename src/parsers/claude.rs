// src/parsers/claude.rs
// Claude Code's `stream-json` / JSONL event format: one JSON object per
// line. Built on the shared `json_stream` toolkit (spec §4.4).

use super::json_stream::{recover_partial_json, LineSplitter};
use super::{Block, BlockType, Parser, Role};
use serde_json::Value;

pub struct ClaudeJsonlParser {
    splitter: LineSplitter,
    current_text_id: Option<String>,
    open_tool_id: Option<String>,
    seq: u64,
    turn_complete: bool,
}

impl ClaudeJsonlParser {
    pub fn new() -> Self {
        Self {
            splitter: LineSplitter::new(),
            current_text_id: None,
            open_tool_id: None,
            seq: 0,
            turn_complete: false,
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }

    fn handle_event(&mut self, event: &Value, ts: i64, out: &mut Vec<Block>) {
        let Some(kind) = event.get("type").and_then(Value::as_str) else {
            out.push(Block::error(self.next_id("err"), ts, "event missing 'type'"));
            return;
        };
        match kind {
            "system" if event.get("subtype").and_then(Value::as_str) == Some("init") => {
                let mut b = Block::new(self.next_id("sys"), BlockType::SessionStart, ts);
                b.is_partial = Some(false);
                out.push(b);
            }
            "assistant" => {
                let text = event
                    .pointer("/message/content/0/text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let is_final = event
                    .pointer("/message/stop_reason")
                    .map(|v| !v.is_null())
                    .unwrap_or(false);
                let id = self
                    .current_text_id
                    .clone()
                    .unwrap_or_else(|| self.next_id("txt"));
                self.current_text_id = if is_final { None } else { Some(id.clone()) };
                out.push(Block::text(id, ts, Role::Assistant, text, !is_final));
            }
            "tool_use" => {
                let tool_id = event
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                self.open_tool_id = Some(tool_id.clone());
                let mut b = Block::new(tool_id.clone(), BlockType::ToolUseStart, ts);
                b.tool_id = Some(tool_id);
                b.tool_name = event.get("name").and_then(Value::as_str).map(String::from);
                b.input = event.get("input").cloned();
                b.is_partial = Some(false);
                out.push(b);
            }
            "tool_result" => {
                let tool_id = event
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                let mut b = Block::new(self.next_id("res"), BlockType::ToolUseResult, ts);
                b.tool_id = Some(tool_id);
                b.content = event
                    .get("content")
                    .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()));
                b.is_error = event.get("is_error").and_then(Value::as_bool);
                b.is_partial = Some(false);
                out.push(b);
            }
            "permission_request" => {
                let mut b = Block::new(self.next_id("apr"), BlockType::ApprovalRequest, ts);
                b.tool_name = event.get("tool_name").and_then(Value::as_str).map(String::from);
                b.prompt = event
                    .get("prompt")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .or_else(|| Some("Allow this action?".to_string()));
                b.options = Some(vec!["yes".to_string(), "no".to_string()]);
                b.is_partial = Some(false);
                out.push(b);
            }
            "result" => {
                self.turn_complete = true;
                self.open_tool_id = None;
            }
            "error" => {
                let msg = event
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                out.push(Block::error(self.next_id("err"), ts, msg));
            }
            other => {
                out.push(Block::error(self.next_id("err"), ts, format!("unrecognized event type '{other}'")));
            }
        }
    }
}

impl Parser for ClaudeJsonlParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Block> {
        let ts = crate::model::now_ms();
        let lines = self.splitter.feed(bytes);
        let mut out = Vec::new();
        for line in lines {
            match serde_json::from_str::<Value>(&line) {
                Ok(event) => self.handle_event(&event, ts, &mut out),
                Err(_) => out.push(Block::error(self.next_id("err"), ts, format!("malformed JSON line: {line}"))),
            }
        }
        // Best-effort partial `input` recovery for a tool_use event still
        // streaming in the trailing fragment.
        if let Some(tool_id) = self.open_tool_id.clone() {
            let pending = self.splitter.pending();
            if pending.contains("\"tool_use\"") {
                if let Some(partial) = recover_partial_json(&pending) {
                    if let Some(input) = partial.get("input") {
                        let mut b = Block::new(tool_id.clone(), BlockType::ToolUseStart, ts);
                        b.tool_id = Some(tool_id);
                        b.tool_name = partial.get("name").and_then(Value::as_str).map(String::from);
                        b.input = Some(input.clone());
                        b.is_partial = Some(true);
                        out.push(b);
                    }
                }
            }
        }
        out
    }

    fn flush(&mut self) -> Vec<Block> {
        let ts = crate::model::now_ms();
        let mut out = Vec::new();
        if let Some(id) = self.current_text_id.take() {
            out.push(Block::text(id, ts, Role::Assistant, "", false));
        }
        out
    }

    fn turn_complete(&mut self) -> bool {
        std::mem::take(&mut self.turn_complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_init_emits_session_start() {
        let mut p = ClaudeJsonlParser::new();
        let blocks = p.feed(b"{\"type\":\"system\",\"subtype\":\"init\"}\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].block_type, BlockType::SessionStart);
    }

    #[test]
    fn test_assistant_text_partial_then_final_shares_id() {
        let mut p = ClaudeJsonlParser::new();
        let b1 = p.feed(b"{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"Hi\"}],\"stop_reason\":null}}\n");
        let b2 = p.feed(b"{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"Hi there\"}],\"stop_reason\":\"end_turn\"}}\n");
        assert_eq!(b1[0].id, b2[0].id);
        assert_eq!(b1[0].is_partial, Some(true));
        assert_eq!(b2[0].is_partial, Some(false));
    }

    #[test]
    fn test_tool_use_then_result_share_tool_id() {
        let mut p = ClaudeJsonlParser::new();
        let b1 = p.feed(b"{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"Edit\",\"input\":{\"path\":\"a.rs\"}}\n");
        let b2 = p.feed(b"{\"type\":\"tool_result\",\"tool_use_id\":\"toolu_1\",\"content\":\"ok\",\"is_error\":false}\n");
        assert_eq!(b1[0].block_type, BlockType::ToolUseStart);
        assert_eq!(b2[0].block_type, BlockType::ToolUseResult);
        assert_eq!(b1[0].tool_id, b2[0].tool_id);
    }

    #[test]
    fn test_result_event_marks_turn_complete() {
        let mut p = ClaudeJsonlParser::new();
        p.feed(b"{\"type\":\"result\",\"subtype\":\"success\"}\n");
        assert!(p.turn_complete());
        assert!(!p.turn_complete());
    }

    #[test]
    fn test_malformed_line_becomes_error_block_not_panic() {
        let mut p = ClaudeJsonlParser::new();
        let blocks = p.feed(b"not json\n");
        assert_eq!(blocks[0].block_type, BlockType::Error);
    }
}
