// src/parsers/cursor.rs
// Cursor Agent's line-delimited JSON event stream. Structurally the
// same shape as Claude's (one JSON object per line, streamed tool
// input) but with different event names, so it shares the JSON-lines
// splitter and accumulator toolkit rather than duplicating it
// (spec §4.4: "Per-tool implementations share a small toolkit").

use super::json_stream::{recover_partial_json, LineSplitter};
use super::{Block, BlockType, Parser, Role};
use serde_json::Value;

pub struct CursorAgentStreamJsonParser {
    splitter: LineSplitter,
    current_text_id: Option<String>,
    open_tool_id: Option<String>,
    seq: u64,
    turn_complete: bool,
}

impl CursorAgentStreamJsonParser {
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
        let Some(kind) = event.get("event").and_then(Value::as_str) else {
            out.push(Block::error(self.next_id("err"), ts, "event missing 'event'"));
            return;
        };
        match kind {
            "session_start" => {
                let mut b = Block::new(self.next_id("sys"), BlockType::SessionStart, ts);
                b.is_partial = Some(false);
                out.push(b);
            }
            "message" => {
                let text = event.get("text").and_then(Value::as_str).unwrap_or_default();
                let done = event.get("done").and_then(Value::as_bool).unwrap_or(false);
                let id = self
                    .current_text_id
                    .clone()
                    .unwrap_or_else(|| self.next_id("txt"));
                self.current_text_id = if done { None } else { Some(id.clone()) };
                out.push(Block::text(id, ts, Role::Assistant, text, !done));
            }
            "tool_call" => {
                let id = event.get("id").and_then(Value::as_str).unwrap_or("unknown").to_string();
                self.open_tool_id = Some(id.clone());
                let mut b = Block::new(id.clone(), BlockType::ToolUseStart, ts);
                b.tool_id = Some(id);
                b.tool_name = event.get("tool").and_then(Value::as_str).map(String::from);
                b.input = event.get("args").cloned();
                b.is_partial = Some(false);
                out.push(b);
            }
            "tool_output" => {
                let tool_id = event.get("id").and_then(Value::as_str).unwrap_or("unknown").to_string();
                let mut b = Block::new(self.next_id("res"), BlockType::ToolUseResult, ts);
                b.tool_id = Some(tool_id);
                b.content = event.get("output").and_then(Value::as_str).map(String::from);
                b.is_error = event.get("error").and_then(Value::as_bool);
                b.is_partial = Some(false);
                out.push(b);
            }
            "ask" => {
                let mut b = Block::new(self.next_id("apr"), BlockType::ApprovalRequest, ts);
                b.tool_name = event.get("tool").and_then(Value::as_str).map(String::from);
                b.prompt = event.get("question").and_then(Value::as_str).map(String::from);
                b.options = event
                    .get("choices")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .or_else(|| Some(vec!["yes".to_string(), "no".to_string()]));
                b.is_partial = Some(false);
                out.push(b);
            }
            "done" => {
                self.turn_complete = true;
                self.open_tool_id = None;
            }
            "error" => {
                let msg = event.get("message").and_then(Value::as_str).unwrap_or("unknown error").to_string();
                out.push(Block::error(self.next_id("err"), ts, msg));
            }
            other => {
                out.push(Block::error(self.next_id("err"), ts, format!("unrecognized event '{other}'")));
            }
        }
    }
}

impl Parser for CursorAgentStreamJsonParser {
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
        if let Some(tool_id) = self.open_tool_id.clone() {
            let pending = self.splitter.pending();
            if pending.contains("\"tool_call\"") {
                if let Some(partial) = recover_partial_json(&pending) {
                    if let Some(args) = partial.get("args") {
                        let mut b = Block::new(tool_id.clone(), BlockType::ToolUseStart, ts);
                        b.tool_id = Some(tool_id);
                        b.tool_name = partial.get("tool").and_then(Value::as_str).map(String::from);
                        b.input = Some(args.clone());
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
    fn test_tool_call_then_output() {
        let mut p = CursorAgentStreamJsonParser::new();
        let b1 = p.feed(b"{\"event\":\"tool_call\",\"id\":\"t1\",\"tool\":\"edit\",\"args\":{\"path\":\"a.rs\"}}\n");
        let b2 = p.feed(b"{\"event\":\"tool_output\",\"id\":\"t1\",\"output\":\"ok\",\"error\":false}\n");
        assert_eq!(b1[0].block_type, BlockType::ToolUseStart);
        assert_eq!(b2[0].block_type, BlockType::ToolUseResult);
        assert_eq!(b1[0].tool_id, b2[0].tool_id);
    }

    #[test]
    fn test_done_marks_turn_complete() {
        let mut p = CursorAgentStreamJsonParser::new();
        p.feed(b"{\"event\":\"done\"}\n");
        assert!(p.turn_complete());
    }

    #[test]
    fn test_ask_produces_approval_request_with_default_options() {
        let mut p = CursorAgentStreamJsonParser::new();
        let blocks = p.feed(b"{\"event\":\"ask\",\"tool\":\"edit\",\"question\":\"Edit file: a.rs\"}\n");
        assert_eq!(blocks[0].block_type, BlockType::ApprovalRequest);
        assert_eq!(blocks[0].options, Some(vec!["yes".to_string(), "no".to_string()]));
    }
}
