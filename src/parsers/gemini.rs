// src/parsers/gemini.rs
// Gemini CLI emits prose plus a small set of bracketed textual markers
// for tool invocation/approval rather than line-delimited JSON (spec
// §4.4). This parser treats runs of plain text as `text` blocks and
// recognizes `[tool:NAME]{json}[/tool]`, `[approval]prompt[/approval]`,
// and `[done]` markers, falling back to `error` blocks for anything it
// cannot classify — never thrown out-of-band.

use super::{Block, BlockType, Role};
use serde_json::Value;

pub struct GeminiTextParser {
    buf: String,
    current_text_id: Option<String>,
    seq: u64,
    turn_complete: bool,
}

impl GeminiTextParser {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            current_text_id: None,
            seq: 0,
            turn_complete: false,
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.seq += 1;
        format!("{prefix}-{}", self.seq)
    }

    fn take_text_id(&mut self) -> String {
        self.current_text_id
            .clone()
            .unwrap_or_else(|| self.next_id("txt"))
    }

    fn emit_text(&mut self, ts: i64, content: &str, finalize: bool, out: &mut Vec<Block>) {
        if content.is_empty() && !finalize {
            return;
        }
        let id = self.take_text_id();
        self.current_text_id = if finalize { None } else { Some(id.clone()) };
        out.push(Block::text(id, ts, Role::Assistant, content, !finalize));
    }

    /// Process as much of `self.buf` as contains complete markers,
    /// leaving any trailing partial marker buffered for next `feed`.
    fn drain_complete(&mut self, ts: i64, out: &mut Vec<Block>) {
        loop {
            let Some(marker_start) = self.buf.find('[') else {
                if !self.buf.is_empty() {
                    let text = std::mem::take(&mut self.buf);
                    self.emit_text(ts, &text, false, out);
                }
                break;
            };

            if marker_start > 0 {
                let prefix: String = self.buf.drain(..marker_start).collect();
                self.emit_text(ts, &prefix, false, out);
            }

            if self.buf.starts_with("[done]") {
                self.buf.drain(.."[done]".len());
                self.emit_text(ts, "", true, out);
                self.turn_complete = true;
                continue;
            }

            if let Some(rest) = self.buf.strip_prefix("[approval]") {
                let Some(end) = rest.find("[/approval]") else {
                    break; // wait for the rest to arrive
                };
                let prompt = rest[..end].to_string();
                let consumed = "[approval]".len() + end + "[/approval]".len();
                self.buf.drain(..consumed);
                self.emit_text(ts, "", true, out);
                let mut b = Block::new(self.next_id("apr"), BlockType::ApprovalRequest, ts);
                b.prompt = Some(prompt);
                b.options = Some(vec!["yes".to_string(), "no".to_string()]);
                b.is_partial = Some(false);
                out.push(b);
                continue;
            }

            if let Some(rest) = self.buf.strip_prefix("[tool:") {
                let Some(name_end) = rest.find(']') else {
                    break;
                };
                let name = rest[..name_end].to_string();
                let after_name = &rest[name_end + 1..];
                let Some(close) = after_name.find("[/tool]") else {
                    break;
                };
                let payload = after_name[..close].to_string();
                let consumed = "[tool:".len() + name_end + 1 + close + "[/tool]".len();
                self.buf.drain(..consumed);
                self.emit_text(ts, "", true, out);
                let tool_id = self.next_id("tool");
                let mut b = Block::new(tool_id.clone(), BlockType::ToolUseStart, ts);
                b.tool_id = Some(tool_id);
                b.tool_name = Some(name);
                b.input = serde_json::from_str::<Value>(&payload).ok().or(Some(Value::String(payload)));
                b.is_partial = Some(false);
                out.push(b);
                continue;
            }

            // A `[` that doesn't start any recognized marker: emit it as
            // plain text and keep scanning rather than erroring on every
            // stray bracket a model might produce in prose.
            let ch: String = self.buf.drain(..1).collect();
            self.emit_text(ts, &ch, false, out);
        }
    }
}

impl super::Parser for GeminiTextParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Block> {
        let ts = crate::model::now_ms();
        self.buf.push_str(&String::from_utf8_lossy(bytes));
        let mut out = Vec::new();
        self.drain_complete(ts, &mut out);
        out
    }

    fn flush(&mut self) -> Vec<Block> {
        let ts = crate::model::now_ms();
        let mut out = Vec::new();
        if !self.buf.is_empty() {
            let text = std::mem::take(&mut self.buf);
            self.emit_text(ts, &text, false, &mut out);
        }
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
    use crate::parsers::Parser;

    #[test]
    fn test_plain_text_concatenates_under_one_id() {
        let mut p = GeminiTextParser::new();
        let b1 = p.feed(b"Hello ");
        let b2 = p.feed(b"world");
        assert_eq!(b1[0].id, b2[0].id);
        assert_eq!(b1[0].is_partial, Some(true));
    }

    #[test]
    fn test_tool_marker_parses_json_payload() {
        let mut p = GeminiTextParser::new();
        let blocks = p.feed(b"[tool:ShellCommand]{\"command\":\"ls\"}[/tool]");
        let tool_block = blocks.iter().find(|b| b.block_type == BlockType::ToolUseStart).unwrap();
        assert_eq!(tool_block.tool_name.as_deref(), Some("ShellCommand"));
        assert_eq!(tool_block.input.as_ref().unwrap()["command"], "ls");
    }

    #[test]
    fn test_approval_marker() {
        let mut p = GeminiTextParser::new();
        let blocks = p.feed(b"[approval]Run `ls`?[/approval]");
        let apr = blocks.iter().find(|b| b.block_type == BlockType::ApprovalRequest).unwrap();
        assert_eq!(apr.prompt.as_deref(), Some("Run `ls`?"));
    }

    #[test]
    fn test_done_marks_turn_complete() {
        let mut p = GeminiTextParser::new();
        p.feed(b"all done[done]");
        assert!(p.turn_complete());
    }

    #[test]
    fn test_incomplete_marker_waits_for_more_bytes() {
        let mut p = GeminiTextParser::new();
        let blocks = p.feed(b"[tool:Shell]{\"command\":\"l");
        assert!(blocks.is_empty() || blocks.iter().all(|b| b.block_type == BlockType::Text));
        let blocks2 = p.feed(b"s\"}[/tool]");
        assert!(blocks2.iter().any(|b| b.block_type == BlockType::ToolUseStart));
    }
}
