// src/parsers/generic.rs
// Fallback parser for `custom` tools with no known structured event
// format: strips ANSI/control sequences and emits plain `text` blocks.
// Declares incapacity for structured output, which is the trigger for
// the raw-passthrough fallback (spec §9 open question, resolved in
// DESIGN.md as "structured-only by default, raw only here").

use super::{Block, Parser, Role};

pub struct GenericAnsiParser {
    current_text_id: Option<String>,
    seq: u64,
}

impl GenericAnsiParser {
    pub fn new() -> Self {
        Self {
            current_text_id: None,
            seq: 0,
        }
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("txt-{}", self.seq)
    }
}

impl Parser for GenericAnsiParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Block> {
        let ts = crate::model::now_ms();
        let stripped = strip_ansi_escapes::strip(bytes);
        let text = String::from_utf8_lossy(&stripped).to_string();
        if text.is_empty() {
            return Vec::new();
        }
        let id = self.current_text_id.clone().unwrap_or_else(|| self.next_id());
        self.current_text_id = Some(id.clone());
        vec![Block::text(id, ts, Role::Assistant, text, true)]
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
        // No structured turn-end marker exists for arbitrary CLIs; the
        // session falls back to the quiescent-period heuristic (spec
        // §4.5) rather than this parser claiming to know.
        false
    }

    fn declares_incapacity(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_ansi_color_codes() {
        let mut p = GenericAnsiParser::new();
        let blocks = p.feed(b"\x1b[32mhello\x1b[0m");
        assert_eq!(blocks[0].content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_declares_incapacity() {
        let p = GenericAnsiParser::new();
        assert!(p.declares_incapacity());
    }
}
