// src/parsers/mod.rs
// Per-agent byte-stream -> block decoders (spec §4.4). Each concrete
// parser is a stateful transducer; the shared JSON-lines/accumulator
// toolkit lives in `json_stream` so the JSON-based parsers don't
// reimplement it.

pub mod block;
pub mod claude;
pub mod cursor;
pub mod generic;
pub mod gemini;
pub mod json_stream;

pub use block::{Block, BlockType, Role};

/// A stateful byte -> block transducer. One instance per `AgentSession`.
pub trait Parser: Send {
    /// Feed newly-read bytes; returns zero or more blocks.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Block>;

    /// Called once on EOF to flush any buffered partial state.
    fn flush(&mut self) -> Vec<Block>;

    /// Whether the most recent `feed` call crossed a turn boundary
    /// (spec §4.5 "turn-complete detection"). Checked by `AgentSession`
    /// after every `feed`/`flush` call.
    fn turn_complete(&mut self) -> bool;

    /// Whether this parser declares itself unable to structure the
    /// current stream, triggering the raw-passthrough fallback (spec §9
    /// open question: "structured-only... raw only when the parser
    /// declares incapacity").
    fn declares_incapacity(&self) -> bool {
        false
    }
}

/// Construct the parser appropriate for a tool (spec §4.4's four
/// concrete parsers).
pub fn for_tool(tool: crate::model::Tool) -> Box<dyn Parser> {
    match tool {
        crate::model::Tool::Claude => Box::new(claude::ClaudeJsonlParser::new()),
        crate::model::Tool::CursorAgent => Box::new(cursor::CursorAgentStreamJsonParser::new()),
        crate::model::Tool::Gemini => Box::new(gemini::GeminiTextParser::new()),
        crate::model::Tool::Custom => Box::new(generic::GenericAnsiParser::new()),
    }
}
