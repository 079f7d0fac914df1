// src/parsers/json_stream.rs
// Shared toolkit for the JSON-based parsers (spec §4.4): a JSON-lines
// splitter and an incremental JSON value accumulator that recovers a
// best-effort value from a still-open fragment such as `{"command":"ls`
// so `toolUseStart.input` can be progressively filled before the
// closing brace arrives.

use serde_json::Value;

/// Accumulates raw bytes and yields complete `\n`-terminated lines,
/// leaving any trailing partial line buffered for the next `feed`.
#[derive(Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            let text = String::from_utf8_lossy(line).trim_end_matches('\r').to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    /// The current unterminated trailing fragment, for partial parsing.
    pub fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buf).to_string()
    }
}

/// Given a possibly-truncated JSON fragment, close any open strings,
/// arrays, and objects so it becomes syntactically valid, then parse it.
/// Returns `None` if the fragment isn't even a plausible object/array
/// start (e.g. still inside a bare literal).
pub fn recover_partial_json(fragment: &str) -> Option<Value> {
    let trimmed = fragment.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Already valid — nothing to recover.
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    let mut closer = String::new();
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in trimmed.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut candidate = trimmed.to_string();
    if in_string {
        candidate.push('"');
    }
    // Trim a dangling comma/colon that would otherwise make the closed
    // fragment invalid (e.g. `{"a":1,`).
    let trimmed_candidate = candidate.trim_end().trim_end_matches(',').trim_end_matches(':');
    candidate = trimmed_candidate.to_string();

    for c in stack.iter().rev() {
        closer.push(*c);
    }
    candidate.push_str(&closer);

    serde_json::from_str::<Value>(&candidate).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_splitter_yields_complete_lines_only() {
        let mut s = LineSplitter::new();
        let out = s.feed(b"{\"a\":1}\n{\"b\":2");
        assert_eq!(out, vec!["{\"a\":1}".to_string()]);
        assert_eq!(s.pending(), "{\"b\":2");
        let out2 = s.feed(b"}\n");
        assert_eq!(out2, vec!["{\"b\":2}".to_string()]);
    }

    #[test]
    fn test_recover_partial_json_open_string() {
        let v = recover_partial_json(r#"{"command":"ls"#).unwrap();
        assert_eq!(v["command"], "ls");
    }

    #[test]
    fn test_recover_partial_json_open_object_and_array() {
        let v = recover_partial_json(r#"{"files":["a.rs","b.rs"#).unwrap();
        assert_eq!(v["files"][0], "a.rs");
        assert_eq!(v["files"][1], "b.rs");
    }

    #[test]
    fn test_recover_partial_json_trailing_comma() {
        let v = recover_partial_json(r#"{"a":1,"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn test_recover_partial_json_rejects_bare_fragment() {
        assert!(recover_partial_json("tr").is_none());
    }
}
