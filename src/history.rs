// src/history.rs
// In-memory bounded ring of recent blocks per conversation (spec §4.2).
// Not authoritative — the Store is — so eviction here never touches
// persisted rows.

use crate::parsers::block::Block;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

pub struct HistoryBuffer {
    capacity: AtomicUsize,
    buffers: RwLock<HashMap<String, VecDeque<Block>>>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity.max(1)),
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Live update from `PUT /conversations/sessions/config` (spec §3):
    /// takes effect on the next `append` for every conversation, existing
    /// buffers included — no need to touch already-buffered blocks.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::SeqCst);
    }

    pub fn append(&self, conversation_id: &str, block: Block) {
        let capacity = self.capacity.load(Ordering::SeqCst);
        let mut guard = self.buffers.write().expect("history buffer lock poisoned");
        let deque = guard.entry(conversation_id.to_string()).or_default();
        deque.push_back(block);
        while deque.len() > capacity {
            deque.pop_front();
        }
    }

    pub fn snapshot(&self, conversation_id: &str) -> Vec<Block> {
        let guard = self.buffers.read().expect("history buffer lock poisoned");
        guard
            .get(conversation_id)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, conversation_id: &str) {
        let mut guard = self.buffers.write().expect("history buffer lock poisoned");
        guard.remove(conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::block::{Block, BlockType};

    fn block(id: &str, ts: i64) -> Block {
        Block::new(id, BlockType::Text, ts)
    }

    #[test]
    fn test_append_evicts_from_head_past_capacity() {
        let hb = HistoryBuffer::new(3);
        for i in 0..5 {
            hb.append("c1", block(&format!("b{i}"), i as i64));
        }
        let snap = hb.snapshot("c1");
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].id, "b2");
        assert_eq!(snap[2].id, "b4");
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let hb = HistoryBuffer::new(10);
        hb.append("c1", block("b0", 0));
        let snap = hb.snapshot("c1");
        hb.append("c1", block("b1", 1));
        assert_eq!(snap.len(), 1);
    }

    #[test]
    fn test_unknown_conversation_snapshot_is_empty() {
        let hb = HistoryBuffer::new(10);
        assert!(hb.snapshot("nope").is_empty());
    }
}
