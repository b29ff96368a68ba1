//! Per-client dialogue state: the conversation turns fed to the LLM, and the
//! TTS output awaiting fragmentation.

use std::collections::VecDeque;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// Bounded conversation history. Owned by exactly one logical client;
/// destroyed when the client is reaped or explicitly reset.
#[derive(Debug, Default)]
pub struct DialogueSession {
    turns: VecDeque<(Role, String)>,
    capacity: usize,
}

impl DialogueSession {
    pub fn new(capacity: usize) -> Self {
        Self { turns: VecDeque::with_capacity(capacity.min(64)), capacity }
    }

    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        if self.turns.len() >= self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back((role, text.into()));
    }

    pub fn turns(&self) -> impl Iterator<Item = &(Role, String)> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// One complete TTS output for one reply turn, tagged for fragmentation.
#[derive(Clone, Debug)]
pub struct OutboundChunk {
    pub session_id: [u8; 16],
    pub chunk_index: u32,
    pub mp3_bytes: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_turn_past_capacity() {
        let mut d = DialogueSession::new(3);
        d.push(Role::User, "one");
        d.push(Role::Assistant, "two");
        d.push(Role::User, "three");
        d.push(Role::Assistant, "four");

        let texts: Vec<&str> = d.turns().map(|(_, t)| t.as_str()).collect();
        assert_eq!(texts, vec!["two", "three", "four"]);
    }

    #[test]
    fn reset_empties_history() {
        let mut d = DialogueSession::new(50);
        d.push(Role::User, "hi");
        d.clear();
        assert!(d.is_empty());
    }
}
